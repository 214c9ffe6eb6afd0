pub mod history;
pub mod levels;
pub mod pitch;
pub mod spectrum;
