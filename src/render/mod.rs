pub mod frame;
pub mod palette;
