pub mod decode;
pub mod frame;
pub mod session;
pub mod source;
