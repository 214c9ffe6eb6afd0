pub mod crc;
pub mod decoder;
pub mod packet;
