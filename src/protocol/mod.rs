pub mod datagram;
pub mod message;
pub mod text;
