pub mod config;
pub mod console;
pub mod protocol;
pub mod session;
pub mod test_util;
pub mod transport;
