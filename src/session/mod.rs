pub mod command;
pub mod open;
pub mod session;
