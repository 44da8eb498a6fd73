pub mod agent;
pub mod config;
pub mod console;
pub mod protocol;
pub mod transport;
