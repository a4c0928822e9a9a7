//! Tracing setup for Tally binaries

pub mod config;
pub mod init;

pub use config::{LogFormat, LoggingConfig};
pub use init::init_tracing;
