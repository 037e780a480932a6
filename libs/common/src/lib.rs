//! Shared service plumbing for the point server
//!
//! - logging bootstrap (console + daily rolling file)
//! - graceful shutdown signal
//! - configuration value helpers

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use logging::LogConfig;
