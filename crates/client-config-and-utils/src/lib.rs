//! Core types, configuration, and utilities for the Townsquare client.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_API_BASE_URL, DEFAULT_AUTH_COOKIE_MAX_AGE_SECS, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, LogFileWriter};
pub use paths::Paths;
