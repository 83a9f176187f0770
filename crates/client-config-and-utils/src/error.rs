//! Errors raised while loading configuration and resolving paths.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A configuration value is present but unusable
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The config file exists but is not valid JSON for `Config`
    #[error("Failed to parse {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No home directory to root `~/.townsquare` in
    #[error("Could not determine home directory")]
    HomeDirNotFound,
}

pub type CoreResult<T> = Result<T, CoreError>;
