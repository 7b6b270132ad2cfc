use std::path::PathBuf;

use rdb_types::RdbError;
use thiserror::Error;

/// Errors loading a [`crate::RepoConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl From<ConfigError> for RdbError {
    fn from(err: ConfigError) -> Self {
        RdbError::Validation(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
