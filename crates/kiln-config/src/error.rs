//! Settings errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid KDL: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("settings field {0} is required")]
    MissingField(String),

    #[error("settings field {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
