use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtbError {
    #[error("failed to parse spec sheet '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
