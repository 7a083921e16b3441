use crate::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegqError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, SegqError>;
