use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
