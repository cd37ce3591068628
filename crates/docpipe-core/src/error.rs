use thiserror::Error;

/// Top-level error type for the docpipe workspace.
///
/// Configuration errors are fatal at startup. Transform errors are raised
/// per item inside a pipeline stage and never escape it: the stage logs
/// them, counts them and drops the item.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DocPipeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for DocPipeError {
    fn from(err: toml::de::Error) -> Self {
        DocPipeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DocPipeError {
    fn from(err: serde_json::Error) -> Self {
        DocPipeError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for docpipe operations.
pub type Result<T> = std::result::Result<T, DocPipeError>;
