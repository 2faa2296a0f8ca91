use thiserror::Error;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protobuf parsing error: {0}")]
    ProtobufError(#[from] prost::DecodeError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Invalid node: {0}")]
    InvalidNode(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Corrupt initializer '{name}': {reason}")]
    CorruptInitializer { name: String, reason: String },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Rewrite rule '{rule}' failed on node {node}: {source}")]
    RuleFailed {
        rule: String,
        node: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Transformer '{transformer}' did not converge within {max_passes} passes")]
    PassLimitExceeded { transformer: String, max_passes: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load configuration from {0}: {1}")]
    ConfigLoadError(PathBuf, String),
}
