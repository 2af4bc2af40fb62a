use thiserror::Error;

use twittermap_common::GeoId;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    #[error("Incomplete merge: no value for geo ids {missing:?}")]
    IncompleteMerge { missing: Vec<GeoId> },

    #[error("Cache scope mismatch: the batch was issued under a scope that is no longer current")]
    ScopeMismatch,

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Batch {key} expected {expected} components, got {actual}")]
    ShapeMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Parse(err.to_string())
    }
}
