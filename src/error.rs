use std::time::Duration;

use thiserror::Error;

/// Failure while reading from or writing to the backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("unexpected value {value:?} in column {column}")]
    Decode { column: &'static str, value: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure fetching the external outbreak feed. Never surfaced past the engine.
#[derive(Error, Debug)]
pub enum OutbreakFeedError {
    #[error("outbreak feed unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("outbreak feed timed out after {0:?}")]
    Timeout(Duration),

    #[error("outbreak feed returned status {0}")]
    Status(u16),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
