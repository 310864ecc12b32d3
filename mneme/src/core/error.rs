use thiserror::Error;

/// Core error type for the mneme durable execution engine.
///
/// Covers the parameter/return codec and log-row parsing; storage and
/// dispatch failures have their own error types layered on top.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Serialization failed when encoding a value to log text.
    #[error("serialization failed")]
    Serialization(#[source] serde_json::Error),

    /// Deserialization failed when decoding log text back to a value.
    #[error("deserialization failed")]
    Deserialization(#[source] serde_json::Error),

    /// An invalid status string was encountered while reading a log row.
    #[error("invalid invocation status: {0}")]
    InvalidStatus(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
