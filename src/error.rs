//! Error taxonomy and per-module error types.
//!
//! Grounded on `funding/error.rs` / `sentinel/error.rs`'s flat
//! `thiserror`-derived enums with `#[from]` wrapping: an explicit `kind` tag
//! on every error instead of classification by exception-type-name or
//! string matching at the callsite.

use thiserror::Error;

use crate::model::DlqReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Deserialization,
    DownstreamTransient,
    DownstreamPermanent,
    Timeout,
    CircuitOpen,
    Internal,
}

impl ErrorKind {
    /// The DLQ reason a failure of this kind is filed under.
    pub fn dlq_reason(self) -> DlqReason {
        match self {
            ErrorKind::Validation => DlqReason::Validation,
            ErrorKind::Deserialization => DlqReason::Deserialization,
            ErrorKind::DownstreamTransient | ErrorKind::DownstreamPermanent | ErrorKind::CircuitOpen => {
                DlqReason::Downstream
            }
            ErrorKind::Timeout => DlqReason::Timeout,
            ErrorKind::Internal => DlqReason::Processing,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("archive write failed: {0}")]
    Archive(#[from] object_store::Error),

    #[error("encode failed: {0}")]
    Encode(#[from] bincode::Error),

    #[error("publish to trades log failed: {0}")]
    Publish(String),

    #[error("circuit open for {0}")]
    CircuitOpen(String),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Validation(_) => ErrorKind::Validation,
            IngestError::Archive(_) => ErrorKind::DownstreamTransient,
            IngestError::Encode(_) => ErrorKind::Internal,
            IngestError::Publish(_) => ErrorKind::DownstreamTransient,
            IngestError::CircuitOpen(_) => ErrorKind::CircuitOpen,
        }
    }
}

#[derive(Debug, Error)]
pub enum HotPathError {
    #[error("deserialize envelope failed: {0}")]
    Deserialize(#[from] bincode::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("circuit open for {0}")]
    CircuitOpen(String),
}

impl HotPathError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HotPathError::Deserialize(_) => ErrorKind::Deserialization,
            HotPathError::Cache(_) => ErrorKind::DownstreamTransient,
            HotPathError::CircuitOpen(_) => ErrorKind::CircuitOpen,
        }
    }
}

#[derive(Debug, Error)]
pub enum ColdPathError {
    #[error("deserialize envelope failed: {0}")]
    Deserialize(#[from] bincode::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ColdPathError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ColdPathError::Deserialize(_) => ErrorKind::Deserialization,
            ColdPathError::Store(e) => {
                if is_transient_sql_error(e) {
                    ErrorKind::DownstreamTransient
                } else {
                    ErrorKind::DownstreamPermanent
                }
            }
            ColdPathError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            ColdPathError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

fn is_transient_sql_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("dlq publish failed: {0}")]
    EnqueueFailed(String),
}

impl DlqError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DownstreamTransient
    }
}

#[derive(Debug, Error)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    pub name: String,
}
