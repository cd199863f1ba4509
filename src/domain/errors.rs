//! Error taxonomy shared across the engine.
//!
//! Every layer (repository, adapter, pipeline stage, scheduler) returns
//! `EngineError`, so failures can be classified identically all the way up
//! to the (out-of-scope) HTTP surface via `EngineError::kind`.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Validation,
    Conflict,
    Precondition,
    Unavailable,
    Timeout,
    Cancelled,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {duration_ms}ms: {context}")]
    Timeout { duration_ms: u64, context: String },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Unauthorized(_) => ErrorKind::Unauthorized,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Precondition(_) => ErrorKind::Precondition,
            EngineError::Unavailable(_) => ErrorKind::Unavailable,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Cancelled(_) => ErrorKind::Cancelled,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EngineError::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        EngineError::Precondition(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::Internal(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        EngineError::Unavailable(msg.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_kind_is_stable() {
        let err = EngineError::conflict("duplicate order_id ABC");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("ABC"));
    }

    #[test]
    fn timeout_formatting() {
        let err = EngineError::Timeout {
            duration_ms: 60_000,
            context: "evaluator batch".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("60000"));
    }
}
