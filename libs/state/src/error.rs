//! Store error types.

use thiserror::Error;

/// Errors from the dictionary store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Transaction lifecycle misuse: begin while one is open, or
    /// commit/abort with none open. The store is left unchanged.
    #[error("illegal state in {operation}: {message}")]
    IllegalState {
        operation: &'static str,
        message: &'static str,
    },

    /// Snapshot operations are refused while a transaction is open.
    #[error("store busy during {operation}: transaction open")]
    Busy { operation: &'static str },

    /// Snapshot encode or decode failure.
    #[error("snapshot error: {message}")]
    Snapshot { message: String },
}

impl StateError {
    pub fn illegal_state(operation: &'static str, message: &'static str) -> Self {
        Self::IllegalState { operation, message }
    }

    pub fn busy(operation: &'static str) -> Self {
        Self::Busy { operation }
    }

    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }
}
