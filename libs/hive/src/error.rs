//! Runtime error types.
//!
//! Connectivity failures are recoverable and scoped to the proxy that hit
//! them; protocol violations are fatal to their connection; routing
//! invariant violations do not surface here at all, they abort dispatch.

use codec::CodecError;
use state::StateError;
use thiserror::Error;
use types::HiveId;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, HiveError>;

#[derive(Error, Debug)]
pub enum HiveError {
    /// Handler or payload registration rejected.
    #[error("registration error: {message}")]
    Registration { message: String },

    /// Emit of a payload type with no registered handler.
    #[error("no handler registered for payload type {type_tag}")]
    NoHandler { type_tag: String },

    /// Control-plane lookup of a bee this hive does not host.
    #[error("no bee with id {id} on this hive")]
    BeeNotFound { id: u64 },

    #[error("hive is not running")]
    NotRunning,

    #[error("hive is already running")]
    AlreadyRunning,

    /// Send into a queue whose consumer is gone.
    #[error("{target} queue is closed")]
    QueueClosed { target: String },

    /// A single connection attempt or an established connection failed.
    #[error("connection error: {message} (remote: {remote:?})")]
    Connection {
        message: String,
        remote: Option<HiveId>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Dial retries exhausted. Recoverable: the owning proxy dies and a
    /// later message builds a fresh one.
    #[error("hive {remote} unreachable after {attempts} attempts: {message}")]
    ConnectionUnavailable {
        remote: HiveId,
        attempts: u32,
        message: String,
    },

    /// The peer broke the wire protocol; the connection is abandoned.
    #[error("protocol violation: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A handler has no reply address to answer to.
    #[error("message has no reply address")]
    NoReply,

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("i/o error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl HiveError {
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration {
            message: message.into(),
        }
    }

    pub fn no_handler(type_tag: impl Into<String>) -> Self {
        Self::NoHandler {
            type_tag: type_tag.into(),
        }
    }

    pub fn bee_not_found(id: u64) -> Self {
        Self::BeeNotFound { id }
    }

    pub fn queue_closed(target: impl Into<String>) -> Self {
        Self::QueueClosed {
            target: target.into(),
        }
    }

    pub fn connection(message: impl Into<String>, remote: Option<HiveId>) -> Self {
        Self::Connection {
            message: message.into(),
            remote,
            source: None,
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        remote: Option<HiveId>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote,
            source: Some(Box::new(source)),
        }
    }

    pub fn connection_unavailable(
        remote: HiveId,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::ConnectionUnavailable {
            remote,
            attempts,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::ConnectionUnavailable { .. } => true,
            Self::Timeout { .. } => true,
            Self::Io { .. } => true,
            Self::QueueClosed { .. } => false,
            Self::Registration { .. } => false,
            Self::NoHandler { .. } => false,
            Self::BeeNotFound { .. } => false,
            Self::NotRunning => false,
            Self::AlreadyRunning => false,
            Self::Protocol { .. } => false,
            Self::Configuration { .. } => false,
            Self::NoReply => false,
            Self::State(_) => false,
            Self::Internal { .. } => false,
        }
    }

    /// Whether the failure is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionUnavailable { .. } | Self::Timeout { .. }
        )
    }

    /// Error category for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Registration { .. } => "registration",
            Self::NoHandler { .. } => "no_handler",
            Self::BeeNotFound { .. } => "bee_not_found",
            Self::NotRunning => "not_running",
            Self::AlreadyRunning => "already_running",
            Self::QueueClosed { .. } => "queue_closed",
            Self::Connection { .. } => "connection",
            Self::ConnectionUnavailable { .. } => "connection_unavailable",
            Self::Protocol { .. } => "protocol",
            Self::Timeout { .. } => "timeout",
            Self::Configuration { .. } => "configuration",
            Self::NoReply => "no_reply",
            Self::State(_) => "state",
            Self::Io { .. } => "io",
            Self::Internal { .. } => "internal",
        }
    }
}

// Custom Clone since boxed sources are not cloneable; clones drop them.
impl Clone for HiveError {
    fn clone(&self) -> Self {
        match self {
            Self::Registration { message } => Self::Registration {
                message: message.clone(),
            },
            Self::NoHandler { type_tag } => Self::NoHandler {
                type_tag: type_tag.clone(),
            },
            Self::BeeNotFound { id } => Self::BeeNotFound { id: *id },
            Self::NotRunning => Self::NotRunning,
            Self::AlreadyRunning => Self::AlreadyRunning,
            Self::QueueClosed { target } => Self::QueueClosed {
                target: target.clone(),
            },
            Self::Connection {
                message, remote, ..
            } => Self::Connection {
                message: message.clone(),
                remote: remote.clone(),
                source: None,
            },
            Self::ConnectionUnavailable {
                remote,
                attempts,
                message,
            } => Self::ConnectionUnavailable {
                remote: remote.clone(),
                attempts: *attempts,
                message: message.clone(),
            },
            Self::Protocol { message, .. } => Self::Protocol {
                message: message.clone(),
                source: None,
            },
            Self::Timeout {
                operation,
                timeout_ms,
            } => Self::Timeout {
                operation: operation.clone(),
                timeout_ms: *timeout_ms,
            },
            Self::Configuration { message, field } => Self::Configuration {
                message: message.clone(),
                field: field.clone(),
            },
            Self::NoReply => Self::NoReply,
            Self::State(e) => Self::State(e.clone()),
            Self::Io { message, source } => Self::Io {
                message: message.clone(),
                source: std::io::Error::new(source.kind(), message.as_str()),
            },
            Self::Internal { message } => Self::Internal {
                message: message.clone(),
            },
        }
    }
}

impl From<std::io::Error> for HiveError {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

impl From<CodecError> for HiveError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Io(e) => Self::from(e),
            other => Self::protocol_with_source(other.to_string(), other),
        }
    }
}
