//! Error types for Parley.

use thiserror::Error;

use crate::message::MessageId;
use crate::state::ConversationState;

/// Coarse error classification, stable across error payload changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed construction input or mismatched conversation id.
    InvalidArgument,
    /// Lifecycle operation from an illegal or terminal state.
    InvalidTransition,
    /// Message log is full.
    CapacityExceeded,
    /// No correlated reply before the deadline, retries exhausted.
    RequestTimeout,
    /// Explicit failure reply, retries exhausted.
    RequestFailed,
    /// Explicitly cancelled.
    Cancelled,
    /// Context encoding or decoding failed.
    Serialization,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::InvalidTransition => write!(f, "invalid_transition"),
            Self::CapacityExceeded => write!(f, "capacity_exceeded"),
            Self::RequestTimeout => write!(f, "request_timeout"),
            Self::RequestFailed => write!(f, "request_failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}

/// Parley errors.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Malformed input at a call site.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lifecycle operation attempted from an illegal state.
    #[error("invalid transition: cannot {action} from {from}")]
    InvalidTransition {
        from: ConversationState,
        action: &'static str,
    },

    /// Conversation message log is full.
    #[error("capacity exceeded: conversation already holds {max} messages")]
    CapacityExceeded { max: usize },

    /// Deadline elapsed with the retry budget spent.
    #[error("request {request_id} timed out after {retries} retries")]
    RequestTimeout { request_id: MessageId, retries: u32 },

    /// Failure reply received with the retry budget spent.
    #[error("request {request_id} failed after {retries} retries: {reason}")]
    RequestFailed {
        request_id: MessageId,
        retries: u32,
        reason: String,
    },

    /// Request cancelled before it settled.
    #[error("request {request_id} cancelled")]
    Cancelled { request_id: MessageId },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ParleyError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            Self::RequestFailed { .. } => ErrorKind::RequestFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Result type alias for Parley operations.
pub type ParleyResult<T> = Result<T, ParleyError>;
