//! Notifications published by the request/response protocol.

use serde::{Deserialize, Serialize};

use parley_core::{ConversationId, Message, MessageId};

/// Why a request was retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCause {
    Timeout,
    Failure,
}

/// Something observable happened to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Outbound request registered as pending.
    RequestInitiated {
        request_id: MessageId,
        conversation_id: ConversationId,
        receivers: Vec<String>,
    },
    /// Inbound request handed to the protocol.
    RequestReceived { message: Message },
    /// Correlated `inform` reply resolved a pending request.
    ResponseReceived {
        request_id: MessageId,
        response: Message,
    },
    /// Failure reply with the retry budget spent.
    RequestFailed { request_id: MessageId, reason: String },
    /// Deadline elapsed with the retry budget spent.
    RequestTimeout { request_id: MessageId, retries: u32 },
    /// Setback absorbed by the retry budget; the deadline will be re-armed.
    RequestRetry {
        request_id: MessageId,
        attempt: u32,
        cause: RetryCause,
    },
    RequestCancelled { request_id: MessageId },
}

impl ProtocolEvent {
    /// Request the event refers to, if any.
    pub fn request_id(&self) -> Option<&MessageId> {
        match self {
            Self::RequestInitiated { request_id, .. }
            | Self::ResponseReceived { request_id, .. }
            | Self::RequestFailed { request_id, .. }
            | Self::RequestTimeout { request_id, .. }
            | Self::RequestRetry { request_id, .. }
            | Self::RequestCancelled { request_id } => Some(request_id),
            Self::RequestReceived { message } => Some(&message.id),
        }
    }
}
