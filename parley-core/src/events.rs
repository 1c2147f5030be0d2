//! Notifications published by conversations.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, Message};
use crate::state::ConversationState;

/// Something observable happened to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// Lifecycle moved from `from` to `to`.
    StateChanged {
        conversation_id: ConversationId,
        from: ConversationState,
        to: ConversationState,
    },
    /// A message was appended to the log.
    MessageAdded {
        conversation_id: ConversationId,
        message: Message,
    },
    ParticipantAdded {
        conversation_id: ConversationId,
        participant: String,
    },
    ParticipantRemoved {
        conversation_id: ConversationId,
        participant: String,
    },
}

impl ConversationEvent {
    /// Conversation the event belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::StateChanged { conversation_id, .. }
            | Self::MessageAdded { conversation_id, .. }
            | Self::ParticipantAdded { conversation_id, .. }
            | Self::ParticipantRemoved { conversation_id, .. } => conversation_id,
        }
    }
}
