//! Lifecycle states for conversations and the request/response protocol.

use serde::{Deserialize, Serialize};

/// Conversation lifecycle states.
///
/// `Initiated -> Active -> Waiting -> {Completed | Failed | Cancelled | Timeout}`.
/// Any non-terminal state may move straight to a terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Created, not yet activated.
    Initiated,
    /// Exchanging messages.
    Active,
    /// Blocked on another participant.
    Waiting,
    /// Terminal - finished with an optional result.
    Completed,
    /// Terminal - finished with an error payload.
    Failed,
    /// Terminal - abandoned by the owner.
    Cancelled,
    /// Terminal - deadline elapsed first.
    Timeout,
}

impl ConversationState {
    /// All terminal states.
    pub const TERMINAL: [ConversationState; 4] =
        [Self::Completed, Self::Failed, Self::Cancelled, Self::Timeout];

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Get valid transitions from current state.
    pub fn valid_transitions(&self) -> &'static [ConversationState] {
        match self {
            Self::Initiated => &[
                Self::Active,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
                Self::Timeout,
            ],
            Self::Active => &[
                Self::Waiting,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
                Self::Timeout,
            ],
            Self::Waiting => &[Self::Completed, Self::Failed, Self::Cancelled, Self::Timeout],
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout => &[],
        }
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: ConversationState) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response protocol state. Derived from the pending table, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    /// No requests pending.
    Idle,
    /// At least one request awaiting a reply.
    Waiting,
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Waiting => write!(f, "waiting"),
        }
    }
}
