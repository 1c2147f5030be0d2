//! Pending-request bookkeeping.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use parley_core::{Conversation, ConversationId, Message, MessageId, ParleyResult, TimerHandle};

use crate::config::RequestOptions;

/// A request awaiting its correlated reply.
///
/// Keyed in the protocol table by the request message id. `timer` is the one
/// armed timer of the entry: either the attempt deadline or the retry delay.
/// `generation` changes whenever `timer` is replaced so stale callbacks can
/// recognise themselves.
pub(crate) struct PendingRequest {
    pub message: Message,
    pub conversation: Conversation,
    pub options: RequestOptions,
    pub retries: u32,
    pub timer: Option<TimerHandle>,
    pub generation: u64,
    pub completion: oneshot::Sender<ParleyResult<Message>>,
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn can_retry(&self) -> bool {
        self.retries < self.options.max_retries
    }

    /// Settle the request. The receiver may already be gone; that is fine.
    pub fn settle(self, outcome: ParleyResult<Message>) {
        let PendingRequest {
            timer, completion, ..
        } = self;
        if let Some(timer) = timer {
            timer.cancel();
        }
        let _ = completion.send(outcome);
    }

    pub fn info(&self) -> PendingRequestInfo {
        PendingRequestInfo {
            id: self.message.id.clone(),
            conversation_id: self.conversation.id().clone(),
            receivers: self.message.receivers.clone(),
            retries: self.retries,
            max_retries: self.options.max_retries,
            created_at: self.created_at,
        }
    }
}

/// Read-only view of a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequestInfo {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub receivers: Vec<String>,
    pub retries: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}
