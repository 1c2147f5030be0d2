//! Registry of live conversations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use parley_core::{
    Conversation, ConversationId, ConversationOptions, Message, ParleyError, ParleyResult,
    Scheduler,
};

/// Owns conversations by id and hands out shared handles.
///
/// All conversations created here share one injected scheduler.
pub struct ConversationRegistry {
    scheduler: Arc<dyn Scheduler>,
    conversations: Mutex<HashMap<ConversationId, Conversation>>,
}

impl ConversationRegistry {
    /// Empty registry whose conversations use `scheduler`.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, Conversation>> {
        self.conversations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Scheduler shared by the registered conversations.
    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Create and register a conversation.
    pub fn create(
        &self,
        participants: impl IntoIterator<Item = impl Into<String>>,
        initiator: impl Into<String>,
        options: ConversationOptions,
    ) -> ParleyResult<Conversation> {
        if let Some(id) = &options.id {
            if self.contains(id) {
                return Err(ParleyError::InvalidArgument(format!(
                    "conversation {} already registered",
                    id
                )));
            }
        }
        let conversation =
            Conversation::new(participants, initiator, options, Arc::clone(&self.scheduler))?;
        self.insert(conversation.clone())?;
        Ok(conversation)
    }

    /// Register an existing conversation.
    pub fn insert(&self, conversation: Conversation) -> ParleyResult<()> {
        let mut conversations = self.lock();
        if conversations.contains_key(conversation.id()) {
            return Err(ParleyError::InvalidArgument(format!(
                "conversation {} already registered",
                conversation.id()
            )));
        }
        tracing::debug!("Registered conversation {}", conversation.id());
        conversations.insert(conversation.id().clone(), conversation);
        Ok(())
    }

    /// Handle to a registered conversation.
    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        self.lock().get(id).cloned()
    }

    /// True if `id` is registered.
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.lock().contains_key(id)
    }

    /// Unregister a conversation, cancelling it if still open.
    pub fn remove(&self, id: &ConversationId) -> Option<Conversation> {
        let conversation = self.lock().remove(id)?;
        if !conversation.is_terminal() {
            // A timer may terminate it concurrently; losing that race is fine.
            let _ = conversation.cancel(Some("removed from registry".to_string()));
        }
        Some(conversation)
    }

    /// Number of registered conversations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of every registered conversation.
    pub fn ids(&self) -> Vec<ConversationId> {
        self.lock().keys().cloned().collect()
    }

    /// Conversations not yet in a terminal state.
    pub fn active(&self) -> Vec<Conversation> {
        self.lock()
            .values()
            .filter(|c| !c.is_terminal())
            .cloned()
            .collect()
    }

    /// Drop every terminal conversation. Returns how many were removed.
    pub fn purge_terminal(&self) -> usize {
        let mut conversations = self.lock();
        let before = conversations.len();
        conversations.retain(|_, c| !c.is_terminal());
        before - conversations.len()
    }

    /// Append an inbound message to the conversation it names.
    pub fn route(&self, message: Message) -> ParleyResult<Conversation> {
        let Some(id) = message.conversation_id.clone() else {
            return Err(ParleyError::InvalidArgument(format!(
                "message {} names no conversation",
                message.id
            )));
        };
        let conversation = self.get(&id).ok_or_else(|| {
            ParleyError::InvalidArgument(format!("unknown conversation {}", id))
        })?;
        conversation.add_message(message)?;
        Ok(conversation)
    }

    /// Cancel every open conversation and empty the registry.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Conversation> = self.lock().drain().map(|(_, c)| c).collect();
        let mut cancelled = 0;
        for conversation in drained {
            if conversation.cancel(Some("registry shut down".to_string())).is_ok() {
                cancelled += 1;
            }
        }
        tracing::info!("Conversation registry shut down, {} cancelled", cancelled);
        cancelled
    }
}

impl std::fmt::Debug for ConversationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRegistry")
            .field("conversations", &self.len())
            .finish()
    }
}
