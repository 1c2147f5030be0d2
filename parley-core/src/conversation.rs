//! Conversation aggregate.
//!
//! A [`Conversation`] tracks a bounded, timed exchange of messages among a
//! participant set. It owns its lifecycle state machine, an append-only
//! message log and an optional deadline timer that moves it to
//! [`ConversationState::Timeout`] if nothing else terminates it first.
//!
//! `Conversation` is a cheap cloneable handle; clones share the same state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{ParleyError, ParleyResult};
use crate::events::ConversationEvent;
use crate::message::{ConversationId, Message, MessageId, Metadata, Performative};
use crate::state::ConversationState;
use crate::timer::{Scheduler, TimerHandle};

/// Buffered notifications per subscriber before the slowest one lags.
const EVENT_CAPACITY: usize = 256;

/// Construction options for a conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationOptions {
    /// Use a caller-supplied id instead of generating one.
    pub id: Option<ConversationId>,
    /// Deadline after which the conversation times out.
    pub timeout: Option<Duration>,
    /// Maximum number of messages in the log.
    pub max_messages: Option<usize>,
    /// Initial conversation metadata.
    pub metadata: Metadata,
}

impl ConversationOptions {
    /// Options with no id, timeout or message limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `id` instead of a generated one.
    pub fn with_id(mut self, id: impl Into<ConversationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Time the conversation out after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cap the message log at `max` entries.
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = Some(max);
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    fn validate(&self) -> ParleyResult<()> {
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ParleyError::invalid("conversation timeout must be positive"));
        }
        if self.max_messages == Some(0) {
            return Err(ParleyError::invalid("conversation max_messages must be positive"));
        }
        if self.id.as_ref().is_some_and(|id| id.is_empty()) {
            return Err(ParleyError::invalid("conversation id must not be empty"));
        }
        Ok(())
    }
}

/// Serializable snapshot of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub id: ConversationId,
    pub participants: Vec<String>,
    pub initiator: String,
    pub state: ConversationState,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn to_json(&self) -> ParleyResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> ParleyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Handle to a shared conversation.
#[derive(Clone)]
pub struct Conversation {
    shared: Arc<Shared>,
}

struct Shared {
    id: ConversationId,
    initiator: String,
    timeout: Option<Duration>,
    max_messages: Option<usize>,
    created_at: DateTime<Utc>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<ConversationEvent>,
    scheduler: Arc<dyn Scheduler>,
}

struct Inner {
    participants: Vec<String>,
    state: ConversationState,
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
    metadata: Metadata,
    updated_at: DateTime<Utc>,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    deadline: Option<TimerHandle>,
}

impl Conversation {
    /// Create a conversation in the `initiated` state.
    ///
    /// The initiator is appended to `participants` if missing. A configured
    /// timeout arms the deadline timer immediately.
    pub fn new(
        participants: impl IntoIterator<Item = impl Into<String>>,
        initiator: impl Into<String>,
        options: ConversationOptions,
        scheduler: Arc<dyn Scheduler>,
    ) -> ParleyResult<Self> {
        let initiator = initiator.into();
        if initiator.is_empty() {
            return Err(ParleyError::invalid("conversation initiator must not be empty"));
        }
        let supplied: Vec<String> = participants.into_iter().map(Into::into).collect();
        if supplied.is_empty() {
            return Err(ParleyError::invalid("conversation needs at least one participant"));
        }
        if supplied.iter().any(|p| p.is_empty()) {
            return Err(ParleyError::invalid("participant ids must not be empty"));
        }
        options.validate()?;

        let mut participants: Vec<String> = Vec::with_capacity(supplied.len() + 1);
        for p in supplied {
            if !participants.contains(&p) {
                participants.push(p);
            }
        }
        if !participants.contains(&initiator) {
            participants.push(initiator.clone());
        }

        let now = Utc::now();
        let conversation = Self::assemble(
            options.id.unwrap_or_default(),
            initiator,
            options.timeout,
            options.max_messages,
            now,
            Inner {
                participants,
                state: ConversationState::Initiated,
                messages: Vec::new(),
                index: HashMap::new(),
                metadata: options.metadata,
                updated_at: now,
                result: None,
                error: None,
                deadline: None,
            },
            scheduler,
        );
        conversation.arm_deadline();
        tracing::debug!(
            "Conversation {} initiated by {}",
            conversation.shared.id,
            conversation.shared.initiator
        );
        Ok(conversation)
    }

    /// Rebuild a conversation from its context form.
    ///
    /// A non-terminal conversation with a timeout gets a fresh full deadline.
    pub fn from_context(
        context: ConversationContext,
        scheduler: Arc<dyn Scheduler>,
    ) -> ParleyResult<Self> {
        if context.initiator.is_empty() {
            return Err(ParleyError::invalid("conversation initiator must not be empty"));
        }
        if context.id.is_empty() {
            return Err(ParleyError::invalid("conversation id must not be empty"));
        }
        if !context.participants.contains(&context.initiator) {
            return Err(ParleyError::invalid("initiator missing from participants"));
        }
        let timeout = context.timeout_ms.map(Duration::from_millis);
        ConversationOptions {
            id: None,
            timeout,
            max_messages: context.max_messages,
            metadata: Metadata::new(),
        }
        .validate()?;
        if let Some(max) = context.max_messages {
            if context.messages.len() > max {
                return Err(ParleyError::invalid(format!(
                    "context holds {} messages, limit is {}",
                    context.messages.len(),
                    max
                )));
            }
        }

        let mut index = HashMap::with_capacity(context.messages.len());
        for (pos, message) in context.messages.iter().enumerate() {
            if let Some(cid) = &message.conversation_id {
                if *cid != context.id {
                    return Err(ParleyError::invalid(format!(
                        "message {} belongs to conversation {}, not {}",
                        message.id, cid, context.id
                    )));
                }
            }
            if index.insert(message.id.clone(), pos).is_some() {
                return Err(ParleyError::invalid(format!(
                    "duplicate message id {} in context",
                    message.id
                )));
            }
        }

        let state = context.state;
        let conversation = Self::assemble(
            context.id,
            context.initiator,
            timeout,
            context.max_messages,
            context.created_at,
            Inner {
                participants: context.participants,
                state,
                messages: context.messages,
                index,
                metadata: context.metadata,
                updated_at: context.updated_at,
                result: context.result,
                error: context.error,
                deadline: None,
            },
            scheduler,
        );
        if !state.is_terminal() {
            conversation.arm_deadline();
        }
        Ok(conversation)
    }

    fn assemble(
        id: ConversationId,
        initiator: String,
        timeout: Option<Duration>,
        max_messages: Option<usize>,
        created_at: DateTime<Utc>,
        inner: Inner,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                id,
                initiator,
                timeout,
                max_messages,
                created_at,
                inner: Mutex::new(inner),
                events,
                scheduler,
            }),
        }
    }

    fn arm_deadline(&self) {
        let Some(timeout) = self.shared.timeout else {
            return;
        };
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handle = self.shared.scheduler.schedule(
            timeout,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    Conversation { shared }.expire();
                }
            }),
        );
        self.lock().deadline = Some(handle);
    }

    /// Deadline callback. Loses silently against any earlier terminal transition.
    fn expire(&self) {
        match self.transition(ConversationState::Timeout, "time out", |_| {}) {
            Ok(()) => tracing::info!("Conversation {} timed out", self.shared.id),
            Err(_) => tracing::debug!(
                "Deadline for conversation {} fired after termination",
                self.shared.id
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ConversationEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }

    fn transition(
        &self,
        to: ConversationState,
        action: &'static str,
        outcome: impl FnOnce(&mut Inner),
    ) -> ParleyResult<()> {
        let (from, timer) = {
            let mut inner = self.lock();
            let from = inner.state;
            if !from.can_transition_to(to) {
                return Err(ParleyError::InvalidTransition { from, action });
            }
            inner.state = to;
            inner.updated_at = Utc::now();
            outcome(&mut inner);
            let timer = if to.is_terminal() {
                inner.deadline.take()
            } else {
                None
            };
            (from, timer)
        };
        if let Some(timer) = timer {
            timer.cancel();
        }

        tracing::debug!("Conversation {}: {:?} -> {:?}", self.shared.id, from, to);
        self.emit(ConversationEvent::StateChanged {
            conversation_id: self.shared.id.clone(),
            from,
            to,
        });
        Ok(())
    }

    /// `initiated -> active`.
    pub fn activate(&self) -> ParleyResult<()> {
        self.transition(ConversationState::Active, "activate", |_| {})
    }

    /// `active -> waiting`.
    pub fn set_waiting(&self) -> ParleyResult<()> {
        self.transition(ConversationState::Waiting, "wait", |_| {})
    }

    /// Finish successfully.
    pub fn complete(&self, result: Option<serde_json::Value>) -> ParleyResult<()> {
        self.transition(ConversationState::Completed, "complete", |inner| {
            inner.result = result;
        })
    }

    /// Finish with an error payload.
    pub fn fail(&self, error: impl Into<serde_json::Value>) -> ParleyResult<()> {
        let error = error.into();
        self.transition(ConversationState::Failed, "fail", |inner| {
            inner.error = Some(error);
        })
    }

    /// Abandon the conversation. The reason, if any, is kept as the error payload.
    pub fn cancel(&self, reason: Option<String>) -> ParleyResult<()> {
        self.transition(ConversationState::Cancelled, "cancel", |inner| {
            inner.error = reason.map(serde_json::Value::String);
        })
    }

    /// Append a message to the log.
    pub fn add_message(&self, message: Message) -> ParleyResult<()> {
        if let Some(cid) = &message.conversation_id {
            if cid != &self.shared.id {
                return Err(ParleyError::invalid(format!(
                    "message {} belongs to conversation {}, not {}",
                    message.id, cid, self.shared.id
                )));
            }
        }

        {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return Err(ParleyError::InvalidTransition {
                    from: inner.state,
                    action: "add message",
                });
            }
            if let Some(max) = self.shared.max_messages {
                if inner.messages.len() >= max {
                    return Err(ParleyError::CapacityExceeded { max });
                }
            }
            if inner.index.contains_key(&message.id) {
                return Err(ParleyError::invalid(format!(
                    "message {} already in conversation {}",
                    message.id, self.shared.id
                )));
            }
            let pos = inner.messages.len();
            inner.index.insert(message.id.clone(), pos);
            inner.messages.push(message.clone());
            inner.updated_at = Utc::now();
        }

        tracing::debug!(
            "Conversation {}: {} from {}",
            self.shared.id,
            message.performative,
            message.sender
        );
        self.emit(ConversationEvent::MessageAdded {
            conversation_id: self.shared.id.clone(),
            message,
        });
        Ok(())
    }

    /// Add a participant. Returns false if already present.
    pub fn add_participant(&self, participant: impl Into<String>) -> ParleyResult<bool> {
        let participant = participant.into();
        if participant.is_empty() {
            return Err(ParleyError::invalid("participant id must not be empty"));
        }
        {
            let mut inner = self.lock();
            if inner.participants.contains(&participant) {
                return Ok(false);
            }
            inner.participants.push(participant.clone());
            inner.updated_at = Utc::now();
        }
        self.emit(ConversationEvent::ParticipantAdded {
            conversation_id: self.shared.id.clone(),
            participant,
        });
        Ok(true)
    }

    /// Remove a participant. The initiator cannot be removed.
    /// Returns false if the participant was not present.
    pub fn remove_participant(&self, participant: &str) -> ParleyResult<bool> {
        if participant == self.shared.initiator {
            return Err(ParleyError::invalid(format!(
                "cannot remove initiator {} from conversation {}",
                participant, self.shared.id
            )));
        }
        {
            let mut inner = self.lock();
            let Some(pos) = inner.participants.iter().position(|p| p == participant) else {
                return Ok(false);
            };
            inner.participants.remove(pos);
            inner.updated_at = Utc::now();
        }
        self.emit(ConversationEvent::ParticipantRemoved {
            conversation_id: self.shared.id.clone(),
            participant: participant.to_string(),
        });
        Ok(true)
    }

    /// Insert or replace a metadata entry.
    pub fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut inner = self.lock();
        inner.metadata.insert(key.into(), value);
        inner.updated_at = Utc::now();
    }

    /// Subscribe to notifications. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.shared.events.subscribe()
    }

    /// Conversation id.
    pub fn id(&self) -> &ConversationId {
        &self.shared.id
    }

    /// Agent that started the conversation.
    pub fn initiator(&self) -> &str {
        &self.shared.initiator
    }

    /// Configured deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.shared.timeout
    }

    /// Message log capacity, if bounded.
    pub fn max_messages(&self) -> Option<usize> {
        self.shared.max_messages
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.shared.created_at
    }

    /// Time of the last change.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.lock().updated_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConversationState {
        self.lock().state
    }

    /// True once completed, failed, cancelled or timed out.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Participants in join order.
    pub fn participants(&self) -> Vec<String> {
        self.lock().participants.clone()
    }

    /// True if `participant` is a member.
    pub fn has_participant(&self, participant: &str) -> bool {
        self.lock().participants.iter().any(|p| p == participant)
    }

    /// Snapshot of the metadata.
    pub fn metadata(&self) -> Metadata {
        self.lock().metadata.clone()
    }

    /// Result recorded by `complete`.
    pub fn result(&self) -> Option<serde_json::Value> {
        self.lock().result.clone()
    }

    /// Error recorded by `fail` or `cancel`.
    pub fn error(&self) -> Option<serde_json::Value> {
        self.lock().error.clone()
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Number of logged messages.
    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    /// Look up a logged message by id.
    pub fn message(&self, id: &MessageId) -> Option<Message> {
        let inner = self.lock();
        inner.index.get(id).map(|&pos| inner.messages[pos].clone())
    }

    /// True if a message with `id` is logged.
    pub fn contains_message(&self, id: &MessageId) -> bool {
        self.lock().index.contains_key(id)
    }

    /// Messages sent by `sender`.
    pub fn messages_from(&self, sender: &str) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.sender == sender)
            .cloned()
            .collect()
    }

    /// Messages carrying `performative`.
    pub fn messages_with_performative(&self, performative: &Performative) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| &m.performative == performative)
            .cloned()
            .collect()
    }

    /// Most recent message.
    pub fn last_message(&self) -> Option<Message> {
        self.lock().messages.last().cloned()
    }

    /// Snapshot into the serializable context form.
    pub fn to_context(&self) -> ConversationContext {
        let inner = self.lock();
        ConversationContext {
            id: self.shared.id.clone(),
            participants: inner.participants.clone(),
            initiator: self.shared.initiator.clone(),
            state: inner.state,
            metadata: inner.metadata.clone(),
            timeout_ms: self.shared.timeout.map(duration_millis),
            max_messages: self.shared.max_messages,
            messages: inner.messages.clone(),
            result: inner.result.clone(),
            error: inner.error.clone(),
            created_at: self.shared.created_at,
            updated_at: inner.updated_at,
        }
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Conversation")
            .field("id", &self.shared.id)
            .field("initiator", &self.shared.initiator)
            .field("state", &inner.state)
            .field("participants", &inner.participants)
            .field("messages", &inner.messages.len())
            .finish()
    }
}
