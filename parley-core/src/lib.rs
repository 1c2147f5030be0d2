//! # parley-core
//!
//! Core library for Parley, an agent messaging correlation engine.
//!
//! This crate provides the message envelope, the conversation lifecycle
//! state machine, conversation notifications, the cancellable timer
//! capability and the shared error taxonomy used by `parley-protocol`.

pub mod conversation;
pub mod error;
pub mod events;
pub mod message;
pub mod state;
pub mod timer;

pub use conversation::{Conversation, ConversationContext, ConversationOptions};
pub use error::{ErrorKind, ParleyError, ParleyResult};
pub use events::ConversationEvent;
pub use message::{ConversationId, Message, MessageBuilder, MessageId, Metadata, Performative};
pub use state::{ConversationState, ProtocolState};
pub use timer::{ManualScheduler, Scheduler, TimerCallback, TimerHandle, TokioScheduler};
