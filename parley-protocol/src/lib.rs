//! Parley protocol - request/response correlation for agent conversations.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use parley_core::{ConversationOptions, Message, Performative, TokioScheduler};
//! use parley_protocol::{ConversationRegistry, RequestOptions, RequestResponseProtocol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = Arc::new(TokioScheduler::new());
//!     let registry = ConversationRegistry::new(scheduler.clone());
//!     let protocol = RequestResponseProtocol::with_scheduler(scheduler);
//!
//!     let conversation = registry.create(["alice", "bob"], "alice", ConversationOptions::new())?;
//!     let request = Message::builder("alice", ["bob"], Performative::Request)
//!         .conversation_id(conversation.id().clone())
//!         .build()?;
//!
//!     let reply = protocol.initiate_request(
//!         request,
//!         &conversation,
//!         Some(RequestOptions::with_timeout(Duration::from_secs(5))),
//!     )?;
//!     // ... hand the request to a transport, feed replies to `protocol.handle_message` ...
//!     println!("Reply: {:?}", reply.await?);
//!
//!     Ok(())
//! }
//! ```

mod config;
mod events;
mod pending;
mod registry;
mod request_response;
mod response;

pub use config::{ProtocolConfig, RequestOptions};
pub use events::{ProtocolEvent, RetryCause};
pub use pending::PendingRequestInfo;
pub use registry::ConversationRegistry;
pub use request_response::RequestResponseProtocol;
pub use response::ResponseFuture;
