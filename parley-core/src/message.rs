//! Message envelope for agent conversations.
//!
//! A [`Message`] is an immutable speech-act envelope: who sent it, who it is
//! for, what kind of act it is (the [`Performative`]), an opaque JSON payload
//! and the ids needed to correlate it with a conversation and with the
//! message it answers.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParleyError, ParleyResult};

/// Free-form metadata attached to messages and conversations.
pub type Metadata = HashMap<String, serde_json::Value>;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True if the id is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique message identifier.
    MessageId
);

string_id!(
    /// Unique conversation identifier.
    ConversationId
);

/// Speech-act tag carried by a message.
///
/// The named variants are the FIPA ACL reference vocabulary. Any other tag is
/// kept verbatim in [`Performative::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Performative {
    AcceptProposal,
    Agree,
    Cancel,
    CallForProposal,
    Confirm,
    Disconfirm,
    Failure,
    Inform,
    InformIf,
    InformRef,
    NotUnderstood,
    Propagate,
    Propose,
    Proxy,
    QueryIf,
    QueryRef,
    Refuse,
    RejectProposal,
    Request,
    RequestWhen,
    RequestWhenever,
    Subscribe,
    /// Tag outside the reference vocabulary.
    Other(String),
}

impl Performative {
    /// Parse a wire tag. Never fails; unknown tags become `Other`.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "accept-proposal" => Self::AcceptProposal,
            "agree" => Self::Agree,
            "cancel" => Self::Cancel,
            "cfp" => Self::CallForProposal,
            "confirm" => Self::Confirm,
            "disconfirm" => Self::Disconfirm,
            "failure" => Self::Failure,
            "inform" => Self::Inform,
            "inform-if" => Self::InformIf,
            "inform-ref" => Self::InformRef,
            "not-understood" => Self::NotUnderstood,
            "propagate" => Self::Propagate,
            "propose" => Self::Propose,
            "proxy" => Self::Proxy,
            "query-if" => Self::QueryIf,
            "query-ref" => Self::QueryRef,
            "refuse" => Self::Refuse,
            "reject-proposal" => Self::RejectProposal,
            "request" => Self::Request,
            "request-when" => Self::RequestWhen,
            "request-whenever" => Self::RequestWhenever,
            "subscribe" => Self::Subscribe,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire tag for this performative.
    pub fn as_str(&self) -> &str {
        match self {
            Self::AcceptProposal => "accept-proposal",
            Self::Agree => "agree",
            Self::Cancel => "cancel",
            Self::CallForProposal => "cfp",
            Self::Confirm => "confirm",
            Self::Disconfirm => "disconfirm",
            Self::Failure => "failure",
            Self::Inform => "inform",
            Self::InformIf => "inform-if",
            Self::InformRef => "inform-ref",
            Self::NotUnderstood => "not-understood",
            Self::Propagate => "propagate",
            Self::Propose => "propose",
            Self::Proxy => "proxy",
            Self::QueryIf => "query-if",
            Self::QueryRef => "query-ref",
            Self::Refuse => "refuse",
            Self::RejectProposal => "reject-proposal",
            Self::Request => "request",
            Self::RequestWhen => "request-when",
            Self::RequestWhenever => "request-whenever",
            Self::Subscribe => "subscribe",
            Self::Other(tag) => tag,
        }
    }

    /// True for tags in the reference vocabulary.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Performative {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}

impl From<String> for Performative {
    fn from(tag: String) -> Self {
        Self::parse(&tag)
    }
}

impl Serialize for Performative {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Performative {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

/// Protocol envelope exchanged between agents.
///
/// Deserialization runs the same checks as [`MessageBuilder::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    pub receivers: Vec<String>,
    pub performative: Performative,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Message {
    /// Start building a message.
    pub fn builder(
        sender: impl Into<String>,
        receivers: impl IntoIterator<Item = impl Into<String>>,
        performative: impl Into<Performative>,
    ) -> MessageBuilder {
        MessageBuilder {
            id: None,
            sender: sender.into(),
            receivers: receivers.into_iter().map(Into::into).collect(),
            performative: performative.into(),
            content: serde_json::Value::Null,
            conversation_id: None,
            in_reply_to: None,
            metadata: None,
        }
    }

    /// Create a message with a fresh id and no correlation fields.
    pub fn new(
        sender: impl Into<String>,
        receivers: impl IntoIterator<Item = impl Into<String>>,
        performative: impl Into<Performative>,
        content: serde_json::Value,
    ) -> ParleyResult<Self> {
        Self::builder(sender, receivers, performative)
            .content(content)
            .build()
    }

    /// Build a reply to this message.
    ///
    /// The reply goes back to the original sender, comes from the first
    /// receiver, stays in the same conversation and points at this message.
    pub fn reply(
        &self,
        performative: impl Into<Performative>,
        content: serde_json::Value,
    ) -> ParleyResult<Self> {
        let from = self.receivers.first().cloned().unwrap_or_default();
        let mut builder = Self::builder(from, [self.sender.clone()], performative)
            .content(content)
            .in_reply_to(self.id.clone());
        if let Some(cid) = &self.conversation_id {
            builder = builder.conversation_id(cid.clone());
        }
        builder.build()
    }

    /// True if this message answers another one.
    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
    }

    /// True if `agent` is one of the receivers.
    pub fn is_addressed_to(&self, agent: &str) -> bool {
        self.receivers.iter().any(|r| r == agent)
    }

    /// Look up a metadata value.
    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

/// Wire form of a [`Message`] before validation.
#[derive(Deserialize)]
struct RawMessage {
    id: MessageId,
    sender: String,
    receivers: Vec<String>,
    performative: Performative,
    #[serde(default)]
    content: serde_json::Value,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    in_reply_to: Option<MessageId>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

impl TryFrom<RawMessage> for Message {
    type Error = ParleyError;

    fn try_from(raw: RawMessage) -> ParleyResult<Self> {
        check_envelope(&raw.sender, &raw.receivers, &raw.performative, Some(&raw.id))?;
        Ok(Message {
            id: raw.id,
            sender: raw.sender,
            receivers: raw.receivers,
            performative: raw.performative,
            content: raw.content,
            conversation_id: raw.conversation_id,
            in_reply_to: raw.in_reply_to,
            timestamp: raw.timestamp,
            metadata: raw.metadata,
        })
    }
}

fn check_envelope(
    sender: &str,
    receivers: &[String],
    performative: &Performative,
    id: Option<&MessageId>,
) -> ParleyResult<()> {
    if sender.is_empty() {
        return Err(ParleyError::invalid("message sender must not be empty"));
    }
    if receivers.is_empty() {
        return Err(ParleyError::invalid("message needs at least one receiver"));
    }
    if receivers.iter().any(|r| r.is_empty()) {
        return Err(ParleyError::invalid("message receiver ids must not be empty"));
    }
    if performative.as_str().is_empty() {
        return Err(ParleyError::invalid("message performative must not be empty"));
    }
    if id.is_some_and(MessageId::is_empty) {
        return Err(ParleyError::invalid("message id must not be empty"));
    }
    Ok(())
}

/// Builder for [`Message`]; validates on [`MessageBuilder::build`].
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: Option<MessageId>,
    sender: String,
    receivers: Vec<String>,
    performative: Performative,
    content: serde_json::Value,
    conversation_id: Option<ConversationId>,
    in_reply_to: Option<MessageId>,
    metadata: Option<Metadata>,
}

impl MessageBuilder {
    /// Use a caller-supplied id instead of generating one.
    pub fn id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the JSON payload.
    pub fn content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }

    /// Scope the message to a conversation.
    pub fn conversation_id(mut self, id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Mark the message as answering `id`.
    pub fn in_reply_to(mut self, id: impl Into<MessageId>) -> Self {
        self.in_reply_to = Some(id.into());
        self
    }

    /// Attach metadata.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Validate and build the message.
    pub fn build(self) -> ParleyResult<Message> {
        check_envelope(
            &self.sender,
            &self.receivers,
            &self.performative,
            self.id.as_ref(),
        )?;
        if !self.performative.is_known() {
            tracing::warn!(
                "Unrecognized performative '{}' from {}",
                self.performative,
                self.sender
            );
        }

        Ok(Message {
            id: self.id.unwrap_or_default(),
            sender: self.sender,
            receivers: self.receivers,
            performative: self.performative,
            content: self.content,
            conversation_id: self.conversation_id,
            in_reply_to: self.in_reply_to,
            timestamp: Utc::now(),
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn message_serialization() {
        let msg = Message::builder("alice", ["bob"], "request")
            .content(serde_json::json!({"action": "ping"}))
            .conversation_id("conv-1")
            .build()
            .unwrap();

        let json = serde_json::to_string_pretty(&msg).unwrap();
        assert!(json.contains("\"performative\": \"request\""));
        assert!(json.contains("\"conversation_id\": \"conv-1\""));
        assert!(!json.contains("in_reply_to"));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn performative_wire_tags() {
        assert_eq!(Performative::parse("accept-proposal"), Performative::AcceptProposal);
        assert_eq!(Performative::CallForProposal.as_str(), "cfp");
        assert_eq!(
            serde_json::to_string(&Performative::NotUnderstood).unwrap(),
            "\"not-understood\""
        );

        let custom: Performative = serde_json::from_str("\"haggle\"").unwrap();
        assert_eq!(custom, Performative::Other("haggle".to_string()));
        assert!(!custom.is_known());
        assert_eq!(custom.to_string(), "haggle");
    }

    #[test]
    fn unknown_performative_is_accepted() {
        let msg = Message::new("alice", ["bob"], "haggle", serde_json::Value::Null).unwrap();
        assert_eq!(msg.performative.as_str(), "haggle");
    }

    #[test]
    fn construction_rejects_missing_fields() {
        let no_sender = Message::new("", ["bob"], "inform", serde_json::Value::Null);
        assert_eq!(no_sender.unwrap_err().kind(), ErrorKind::InvalidArgument);

        let no_receivers = Message::new("alice", Vec::<String>::new(), "inform", serde_json::Value::Null);
        assert_eq!(no_receivers.unwrap_err().kind(), ErrorKind::InvalidArgument);

        let blank_receiver = Message::new("alice", ["bob", ""], "inform", serde_json::Value::Null);
        assert_eq!(blank_receiver.unwrap_err().kind(), ErrorKind::InvalidArgument);

        let no_performative = Message::new("alice", ["bob"], "", serde_json::Value::Null);
        assert_eq!(no_performative.unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn deserialization_rejects_invalid_envelopes() {
        let blank = r#"{"id":"","sender":"","receivers":[],"performative":"","timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Message>(blank).is_err());

        let no_receivers = r#"{"id":"m-1","sender":"alice","receivers":[],"performative":"inform","timestamp":"2024-01-01T00:00:00Z"}"#;
        let err = serde_json::from_str::<Message>(no_receivers).unwrap_err();
        assert!(err.to_string().contains("at least one receiver"));

        let blank_id = r#"{"id":"","sender":"alice","receivers":["bob"],"performative":"inform","timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Message>(blank_id).is_err());

        let valid = r#"{"id":"m-1","sender":"alice","receivers":["bob"],"performative":"inform","timestamp":"2024-01-01T00:00:00Z"}"#;
        let msg: Message = serde_json::from_str(valid).unwrap();
        assert_eq!(msg.id.as_str(), "m-1");
        assert_eq!(msg.content, serde_json::Value::Null);
    }

    #[test]
    fn supplied_id_is_kept() {
        let msg = Message::builder("alice", ["bob"], "inform")
            .id("m-42")
            .build()
            .unwrap();
        assert_eq!(msg.id.as_str(), "m-42");

        let generated = Message::new("alice", ["bob"], "inform", serde_json::Value::Null).unwrap();
        assert_ne!(generated.id, msg.id);
        assert!(!generated.id.is_empty());
    }

    #[test]
    fn reply_creation() {
        let req = Message::builder("alice", ["bob", "carol"], Performative::Request)
            .conversation_id("conv-7")
            .build()
            .unwrap();

        let reply = req
            .reply(Performative::Inform, serde_json::json!({"ok": true}))
            .unwrap();

        assert_eq!(reply.sender, "bob");
        assert_eq!(reply.receivers, vec!["alice".to_string()]);
        assert_eq!(reply.in_reply_to.as_ref(), Some(&req.id));
        assert_eq!(reply.conversation_id, req.conversation_id);
        assert!(reply.is_reply());
        assert!(reply.is_addressed_to("alice"));
        assert!(!reply.is_addressed_to("bob"));
    }
}
