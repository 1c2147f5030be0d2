//! Request/response correlation engine.
//!
//! Matches outbound `request` messages to later `inform` / `failure` replies
//! by the reply's `in_reply_to` id.
//!
//! ```text
//! initiate_request(msg)
//!   -> pending[msg.id] = entry, deadline armed
//!   -> ResponseFuture returned to caller
//!
//! handle_message(inform, in_reply_to = msg.id)
//!   -> entry removed, future resolves Ok(reply)
//!
//! handle_message(failure) | deadline elapsed
//!   -> retries left:  retries += 1, wait retry_delay, re-arm deadline
//!   -> budget spent:  entry removed, future rejects
//!                     RequestFailed | RequestTimeout
//!
//! cancel_request(id)
//!   -> entry removed, future rejects Cancelled
//! ```
//!
//! A retry only re-arms the deadline. The original request is not sent again;
//! redelivery is left to the transport that owns the wire.
//!
//! Replies that match no pending entry (already settled, cancelled, or never
//! sent) are dropped with a debug log. They are the normal outcome of a reply
//! racing a timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, oneshot};

use parley_core::{
    Conversation, Message, MessageId, ParleyError, ParleyResult, Performative, ProtocolState,
    Scheduler, TimerHandle,
};

use crate::config::{ProtocolConfig, RequestOptions};
use crate::events::{ProtocolEvent, RetryCause};
use crate::pending::{PendingRequest, PendingRequestInfo};
use crate::response::ResponseFuture;

/// Request/response protocol engine.
///
/// Cheap to clone; clones share the pending table. Dropping the last clone
/// cancels every outstanding request.
#[derive(Clone)]
pub struct RequestResponseProtocol {
    shared: Arc<Shared>,
}

struct Shared {
    config: ProtocolConfig,
    table: Mutex<Table>,
    events: broadcast::Sender<ProtocolEvent>,
    scheduler: Arc<dyn Scheduler>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<MessageId, PendingRequest>,
    next_generation: u64,
}

impl Table {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ProtocolEvent) {
        let _ = self.events.send(event);
    }
}

/// What went wrong with an attempt.
enum Setback {
    Timeout,
    Failure(Message),
}

impl RequestResponseProtocol {
    /// Create a protocol engine.
    pub fn new(config: ProtocolConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                table: Mutex::new(Table::default()),
                events,
                scheduler,
            }),
        }
    }

    /// Create a protocol engine with default configuration.
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::new(ProtocolConfig::default(), scheduler)
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.shared.config
    }

    /// Subscribe to notifications. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.shared.events.subscribe()
    }

    /// Register an outbound request and get a future for its reply.
    ///
    /// The request is appended to `conversation` unless it is already there.
    /// `options` falls back to the configured defaults.
    pub fn initiate_request(
        &self,
        message: Message,
        conversation: &Conversation,
        options: Option<RequestOptions>,
    ) -> ParleyResult<ResponseFuture> {
        if message.performative != Performative::Request {
            return Err(ParleyError::InvalidArgument(format!(
                "expected a request performative, got '{}'",
                message.performative
            )));
        }
        let options = options.unwrap_or(self.shared.config.request);
        let id = message.id.clone();
        let receivers = message.receivers.clone();
        let (completion, receiver) = oneshot::channel();

        {
            let mut table = self.shared.lock();
            if table.entries.contains_key(&id) {
                return Err(ParleyError::InvalidArgument(format!(
                    "request {} is already pending",
                    id
                )));
            }
            if !conversation.contains_message(&id) {
                conversation.add_message(message.clone())?;
            }

            let generation = table.next_generation();
            let timer = options
                .has_deadline()
                .then(|| arm_deadline(&self.shared, id.clone(), generation, options.timeout));
            table.entries.insert(
                id.clone(),
                PendingRequest {
                    message,
                    conversation: conversation.clone(),
                    options,
                    retries: 0,
                    timer,
                    generation,
                    completion,
                    created_at: Utc::now(),
                },
            );
        }

        tracing::debug!(
            "Request {} initiated in conversation {} (timeout {:?}, retries {})",
            id,
            conversation.id(),
            options.timeout,
            options.max_retries
        );
        self.shared.emit(ProtocolEvent::RequestInitiated {
            request_id: id.clone(),
            conversation_id: conversation.id().clone(),
            receivers,
        });
        Ok(ResponseFuture::new(id, receiver))
    }

    /// Feed an inbound message to the protocol.
    ///
    /// Returns true if the message settled or set back a pending request.
    pub fn handle_message(&self, message: Message) -> bool {
        match message.performative {
            Performative::Request => {
                tracing::debug!("Request {} received from {}", message.id, message.sender);
                self.shared.emit(ProtocolEvent::RequestReceived { message });
                false
            }
            Performative::Inform => self.resolve(message),
            Performative::Failure => {
                let Some(request_id) = message.in_reply_to.clone() else {
                    return false;
                };
                let handled = setback(&self.shared, &request_id, Setback::Failure(message), None);
                if !handled {
                    tracing::debug!("Dropping failure reply to unknown request {}", request_id);
                }
                handled
            }
            _ => false,
        }
    }

    fn resolve(&self, reply: Message) -> bool {
        let Some(request_id) = reply.in_reply_to.clone() else {
            return false;
        };
        let entry = self.shared.lock().entries.remove(&request_id);
        let Some(entry) = entry else {
            tracing::debug!("Dropping reply {} to unknown request {}", reply.id, request_id);
            return false;
        };

        record_reply(&entry.conversation, &reply);
        tracing::debug!(
            "Request {} answered by {} after {} retries",
            request_id,
            reply.sender,
            entry.retries
        );
        self.shared.emit(ProtocolEvent::ResponseReceived {
            request_id,
            response: reply.clone(),
        });
        entry.settle(Ok(reply));
        true
    }

    /// Cancel a pending request. Returns false if nothing was pending under `id`.
    pub fn cancel_request(&self, id: &MessageId) -> bool {
        let entry = self.shared.lock().entries.remove(id);
        let Some(entry) = entry else {
            return false;
        };
        tracing::debug!("Request {} cancelled", id);
        self.shared.emit(ProtocolEvent::RequestCancelled {
            request_id: id.clone(),
        });
        entry.settle(Err(ParleyError::Cancelled {
            request_id: id.clone(),
        }));
        true
    }

    /// Cancel every pending request. Returns how many were cancelled.
    pub fn cancel_all_requests(&self) -> usize {
        let drained: Vec<(MessageId, PendingRequest)> =
            self.shared.lock().entries.drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            self.shared.emit(ProtocolEvent::RequestCancelled {
                request_id: id.clone(),
            });
            entry.settle(Err(ParleyError::Cancelled { request_id: id }));
        }
        if count > 0 {
            tracing::info!("Cancelled {} pending requests", count);
        }
        count
    }

    pub fn pending_request_count(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn has_pending_requests(&self) -> bool {
        !self.shared.lock().entries.is_empty()
    }

    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.shared.lock().entries.contains_key(id)
    }

    /// Retries spent so far by a pending request.
    pub fn retry_count(&self, id: &MessageId) -> Option<u32> {
        self.shared.lock().entries.get(id).map(|e| e.retries)
    }

    pub fn pending_request_ids(&self) -> Vec<MessageId> {
        self.shared.lock().entries.keys().cloned().collect()
    }

    pub fn pending_requests(&self) -> Vec<PendingRequestInfo> {
        self.shared
            .lock()
            .entries
            .values()
            .map(PendingRequest::info)
            .collect()
    }

    /// `Idle` when nothing is pending, else `Waiting`.
    pub fn state(&self) -> ProtocolState {
        if self.has_pending_requests() {
            ProtocolState::Waiting
        } else {
            ProtocolState::Idle
        }
    }
}

impl std::fmt::Debug for RequestResponseProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestResponseProtocol")
            .field("config", &self.shared.config)
            .field("pending", &self.pending_request_count())
            .finish()
    }
}

fn arm_deadline(
    shared: &Arc<Shared>,
    id: MessageId,
    generation: u64,
    timeout: Duration,
) -> TimerHandle {
    let weak = Arc::downgrade(shared);
    shared.scheduler.schedule(
        timeout,
        Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                setback(&shared, &id, Setback::Timeout, Some(generation));
            }
        }),
    )
}

fn arm_retry(shared: &Arc<Shared>, id: MessageId, generation: u64, delay: Duration) -> TimerHandle {
    let weak = Arc::downgrade(shared);
    shared.scheduler.schedule(
        delay,
        Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                rearm(&shared, &id, generation);
            }
        }),
    )
}

/// Retry delay elapsed: replace the delay timer with a fresh deadline.
fn rearm(shared: &Arc<Shared>, id: &MessageId, expected: u64) {
    let mut table = shared.lock();
    if table.entries.get(id).map(|e| e.generation) != Some(expected) {
        return;
    }
    let generation = table.next_generation();
    let Some(entry) = table.entries.get_mut(id) else {
        return;
    };
    entry.generation = generation;
    entry.timer = if entry.options.has_deadline() {
        Some(arm_deadline(shared, id.clone(), generation, entry.options.timeout))
    } else {
        None
    };
    tracing::debug!("Request {} deadline re-armed (attempt {})", id, entry.retries + 1);
}

/// Apply the retry policy after a timeout or failure reply.
///
/// `expected` is the generation of the firing timer; `None` for replies.
/// Returns false if no matching pending entry exists.
fn setback(shared: &Arc<Shared>, id: &MessageId, cause: Setback, expected: Option<u64>) -> bool {
    let mut table = shared.lock();
    let Some(entry) = table.entries.get(id) else {
        return false;
    };
    if expected.is_some_and(|g| g != entry.generation) {
        return false;
    }

    if entry.can_retry() {
        let generation = table.next_generation();
        let Some(entry) = table.entries.get_mut(id) else {
            return false;
        };
        entry.retries += 1;
        entry.generation = generation;
        let attempt = entry.retries;
        let conversation = entry.conversation.clone();
        let delay_timer = arm_retry(shared, id.clone(), generation, entry.options.retry_delay);
        let previous = entry.timer.replace(delay_timer);
        drop(table);
        if let Some(previous) = previous {
            previous.cancel();
        }

        let retry_cause = match &cause {
            Setback::Timeout => RetryCause::Timeout,
            Setback::Failure(reply) => {
                record_reply(&conversation, reply);
                RetryCause::Failure
            }
        };
        tracing::debug!("Request {} retry {} after {:?}", id, attempt, retry_cause);
        shared.emit(ProtocolEvent::RequestRetry {
            request_id: id.clone(),
            attempt,
            cause: retry_cause,
        });
        return true;
    }

    let Some(entry) = table.entries.remove(id) else {
        return false;
    };
    drop(table);

    let retries = entry.retries;
    match cause {
        Setback::Timeout => {
            tracing::warn!("Request {} timed out after {} retries", id, retries);
            shared.emit(ProtocolEvent::RequestTimeout {
                request_id: id.clone(),
                retries,
            });
            entry.settle(Err(ParleyError::RequestTimeout {
                request_id: id.clone(),
                retries,
            }));
        }
        Setback::Failure(reply) => {
            record_reply(&entry.conversation, &reply);
            let reason = failure_reason(&reply);
            tracing::warn!("Request {} failed after {} retries: {}", id, retries, reason);
            shared.emit(ProtocolEvent::RequestFailed {
                request_id: id.clone(),
                reason: reason.clone(),
            });
            entry.settle(Err(ParleyError::RequestFailed {
                request_id: id.clone(),
                retries,
                reason,
            }));
        }
    }
    true
}

/// Append a correlated reply to its conversation. The conversation enforces its
/// own lifecycle, so a refused append is logged and otherwise ignored.
fn record_reply(conversation: &Conversation, reply: &Message) {
    if conversation.contains_message(&reply.id) {
        return;
    }
    if let Err(e) = conversation.add_message(reply.clone()) {
        tracing::warn!(
            "Reply {} not recorded in conversation {}: {}",
            reply.id,
            conversation.id(),
            e
        );
    }
}

fn failure_reason(reply: &Message) -> String {
    match &reply.content {
        serde_json::Value::Null => "failure reply".to_string(),
        serde_json::Value::String(reason) => reason.clone(),
        serde_json::Value::Object(map) => map
            .get("reason")
            .or_else(|| map.get("error"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| reply.content.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{
        ConversationOptions, ConversationState, ErrorKind, ManualScheduler, TokioScheduler,
    };

    struct Harness {
        clock: ManualScheduler,
        protocol: RequestResponseProtocol,
        conversation: Conversation,
    }

    fn harness() -> Harness {
        let clock = ManualScheduler::new();
        let scheduler: Arc<dyn Scheduler> = Arc::new(clock.clone());
        let protocol = RequestResponseProtocol::with_scheduler(scheduler.clone());
        let conversation =
            Conversation::new(["alice", "bob"], "alice", ConversationOptions::new(), scheduler)
                .unwrap();
        conversation.activate().unwrap();
        Harness {
            clock,
            protocol,
            conversation,
        }
    }

    fn request(conversation: &Conversation) -> Message {
        Message::builder("alice", ["bob"], Performative::Request)
            .conversation_id(conversation.id().clone())
            .content(serde_json::json!({"action": "quote"}))
            .build()
            .unwrap()
    }

    fn drain(events: &mut broadcast::Receiver<ProtocolEvent>) -> Vec<ProtocolEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn rejects_non_request_performative() {
        let h = harness();
        let inform = Message::new("alice", ["bob"], "inform", serde_json::Value::Null).unwrap();
        let err = h
            .protocol
            .initiate_request(inform, &h.conversation, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(h.protocol.state(), ProtocolState::Idle);
    }

    #[test]
    fn rejects_duplicate_pending_id() {
        let h = harness();
        let req = request(&h.conversation);
        let _first = h
            .protocol
            .initiate_request(req.clone(), &h.conversation, None)
            .unwrap();
        let err = h
            .protocol
            .initiate_request(req, &h.conversation, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(h.protocol.pending_request_count(), 1);
    }

    #[tokio::test]
    async fn inform_resolves_request() {
        let h = harness();
        let mut events = h.protocol.subscribe();
        let req = request(&h.conversation);
        let future = h
            .protocol
            .initiate_request(req.clone(), &h.conversation, None)
            .unwrap();
        assert_eq!(h.protocol.state(), ProtocolState::Waiting);
        assert_eq!(h.clock.pending(), 1);

        let reply = req.reply(Performative::Inform, serde_json::json!({"price": 10})).unwrap();
        assert!(h.protocol.handle_message(reply.clone()));

        assert_eq!(future.await.unwrap(), reply);
        assert_eq!(h.protocol.state(), ProtocolState::Idle);
        assert_eq!(h.clock.pending(), 0);
        assert_eq!(h.conversation.messages(), vec![req.clone(), reply.clone()]);

        let events = drain(&mut events);
        assert!(matches!(&events[0], ProtocolEvent::RequestInitiated { request_id, .. } if *request_id == req.id));
        assert!(matches!(&events[1], ProtocolEvent::ResponseReceived { response, .. } if *response == reply));
    }

    #[tokio::test]
    async fn failures_are_retried_until_inform() {
        let h = harness();
        let mut events = h.protocol.subscribe();
        let req = request(&h.conversation);
        let options = RequestOptions::with_timeout(ms(1000)).retries(2, ms(10));
        let future = h
            .protocol
            .initiate_request(req.clone(), &h.conversation, Some(options))
            .unwrap();

        for round in 1..=2 {
            let failure = req.reply(Performative::Failure, serde_json::json!("busy")).unwrap();
            assert!(h.protocol.handle_message(failure));
            assert_eq!(h.protocol.retry_count(&req.id), Some(round));
            assert_eq!(h.clock.pending(), 1);
            h.clock.advance(ms(10));
            assert_eq!(h.clock.pending(), 1);
        }

        let inform = req.reply(Performative::Inform, serde_json::json!("done")).unwrap();
        assert!(h.protocol.handle_message(inform.clone()));
        assert_eq!(future.await.unwrap(), inform);

        let retries: Vec<u32> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                ProtocolEvent::RequestRetry { attempt, cause, .. } => {
                    assert_eq!(cause, RetryCause::Failure);
                    Some(attempt)
                }
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![1, 2]);
        assert_eq!(h.clock.pending(), 0);
        assert_eq!(h.conversation.message_count(), 4);
    }

    #[tokio::test]
    async fn timeout_without_retries_rejects() {
        let h = harness();
        let req = request(&h.conversation);
        let future = h
            .protocol
            .initiate_request(req.clone(), &h.conversation, Some(RequestOptions::with_timeout(ms(50))))
            .unwrap();

        h.clock.advance(ms(49));
        assert!(h.protocol.is_pending(&req.id));

        h.clock.advance(ms(1));
        assert!(!h.protocol.is_pending(&req.id));

        let err = future.await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RequestTimeout);
        assert!(matches!(err, ParleyError::RequestTimeout { retries: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_at_deadline_on_real_clock() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new());
        let protocol = RequestResponseProtocol::with_scheduler(scheduler.clone());
        let conversation =
            Conversation::new(["alice", "bob"], "alice", ConversationOptions::new(), scheduler)
                .unwrap();
        let req = request(&conversation);

        let start = tokio::time::Instant::now();
        let future = protocol
            .initiate_request(req, &conversation, Some(RequestOptions::with_timeout(ms(50))))
            .unwrap();
        let err = future.await.unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(err.kind(), ErrorKind::RequestTimeout);
        assert!(elapsed >= ms(50) && elapsed < ms(60), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn timeouts_consume_retry_budget() {
        let h = harness();
        let mut events = h.protocol.subscribe();
        let req = request(&h.conversation);
        let options = RequestOptions::with_timeout(ms(50)).retries(1, ms(10));
        let future = h
            .protocol
            .initiate_request(req.clone(), &h.conversation, Some(options))
            .unwrap();

        h.clock.advance(ms(50));
        assert_eq!(h.protocol.retry_count(&req.id), Some(1));
        h.clock.advance(ms(10 + 49));
        assert!(h.protocol.is_pending(&req.id));
        h.clock.advance(ms(1));

        assert_eq!(future.await.unwrap_err().kind(), ErrorKind::RequestTimeout);
        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            ProtocolEvent::RequestRetry { attempt: 1, cause: RetryCause::Timeout, .. }
        )));
        assert!(matches!(
            events.last(),
            Some(ProtocolEvent::RequestTimeout { retries: 1, .. })
        ));
        assert_eq!(h.clock.pending(), 0);
        // Retrying never resends: the log still holds the single request.
        assert_eq!(h.conversation.messages(), vec![req]);
    }

    #[tokio::test]
    async fn failure_after_budget_rejects() {
        let h = harness();
        let req = request(&h.conversation);
        let future = h
            .protocol
            .initiate_request(req.clone(), &h.conversation, Some(RequestOptions::with_timeout(ms(50))))
            .unwrap();

        let failure = req
            .reply(Performative::Failure, serde_json::json!({"reason": "out of stock"}))
            .unwrap();
        assert!(h.protocol.handle_message(failure));

        match future.await.unwrap_err() {
            ParleyError::RequestFailed { reason, retries, .. } => {
                assert_eq!(reason, "out of stock");
                assert_eq!(retries, 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(h.clock.pending(), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let h = harness();
        let mut events = h.protocol.subscribe();
        let req = request(&h.conversation);
        let future = h
            .protocol
            .initiate_request(req.clone(), &h.conversation, None)
            .unwrap();

        assert!(h.protocol.cancel_request(&req.id));
        assert!(!h.protocol.cancel_request(&req.id));
        assert_eq!(future.await.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(h.clock.pending(), 0);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, ProtocolEvent::RequestCancelled { .. })));

        let answered = request(&h.conversation);
        let future = h
            .protocol
            .initiate_request(answered.clone(), &h.conversation, None)
            .unwrap();
        h.protocol
            .handle_message(answered.reply(Performative::Inform, serde_json::Value::Null).unwrap());
        future.await.unwrap();
        assert!(!h.protocol.cancel_request(&answered.id));
    }

    #[tokio::test]
    async fn cancel_all_requests_settles_everything() {
        let h = harness();
        let futures: Vec<_> = (0..3)
            .map(|_| {
                h.protocol
                    .initiate_request(request(&h.conversation), &h.conversation, None)
                    .unwrap()
            })
            .collect();
        assert_eq!(h.protocol.pending_request_count(), 3);

        assert_eq!(h.protocol.cancel_all_requests(), 3);
        assert!(!h.protocol.has_pending_requests());
        assert_eq!(h.clock.pending(), 0);
        for future in futures {
            assert_eq!(future.await.unwrap_err().kind(), ErrorKind::Cancelled);
        }
        assert_eq!(h.protocol.cancel_all_requests(), 0);
    }

    #[test]
    fn unmatched_and_late_replies_are_dropped() {
        let h = harness();
        let mut events = h.protocol.subscribe();
        let req = request(&h.conversation);

        let stray = req.reply(Performative::Inform, serde_json::Value::Null).unwrap();
        assert!(!h.protocol.handle_message(stray));

        let _future = h
            .protocol
            .initiate_request(req.clone(), &h.conversation, Some(RequestOptions::with_timeout(ms(5))))
            .unwrap();
        h.clock.advance(ms(5));
        let late = req.reply(Performative::Failure, serde_json::Value::Null).unwrap();
        assert!(!h.protocol.handle_message(late));

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ProtocolEvent::RequestTimeout { .. }));
    }

    #[test]
    fn inbound_request_is_announced() {
        let h = harness();
        let mut events = h.protocol.subscribe();
        let inbound = Message::builder("bob", ["alice"], Performative::Request)
            .build()
            .unwrap();

        assert!(!h.protocol.handle_message(inbound.clone()));
        assert_eq!(
            drain(&mut events),
            vec![ProtocolEvent::RequestReceived { message: inbound }]
        );
        assert_eq!(h.protocol.pending_request_count(), 0);
    }

    #[tokio::test]
    async fn no_deadline_waits_for_reply() {
        let h = harness();
        let req = request(&h.conversation);
        let future = h
            .protocol
            .initiate_request(
                req.clone(),
                &h.conversation,
                Some(RequestOptions::default().without_timeout()),
            )
            .unwrap();
        assert_eq!(h.clock.pending(), 0);

        h.clock.advance(Duration::from_secs(3600));
        assert!(h.protocol.is_pending(&req.id));

        let reply = req.reply(Performative::Inform, serde_json::Value::Null).unwrap();
        h.protocol.handle_message(reply.clone());
        assert_eq!(future.await.unwrap(), reply);
    }

    #[tokio::test]
    async fn dropping_protocol_cancels_requests() {
        let h = harness();
        let future = h
            .protocol
            .initiate_request(request(&h.conversation), &h.conversation, None)
            .unwrap();
        drop(h.protocol);

        assert_eq!(future.await.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(h.clock.pending(), 0);
    }

    #[test]
    fn request_into_closed_conversation_is_refused() {
        let h = harness();
        h.conversation.complete(None).unwrap();
        let err = h
            .protocol
            .initiate_request(request(&h.conversation), &h.conversation, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(h.conversation.state(), ConversationState::Completed);
        assert!(!h.protocol.has_pending_requests());
    }

    #[test]
    fn pending_request_introspection() {
        let h = harness();
        let req = request(&h.conversation);
        let _future = h
            .protocol
            .initiate_request(req.clone(), &h.conversation, None)
            .unwrap();

        assert_eq!(h.protocol.pending_request_ids(), vec![req.id.clone()]);
        let info = &h.protocol.pending_requests()[0];
        assert_eq!(info.id, req.id);
        assert_eq!(&info.conversation_id, h.conversation.id());
        assert_eq!(info.receivers, vec!["bob".to_string()]);
        assert_eq!(info.max_retries, RequestOptions::default().max_retries);
    }
}
