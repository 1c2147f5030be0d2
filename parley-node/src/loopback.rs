//! In-memory loopback transport and the demo exchange.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use parley_core::{
    ConversationContext, ConversationOptions, Message, MessageId, ParleyError, ParleyResult,
    Performative, Scheduler, TokioScheduler,
};
use parley_protocol::{
    ConversationRegistry, ProtocolConfig, ProtocolEvent, RequestResponseProtocol,
};

use crate::config::NodeConfig;

/// Delivers messages to per-agent mailboxes.
#[derive(Default)]
pub struct LoopbackRouter {
    mailboxes: HashMap<String, mpsc::UnboundedSender<Message>>,
}

impl LoopbackRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mailbox for `agent`.
    pub fn register(&mut self, agent: impl Into<String>) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.insert(agent.into(), tx);
        rx
    }

    /// Deliver a copy of `message` to every receiver.
    pub fn deliver(&self, message: &Message) -> ParleyResult<()> {
        for receiver in &message.receivers {
            let mailbox = self.mailboxes.get(receiver).ok_or_else(|| {
                ParleyError::InvalidArgument(format!("no mailbox for agent {}", receiver))
            })?;
            if mailbox.send(message.clone()).is_err() {
                tracing::warn!("Mailbox of {} is closed, dropping {}", receiver, message.id);
            }
        }
        Ok(())
    }
}

/// Outcome of one request/response exchange.
#[derive(Debug)]
pub struct ExchangeReport {
    pub request_id: MessageId,
    pub outcome: ParleyResult<Message>,
    pub retries: u32,
    pub conversation: ConversationContext,
}

/// Answer every request with `failures` failure replies and then an inform,
/// `latency` apart. A silent responder swallows requests.
async fn run_responder(
    mut inbox: mpsc::UnboundedReceiver<Message>,
    router: Arc<LoopbackRouter>,
    failures: u32,
    latency: Duration,
    silent: bool,
) {
    while let Some(request) = inbox.recv().await {
        if request.performative != Performative::Request || silent {
            tracing::debug!("Responder ignoring {} {}", request.performative, request.id);
            continue;
        }
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            for attempt in 1..=failures {
                tokio::time::sleep(latency).await;
                let content = serde_json::json!({"reason": format!("busy (attempt {})", attempt)});
                send_reply(&router, &request, Performative::Failure, content);
            }
            tokio::time::sleep(latency).await;
            let content = serde_json::json!({"item": request.content["item"], "price": 42});
            send_reply(&router, &request, Performative::Inform, content);
        });
    }
}

fn send_reply(
    router: &LoopbackRouter,
    request: &Message,
    performative: Performative,
    content: serde_json::Value,
) {
    let delivered = request
        .reply(performative, content)
        .and_then(|reply| router.deliver(&reply));
    if let Err(e) = delivered {
        tracing::error!("Reply to {} not delivered: {}", request.id, e);
    }
}

/// Feed the requester's mailbox into the protocol; anything the protocol does
/// not correlate goes to the conversation it names.
async fn pump_inbox(
    mut inbox: mpsc::UnboundedReceiver<Message>,
    protocol: RequestResponseProtocol,
    registry: Arc<ConversationRegistry>,
) {
    while let Some(message) = inbox.recv().await {
        if protocol.handle_message(message.clone()) {
            continue;
        }
        if message.conversation_id.is_some() {
            if let Err(e) = registry.route(message) {
                tracing::debug!("Uncorrelated message not recorded: {}", e);
            }
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<ProtocolEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::info!("Protocol event: {:?}", event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event log lagged, {} events skipped", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Run one request/response exchange between the configured agents.
pub async fn run_exchange(config: &NodeConfig) -> ParleyResult<ExchangeReport> {
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new());
    let registry = Arc::new(ConversationRegistry::new(Arc::clone(&scheduler)));
    let protocol = RequestResponseProtocol::new(
        ProtocolConfig::default().with_request_options(config.request),
        scheduler,
    );
    let mut retry_events = protocol.subscribe();

    let mut router = LoopbackRouter::new();
    let requester_inbox = router.register(config.requester.clone());
    let responder_inbox = router.register(config.responder.clone());
    let router = Arc::new(router);

    let tasks = [
        tokio::spawn(log_events(protocol.subscribe())),
        tokio::spawn(run_responder(
            responder_inbox,
            Arc::clone(&router),
            config.failures,
            config.reply_latency,
            config.silent,
        )),
        tokio::spawn(pump_inbox(
            requester_inbox,
            protocol.clone(),
            Arc::clone(&registry),
        )),
    ];

    let conversation = registry.create(
        [&config.requester, &config.responder],
        &config.requester,
        ConversationOptions::new()
            .with_timeout(config.conversation_timeout)
            .with_metadata("topic", serde_json::json!("quote")),
    )?;
    conversation.activate()?;

    let request = Message::builder(&config.requester, [&config.responder], Performative::Request)
        .conversation_id(conversation.id().clone())
        .content(serde_json::json!({"action": "quote", "item": "widget"}))
        .build()?;
    let request_id = request.id.clone();

    let reply = protocol.initiate_request(request.clone(), &conversation, None)?;
    router.deliver(&request)?;
    conversation.set_waiting()?;

    let outcome = reply.await;
    let closed = match &outcome {
        Ok(reply) => conversation.complete(Some(reply.content.clone())),
        Err(e) => conversation.fail(e.to_string()),
    };
    if let Err(e) = closed {
        tracing::warn!("Conversation {} already closed: {}", conversation.id(), e);
    }

    let retries = std::iter::from_fn(|| retry_events.try_recv().ok())
        .filter(|e| matches!(e, ProtocolEvent::RequestRetry { request_id: id, .. } if *id == request_id))
        .count() as u32;

    for task in tasks {
        task.abort();
    }
    registry.purge_terminal();

    Ok(ExchangeReport {
        request_id,
        outcome,
        retries,
        conversation: conversation.to_context(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ConversationState, ErrorKind};
    use parley_protocol::RequestOptions;

    fn config(failures: u32, retries: u32) -> NodeConfig {
        NodeConfig {
            request: RequestOptions::with_timeout(Duration::from_millis(500))
                .retries(retries, Duration::from_millis(10)),
            failures,
            reply_latency: Duration::from_millis(5),
            ..NodeConfig::default()
        }
    }

    #[test]
    fn router_rejects_unknown_agent() {
        let mut router = LoopbackRouter::new();
        let _inbox = router.register("buyer");
        let msg = Message::new("buyer", ["ghost"], "inform", serde_json::Value::Null).unwrap();
        assert_eq!(router.deliver(&msg).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn router_delivers_to_every_receiver() {
        let mut router = LoopbackRouter::new();
        let mut a = router.register("a");
        let mut b = router.register("b");
        let msg = Message::new("x", ["a", "b"], "inform", serde_json::Value::Null).unwrap();

        router.deliver(&msg).unwrap();
        assert_eq!(a.recv().await.unwrap(), msg);
        assert_eq!(b.recv().await.unwrap(), msg);
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_survives_failures_within_budget() {
        let report = run_exchange(&config(2, 2)).await.unwrap();

        let reply = report.outcome.unwrap();
        assert_eq!(reply.performative, Performative::Inform);
        assert_eq!(reply.in_reply_to, Some(report.request_id.clone()));
        assert_eq!(report.retries, 2);
        assert_eq!(report.conversation.state, ConversationState::Completed);
        assert_eq!(report.conversation.messages.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_fails_when_budget_is_spent() {
        let report = run_exchange(&config(3, 1)).await.unwrap();

        assert_eq!(report.outcome.unwrap_err().kind(), ErrorKind::RequestFailed);
        assert_eq!(report.retries, 1);
        assert_eq!(report.conversation.state, ConversationState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_responder_times_out() {
        let mut cfg = config(0, 0);
        cfg.silent = true;
        let report = run_exchange(&cfg).await.unwrap();

        assert_eq!(report.outcome.unwrap_err().kind(), ErrorKind::RequestTimeout);
        assert_eq!(report.conversation.state, ConversationState::Failed);
        assert_eq!(report.conversation.messages.len(), 1);
    }
}
