// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::event::{Event, EventBuilder, EventPriority, EventSource};

/// Error returned by [`Gateway::submit_for_response`] and delivered through
/// a response future when the agent invocation itself fails.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("queue is full")]
    QueueFull,
    #[error("gateway is not running")]
    NotRunning,
    #[error("agent invocation failed: {0}")]
    Agent(#[from] anyhow::Error),
}

/// Decouples the gateway from `vigil-core::Agent` so this crate has no
/// dependency on the agent loop itself.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn invoke(&self, event: &Event) -> anyhow::Result<String>;
}

/// Callback invoked with the outcome of a background event (one with no
/// response future attached). Registered per-source via
/// [`Gateway::set_response_handler`], or as the catch-all default.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle(&self, event: &Event, response: Result<String, GatewayError>);
}

#[async_trait]
impl<F> ResponseHandler for F
where
    F: Fn(&Event, Result<String, GatewayError>) + Send + Sync,
{
    async fn handle(&self, event: &Event, response: Result<String, GatewayError>) {
        (self)(event, response)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_queue_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { max_queue_size: 1024 }
    }
}

struct QueuedEvent {
    event: Event,
    priority: EventPriority,
    seq: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedEvent {}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so HIGH (ordinal 0) and the
        // lowest seq come out first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Queue {
    heap: BinaryHeap<QueuedEvent>,
}

/// Single-consumer priority event queue in front of an [`AgentHandler`].
/// All submissions funnel through one serialized consumer task, so the
/// agent never sees concurrent invocations.
pub struct Gateway {
    handler: Arc<dyn AgentHandler>,
    config: GatewayConfig,
    queue: Arc<Mutex<Queue>>,
    notify: Arc<Notify>,
    seq: AtomicU64,
    handlers: Arc<Mutex<HashMap<Option<EventSource>, Arc<dyn ResponseHandler>>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(handler: Arc<dyn AgentHandler>, config: GatewayConfig) -> Arc<Self> {
        Arc::new(Self {
            handler,
            config,
            queue: Arc::new(Mutex::new(Queue { heap: BinaryHeap::new() })),
            notify: Arc::new(Notify::new()),
            seq: AtomicU64::new(0),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            consumer: Mutex::new(None),
        })
    }

    /// Register the handler invoked for background (no-future) events.
    /// `source = None` registers the catch-all default used when no
    /// source-specific handler is set.
    pub async fn set_response_handler(
        &self,
        handler: Arc<dyn ResponseHandler>,
        source: Option<EventSource>,
    ) {
        self.handlers.lock().await.insert(source, handler);
    }

    /// Idempotent: a second call while already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.consumer.lock().await;
        if guard.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(async move { this.run_consumer().await }));
    }

    /// Idempotent: stopping a gateway that isn't running is a no-op.
    pub async fn stop(&self) {
        let mut guard = self.consumer.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }

    async fn is_running(&self) -> bool {
        self.consumer.lock().await.is_some()
    }

    /// Submit a message event and await the agent's reply.
    pub async fn submit_for_response(
        self: &Arc<Self>,
        builder: EventBuilder,
    ) -> Result<String, GatewayError> {
        if !self.is_running().await {
            return Err(GatewayError::NotRunning);
        }
        let (event, rx) = builder.with_future().build();
        self.enqueue(event).await?;
        match rx {
            Some(rx) => rx.await.unwrap_or(Err(GatewayError::NotRunning)),
            None => unreachable!("with_future always attaches a receiver"),
        }
    }

    /// Fire-and-forget submission (heartbeats, scheduled jobs). On overflow
    /// the event is silently dropped with a warning rather than raising,
    /// matching the background-event contract.
    pub fn submit(self: &Arc<Self>, builder: EventBuilder) {
        let (event, _rx) = builder.build();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(GatewayError::QueueFull) = this.enqueue(event).await {
                tracing::warn!("gateway queue full, dropping event");
            }
        });
    }

    async fn enqueue(&self, mut event: Event) -> Result<(), GatewayError> {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let priority = event.priority;
        let mut queue = self.queue.lock().await;
        if queue.heap.len() >= self.config.max_queue_size {
            drop(queue);
            if let Some(tx) = event.response_tx.take() {
                let _ = tx.send(Err(GatewayError::QueueFull));
            }
            return Err(GatewayError::QueueFull);
        }
        queue.heap.push(QueuedEvent { event, priority, seq });
        drop(queue);
        self.notify.notify_one();
        Ok(())
    }

    async fn run_consumer(self: Arc<Self>) {
        loop {
            let queued = loop {
                let mut queue = self.queue.lock().await;
                if let Some(q) = queue.heap.pop() {
                    break q;
                }
                drop(queue);
                self.notify.notified().await;
            };
            let QueuedEvent { mut event, .. } = queued;
            let result = self.handler.invoke(&event).await.map_err(GatewayError::from);
            if let Some(tx) = event.response_tx.take() {
                let _ = tx.send(result);
            } else {
                let handlers = self.handlers.lock().await;
                let handler = handlers
                    .get(&Some(event.source))
                    .or_else(|| handlers.get(&None))
                    .cloned();
                drop(handlers);
                if let Some(handler) = handler {
                    handler.handle(&event, result).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AO};
    use std::time::Duration;
    use tokio::sync::Mutex as TMutex;

    struct EchoHandler;
    #[async_trait]
    impl AgentHandler for EchoHandler {
        async fn invoke(&self, event: &Event) -> anyhow::Result<String> {
            Ok(format!("echo:{}", event.message))
        }
    }

    struct FailingHandler;
    #[async_trait]
    impl AgentHandler for FailingHandler {
        async fn invoke(&self, _event: &Event) -> anyhow::Result<String> {
            anyhow::bail!("boom")
        }
    }

    struct OrderedHandler {
        order: Arc<TMutex<Vec<String>>>,
        delay: Duration,
    }
    #[async_trait]
    impl AgentHandler for OrderedHandler {
        async fn invoke(&self, event: &Event) -> anyhow::Result<String> {
            tokio::time::sleep(self.delay).await;
            self.order.lock().await.push(event.message.clone());
            Ok(event.message.clone())
        }
    }

    #[tokio::test]
    async fn message_future_resolves_to_agent_result() {
        let gw = Gateway::new(Arc::new(EchoHandler), GatewayConfig::default());
        gw.start().await;
        let out = gw
            .submit_for_response(EventBuilder::new(EventSource::Message, "hi"))
            .await
            .unwrap();
        assert_eq!(out, "echo:hi");
        gw.stop().await;
    }

    #[tokio::test]
    async fn heartbeat_invokes_response_handler() {
        let gw = Gateway::new(Arc::new(EchoHandler), GatewayConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        gw.set_response_handler(
            Arc::new(move |_e: &Event, r: Result<String, GatewayError>| {
                if r.is_ok() {
                    seen2.fetch_add(1, AO::SeqCst);
                }
            }),
            Some(EventSource::Heartbeat),
        )
        .await;
        gw.start().await;
        gw.submit(EventBuilder::new(EventSource::Heartbeat, "tick"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(AO::SeqCst), 1);
        gw.stop().await;
    }

    #[tokio::test]
    async fn default_handler_used_when_no_source_specific_one() {
        let gw = Gateway::new(Arc::new(EchoHandler), GatewayConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        gw.set_response_handler(
            Arc::new(move |_e: &Event, _r: Result<String, GatewayError>| {
                seen2.fetch_add(1, AO::SeqCst);
            }),
            None,
        )
        .await;
        gw.start().await;
        gw.submit(EventBuilder::new(EventSource::Scheduled, "job"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(AO::SeqCst), 1);
        gw.stop().await;
    }

    #[tokio::test]
    async fn high_priority_processed_before_low_when_queued_together() {
        let order = Arc::new(TMutex::new(Vec::new()));
        let gw = Gateway::new(
            Arc::new(OrderedHandler { order: Arc::clone(&order), delay: Duration::from_millis(10) }),
            GatewayConfig::default(),
        );
        // enqueue both directly before starting the consumer so ordering is deterministic
        gw.enqueue(EventBuilder::new(EventSource::Heartbeat, "hb").priority(EventPriority::Low).build().0)
            .await
            .unwrap();
        gw.enqueue(EventBuilder::new(EventSource::Message, "msg").priority(EventPriority::High).build().0)
            .await
            .unwrap();
        gw.start().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let seen = order.lock().await.clone();
        assert_eq!(seen, vec!["msg".to_string(), "hb".to_string()]);
        gw.stop().await;
    }

    #[tokio::test]
    async fn queue_full_rejects_future_submission() {
        let gw = Gateway::new(
            Arc::new(OrderedHandler {
                order: Arc::new(TMutex::new(Vec::new())),
                delay: Duration::from_millis(200),
            }),
            GatewayConfig { max_queue_size: 1 },
        );
        gw.start().await;
        // first occupies the consumer, second fills the 1-slot queue
        gw.submit(EventBuilder::new(EventSource::Heartbeat, "first"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        gw.submit(EventBuilder::new(EventSource::Heartbeat, "fill"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = gw
            .submit_for_response(EventBuilder::new(EventSource::Message, "overflow"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::QueueFull));
        gw.stop().await;
    }

    #[tokio::test]
    async fn agent_error_resolves_future_without_killing_consumer() {
        let gw = Gateway::new(Arc::new(FailingHandler), GatewayConfig::default());
        gw.start().await;
        let err = gw
            .submit_for_response(EventBuilder::new(EventSource::Message, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Agent(_)));
        // consumer must still be alive for the next event
        let err2 = gw
            .submit_for_response(EventBuilder::new(EventSource::Message, "y"))
            .await
            .unwrap_err();
        assert!(matches!(err2, GatewayError::Agent(_)));
        gw.stop().await;
    }

    #[tokio::test]
    async fn start_stop_is_idempotent() {
        let gw = Gateway::new(Arc::new(EchoHandler), GatewayConfig::default());
        gw.start().await;
        gw.start().await; // no-op, doesn't spawn a second consumer
        gw.stop().await;
        gw.stop().await; // no-op
        assert!(gw.consumer.lock().await.is_none());
    }
}
