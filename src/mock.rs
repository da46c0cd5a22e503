//! # Test Doubles
//!
//! In-memory stand-ins for the broker, the store and the fatal hook, so the supervisor,
//! consumer and processor can be exercised without RabbitMQ or MongoDB.
//!
//! | Double | Replaces | Lets you |
//! |--------|----------|----------|
//! | [`MockBroker`] | [`AmqpBroker`](crate::broker::amqp::AmqpBroker) | fail dials, fail a topology step, publish deliveries, drop the connection |
//! | [`MemoryStore`] | [`MongoStore`](crate::store::MongoStore) | inspect stored documents, fail writes |
//! | [`RecordingFatal`] | [`ExitProcess`](crate::fatal::ExitProcess) | assert on fatal conditions instead of exiting |
//!
//! ## Example
//!
//! ```rust
//! use order_dispatch::broker::{Broker, BrokerConnection, Topology};
//! use order_dispatch::mock::{BrokerEvent, MockBroker};
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = MockBroker::new();
//!     broker.fail_next_dials(1);
//!
//!     assert!(broker.dial().await.is_err());
//!     let connection = broker.dial().await.unwrap();
//!     let channel = connection.open_channel().await.unwrap();
//!     order_dispatch::broker::declare_topology(&channel, &Topology::default()).await.unwrap();
//!
//!     assert_eq!(broker.dial_count(), 2);
//!     assert!(broker.events().contains(&BrokerEvent::QueueBound { channel: 1 }));
//! }
//! ```

use crate::broker::{
    Broker, BrokerChannel, BrokerConnection, BrokerError, CloseNotice, CloseSender, Deliveries,
    Delivery, Topology,
};
use crate::fatal::{Fatal, FatalHook};
use crate::model::{OrderDocument, PRIMARY_KEY_FIELD};
use crate::store::{OrderStore, StoreError};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// 1. BROKER
// =============================================================================

/// Everything the mock broker was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    DialFailed { attempt: u32 },
    Connected { connection: u32 },
    CloseSinkRegistered { connection: u32 },
    ChannelOpened { connection: u32, channel: u32 },
    ExchangeDeclared { channel: u32 },
    QueueDeclared { channel: u32 },
    QueueBound { channel: u32 },
    Subscribed { channel: u32 },
}

/// Topology step the mock broker can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailStep {
    OpenChannel,
    Exchange,
    Queue,
    Bind,
    Consume,
}

#[derive(Default)]
struct BrokerState {
    events: Vec<BrokerEvent>,
    dials: u32,
    connections: u32,
    channels: u32,
    failing_dials: u32,
    fail_step: Option<FailStep>,
    close_sink: Option<CloseSender>,
    subscription: Option<mpsc::UnboundedSender<Delivery>>,
}

/// Scripted broker. Clones share state.
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
    subscriptions: Arc<watch::Sender<u32>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        let (subscriptions, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            subscriptions: Arc::new(subscriptions),
        }
    }

    /// The next `count` dial attempts fail with a connect error.
    pub fn fail_next_dials(&self, count: u32) {
        lock(&self.state).failing_dials = count;
    }

    /// Every future attempt at `step` fails.
    pub fn fail_at(&self, step: FailStep) {
        lock(&self.state).fail_step = Some(step);
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        lock(&self.state).events.clone()
    }

    pub fn dial_count(&self) -> u32 {
        lock(&self.state).dials
    }

    /// Pushes a delivery into the current subscription. `false` if nobody is subscribed.
    pub fn publish(&self, delivery: Delivery) -> bool {
        lock(&self.state)
            .subscription
            .as_ref()
            .is_some_and(|sender| sender.send(delivery).is_ok())
    }

    /// Simulates the live connection dying: ends the subscription stream and notifies the
    /// registered closure sink.
    pub fn drop_connection(&self, reason: &str) {
        let mut state = lock(&self.state);
        state.subscription = None;
        if let Some(sink) = state.close_sink.take() {
            let _ = sink.send(CloseNotice::Dropped(reason.to_string()));
        }
    }

    /// Waits until at least `count` subscriptions have been opened in total.
    pub async fn wait_for_subscriptions(&self, count: u32) {
        let mut opened = self.subscriptions.subscribe();
        let _ = opened.wait_for(|opened| *opened >= count).await;
    }

    fn failing(&self, step: FailStep) -> bool {
        lock(&self.state).fail_step == Some(step)
    }

    fn record(&self, event: BrokerEvent) {
        lock(&self.state).events.push(event);
    }
}

#[async_trait]
impl Broker for MockBroker {
    type Connection = MockConnection;

    async fn dial(&self) -> Result<MockConnection, BrokerError> {
        let mut state = lock(&self.state);
        state.dials += 1;
        if state.failing_dials > 0 {
            state.failing_dials -= 1;
            let attempt = state.dials;
            state.events.push(BrokerEvent::DialFailed { attempt });
            return Err(BrokerError::Connect("connection refused".into()));
        }
        state.connections += 1;
        let id = state.connections;
        state.events.push(BrokerEvent::Connected { connection: id });
        Ok(MockConnection {
            id,
            broker: self.clone(),
        })
    }
}

pub struct MockConnection {
    id: u32,
    broker: MockBroker,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    type Channel = MockChannel;

    fn notify_close(&self, sink: CloseSender) {
        let mut state = lock(&self.broker.state);
        state.close_sink = Some(sink);
        state
            .events
            .push(BrokerEvent::CloseSinkRegistered { connection: self.id });
    }

    async fn open_channel(&self) -> Result<MockChannel, BrokerError> {
        if self.broker.failing(FailStep::OpenChannel) {
            return Err(BrokerError::Channel("channel limit reached".into()));
        }
        let mut state = lock(&self.broker.state);
        state.channels += 1;
        let id = state.channels;
        state.events.push(BrokerEvent::ChannelOpened {
            connection: self.id,
            channel: id,
        });
        Ok(MockChannel {
            id,
            broker: self.broker.clone(),
        })
    }
}

pub struct MockChannel {
    id: u32,
    broker: MockBroker,
}

impl MockChannel {
    pub fn id(&self) -> u32 {
        self.id
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_exchange(&self, topology: &Topology) -> Result<(), BrokerError> {
        if self.broker.failing(FailStep::Exchange) {
            return Err(BrokerError::ExchangeDeclare {
                exchange: topology.exchange.clone(),
                reason: "precondition failed".into(),
            });
        }
        self.broker
            .record(BrokerEvent::ExchangeDeclared { channel: self.id });
        Ok(())
    }

    async fn declare_queue(&self, topology: &Topology) -> Result<(), BrokerError> {
        if self.broker.failing(FailStep::Queue) {
            return Err(BrokerError::QueueDeclare {
                queue: topology.queue.clone(),
                reason: "precondition failed".into(),
            });
        }
        self.broker.record(BrokerEvent::QueueDeclared { channel: self.id });
        Ok(())
    }

    async fn bind_queue(&self, topology: &Topology) -> Result<(), BrokerError> {
        if self.broker.failing(FailStep::Bind) {
            return Err(BrokerError::QueueBind {
                queue: topology.queue.clone(),
                reason: "access refused".into(),
            });
        }
        self.broker.record(BrokerEvent::QueueBound { channel: self.id });
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Deliveries, BrokerError> {
        if self.broker.failing(FailStep::Consume) {
            return Err(BrokerError::Consume {
                queue: queue.to_string(),
                reason: "queue not found".into(),
            });
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut state = lock(&self.broker.state);
            state.subscription = Some(sender);
            state.events.push(BrokerEvent::Subscribed { channel: self.id });
        }
        self.broker.subscriptions.send_modify(|opened| *opened += 1);

        let deliveries = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (delivery, receiver))
        });
        Ok(deliveries.boxed())
    }
}

// =============================================================================
// 2. STORE
// =============================================================================

/// In-memory [`OrderStore`] keyed like the real one. Clones share state.
///
/// Keys are the typed `_id` value, so `"42"` and `42` are separate documents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<Mutex<HashMap<String, OrderDocument>>>,
    failing: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every upsert fails.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Looks up a document whose `_id` is the string `key`.
    pub fn get(&self, key: &str) -> Option<OrderDocument> {
        self.get_id(&Value::from(key))
    }

    pub fn get_id(&self, id: &Value) -> Option<OrderDocument> {
        lock(&self.documents).get(&id.to_string()).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.documents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful upserts, counting overwrites.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn upsert(&self, document: &OrderDocument) -> Result<String, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Write("server selection timeout".into()));
        }
        let id = document
            .get(PRIMARY_KEY_FIELD)
            .ok_or_else(|| StoreError::Encode(format!("missing {PRIMARY_KEY_FIELD}")))?;
        lock(&self.documents).insert(id.to_string(), document.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(document.key())
    }
}

// =============================================================================
// 3. FATAL HOOK
// =============================================================================

/// Records fatal conditions instead of exiting. Clones share state.
#[derive(Clone, Default)]
pub struct RecordingFatal {
    raised: Arc<Mutex<Vec<Fatal>>>,
}

impl RecordingFatal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raised(&self) -> Vec<Fatal> {
        lock(&self.raised).clone()
    }
}

impl FatalHook for RecordingFatal {
    fn trigger(&self, fatal: &Fatal) {
        lock(&self.raised).push(fatal.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_overwrites_by_key() {
        let store = MemoryStore::new();
        let first = OrderDocument::from_body(br#"{"orderid":"o1","item":"x"}"#).unwrap();
        let second = OrderDocument::from_body(br#"{"orderid":"o1","item":"y"}"#).unwrap();

        assert_eq!(store.upsert(&first).await.unwrap(), "o1");
        assert_eq!(store.upsert(&second).await.unwrap(), "o1");

        assert_eq!(store.len(), 1);
        assert_eq!(store.writes(), 2);
        assert_eq!(store.get("o1"), Some(second));
    }

    #[tokio::test]
    async fn memory_store_keeps_numeric_and_string_ids_apart() {
        let store = MemoryStore::new();
        let numeric = OrderDocument::from_body(br#"{"orderid":42}"#).unwrap();
        let text = OrderDocument::from_body(br#"{"orderid":"42"}"#).unwrap();

        store.upsert(&numeric).await.unwrap();
        store.upsert(&text).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get_id(&Value::from(42)), Some(numeric));
        assert_eq!(store.get("42"), Some(text));
    }

    #[tokio::test]
    async fn publish_without_subscription_is_refused() {
        let broker = MockBroker::new();
        assert!(!broker.publish(Delivery::new("{}")));
    }
}
