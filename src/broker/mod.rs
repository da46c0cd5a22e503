//! # Broker Abstraction
//!
//! This module defines the seams between the dispatch core and the message broker.
//!
//! ## Key Types
//!
//! - [`Broker`]: dials a new connection.
//! - [`BrokerConnection`]: registers a closure sink and opens channels.
//! - [`BrokerChannel`]: declares the [`Topology`] and opens auto-ack subscriptions.
//! - [`CloseNotice`]: what the supervisor receives when a connection ends.
//! - [`BrokerError`]: connectivity and topology failures.
//!
//! The production implementation lives in [`amqp`]; [`crate::mock`] provides a scripted
//! broker for tests.

pub mod amqp;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

// =============================================================================
// 1. WIRE CONTRACT
// =============================================================================

/// Exchange every order event is published to.
pub const EXCHANGE: &str = "robot-shop";
/// Durable queue the dispatcher drains.
pub const QUEUE: &str = "orders";
/// Routing key binding [`QUEUE`] to [`EXCHANGE`].
pub const ROUTING_KEY: &str = "orders";

/// The exchange/queue/binding triple that must exist before messages can be consumed.
///
/// The exchange is always `direct` and durable, the queue is always durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            exchange: EXCHANGE.to_string(),
            queue: QUEUE.to_string(),
            routing_key: ROUTING_KEY.to_string(),
        }
    }
}

/// A single message taken off the queue.
///
/// Headers are rendered to strings for logging only; nothing in the pipeline interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Stream of deliveries for one subscription. It ends when the channel or connection closes.
pub type Deliveries = BoxStream<'static, Delivery>;

// =============================================================================
// 2. CLOSURE NOTIFICATIONS
// =============================================================================

/// Notification fed to the connection supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseNotice {
    /// Intentional shutdown. The supervisor stops for good.
    Shutdown,
    /// The connection went away unexpectedly. The supervisor reconnects.
    Dropped(String),
}

/// Sending half of the closure-notification channel.
///
/// Unbounded because broker client callbacks are synchronous.
pub type CloseSender = mpsc::UnboundedSender<CloseNotice>;

// =============================================================================
// 3. ERRORS
// =============================================================================

/// Failures reported by a broker implementation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Failed to connect: {0}")]
    Connect(String),
    #[error("Failed to create channel: {0}")]
    Channel(String),
    #[error("Failed to create exchange {exchange}: {reason}")]
    ExchangeDeclare { exchange: String, reason: String },
    #[error("Failed to create queue {queue}: {reason}")]
    QueueDeclare { queue: String, reason: String },
    #[error("Failed to bind queue {queue}: {reason}")]
    QueueBind { queue: String, reason: String },
    #[error("Failed to consume from {queue}: {reason}")]
    Consume { queue: String, reason: String },
}

// =============================================================================
// 4. THE ABSTRACTION
// =============================================================================

/// Something that can dial a broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Connection: BrokerConnection;

    /// Makes a single connection attempt. Retrying is the caller's job.
    async fn dial(&self) -> Result<Self::Connection, BrokerError>;
}

/// A live broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    /// Routes a [`CloseNotice::Dropped`] into `sink` when this connection fails.
    fn notify_close(&self, sink: CloseSender);

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;
}

/// A channel on which topology is declared and subscriptions are opened.
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    async fn declare_exchange(&self, topology: &Topology) -> Result<(), BrokerError>;

    async fn declare_queue(&self, topology: &Topology) -> Result<(), BrokerError>;

    async fn bind_queue(&self, topology: &Topology) -> Result<(), BrokerError>;

    /// Opens an auto-ack subscription: the broker forgets each message as soon as it is sent.
    async fn consume(&self, queue: &str) -> Result<Deliveries, BrokerError>;
}

/// The channel type produced by a [`Broker`].
pub type ChannelOf<B> = <<B as Broker>::Connection as BrokerConnection>::Channel;

/// Declares exchange, queue and binding, in that order.
pub async fn declare_topology<C: BrokerChannel>(
    channel: &C,
    topology: &Topology,
) -> Result<(), BrokerError> {
    channel.declare_exchange(topology).await?;
    channel.declare_queue(topology).await?;
    channel.bind_queue(topology).await
}
