//! RabbitMQ implementation of the broker traits, built on `lapin`.
//!
//! Connections use `lapin`'s default executor and reactor on purpose: its I/O threads sit next
//! to the tokio runtime, and only futures and the closure callback cross into tokio.

use super::{
    Broker, BrokerChannel, BrokerConnection, BrokerError, CloseNotice, CloseSender, Deliveries,
    Delivery, Topology,
};
use async_trait::async_trait;
use futures_util::{future, StreamExt};
use lapin::options::{
    BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Connection, ConnectionProperties, ExchangeKind};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const CONSUMER_TAG: &str = "order-dispatch";

/// Dials `amqp://` URIs.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    uri: String,
}

impl AmqpBroker {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Builds the URI for the default `guest` account on `host`.
    pub fn guest_uri(host: &str) -> String {
        format!("amqp://guest:guest@{host}:5672/")
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    type Connection = AmqpConnection;

    async fn dial(&self) -> Result<AmqpConnection, BrokerError> {
        let inner = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        Ok(AmqpConnection { inner })
    }
}

pub struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    type Channel = AmqpChannel;

    fn notify_close(&self, sink: CloseSender) {
        self.inner.on_error(move |err| {
            // The supervisor may already be gone during process shutdown.
            let _ = sink.send(CloseNotice::Dropped(err.to_string()));
        });
    }

    async fn open_channel(&self) -> Result<AmqpChannel, BrokerError> {
        let inner = self
            .inner
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;
        Ok(AmqpChannel { inner })
    }
}

#[derive(Clone)]
pub struct AmqpChannel {
    inner: lapin::Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, topology: &Topology) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };
        self.inner
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Direct,
                options,
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ExchangeDeclare {
                exchange: topology.exchange.clone(),
                reason: e.to_string(),
            })
    }

    async fn declare_queue(&self, topology: &Topology) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .inner
            .queue_declare(&topology.queue, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::QueueDeclare {
                queue: topology.queue.clone(),
                reason: e.to_string(),
            })?;
        debug!(queue = queue.name().as_str(), messages = queue.message_count(), "Queue declared");
        Ok(())
    }

    async fn bind_queue(&self, topology: &Topology) -> Result<(), BrokerError> {
        self.inner
            .queue_bind(
                &topology.queue,
                &topology.exchange,
                &topology.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::QueueBind {
                queue: topology.queue.clone(),
                reason: e.to_string(),
            })
    }

    async fn consume(&self, queue: &str) -> Result<Deliveries, BrokerError> {
        let options = BasicConsumeOptions {
            no_ack: true,
            ..BasicConsumeOptions::default()
        };
        let consumer = self
            .inner
            .basic_consume(queue, CONSUMER_TAG, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::Consume {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let deliveries = consumer
            .take_while(|next| {
                if let Err(e) = next {
                    warn!(error = %e, "Subscription ended");
                }
                future::ready(next.is_ok())
            })
            .filter_map(|next| future::ready(next.ok().map(into_delivery)))
            .boxed();
        Ok(deliveries)
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(render_headers)
        .unwrap_or_default();
    Delivery {
        headers,
        body: delivery.data,
    }
}

fn render_headers(table: &FieldTable) -> BTreeMap<String, String> {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), render_value(value)))
        .collect()
}

fn render_value(value: &AMQPValue) -> String {
    match value {
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        AMQPValue::ShortString(s) => s.as_str().to_string(),
        other => format!("{other:?}"),
    }
}
