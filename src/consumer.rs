//! # Consumer Loop
//!
//! Waits on the [`ReadinessGate`], subscribes to the orders queue on the channel it receives,
//! and feeds deliveries to the [`OrderProcessor`] strictly one at a time.
//!
//! When the subscription stream ends (channel or connection closed) the loop goes back to the
//! gate for the next cycle. A subscription that fails to open on a ready channel is
//! [`Fatal::Subscription`].

use crate::broker::BrokerChannel;
use crate::fatal::{Fatal, FatalHook};
use crate::processor::OrderProcessor;
use crate::readiness::ReadinessGate;
use crate::store::OrderStore;
use futures_util::StreamExt;
use rand::Rng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct ConsumerLoop<C, S, R> {
    gate: ReadinessGate<C>,
    queue: String,
    processor: OrderProcessor<S, R>,
    fatal: Arc<dyn FatalHook>,
    shutdown: CancellationToken,
}

impl<C, S, R> ConsumerLoop<C, S, R>
where
    C: BrokerChannel,
    S: OrderStore,
    R: Rng + Send,
{
    pub fn new(
        gate: ReadinessGate<C>,
        queue: impl Into<String>,
        processor: OrderProcessor<S, R>,
        fatal: Arc<dyn FatalHook>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gate,
            queue: queue.into(),
            processor,
            fatal,
            shutdown,
        }
    }

    /// Runs until cancelled, the supervisor goes away, or a fatal condition.
    pub async fn run(mut self) {
        info!(queue = %self.queue, error_percent = self.processor.error_percent(), "Consumer started");
        let mut cycle: u64 = 0;

        'cycles: loop {
            let channel = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                ready = self.gate.wait() => match ready {
                    Some(channel) => channel,
                    None => break,
                },
            };
            cycle += 1;
            info!(cycle, "Broker ready, subscribing");

            let mut deliveries = match channel.consume(&self.queue).await {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    self.fatal.trigger(&Fatal::Subscription(e.to_string()));
                    break;
                }
            };

            let mut processed: u64 = 0;
            loop {
                let next = tokio::select! {
                    _ = self.shutdown.cancelled() => break 'cycles,
                    next = deliveries.next() => next,
                };
                let Some(delivery) = next else {
                    break;
                };
                debug!(headers = ?delivery.headers, "Order received");
                if let Err(fatal) = self.processor.process(&delivery).await {
                    self.fatal.trigger(&fatal);
                    break 'cycles;
                }
                processed += 1;
            }
            info!(cycle, processed, "Subscription ended, waiting for broker");
        }

        info!("Consumer stopped");
    }
}
