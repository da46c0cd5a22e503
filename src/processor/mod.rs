//! Per-message processing: parse, persist, simulate latency, maybe crash.

pub mod error;

pub use error::*;

use crate::broker::Delivery;
use crate::fatal::Fatal;
use crate::model::OrderDocument;
use crate::store::{OrderStore, StoreSlot};
use rand::Rng;
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Simulated downstream latency in milliseconds, lower bound inclusive.
pub const PROCESSING_DELAY_MS: Range<u64> = 42..84;

/// Processes one delivery at a time.
///
/// Randomness comes from the injected `R`, so a seeded generator makes both the latency and
/// the fault-injection sequence reproducible.
///
/// Draw order per accepted message: one latency sample from [`PROCESSING_DELAY_MS`], then,
/// only when `error_percent > 0`, one `u32` roll from `0..100`.
pub struct OrderProcessor<S, R> {
    store: StoreSlot<S>,
    error_percent: u8,
    delay_ms: Range<u64>,
    rng: R,
}

impl<S: OrderStore, R: Rng + Send> OrderProcessor<S, R> {
    /// `error_percent` is clamped to 100.
    pub fn new(store: StoreSlot<S>, error_percent: u8, rng: R) -> Self {
        Self {
            store,
            error_percent: error_percent.min(100),
            delay_ms: PROCESSING_DELAY_MS,
            rng,
        }
    }

    pub fn error_percent(&self) -> u8 {
        self.error_percent
    }

    /// Runs the pipeline for one delivery.
    ///
    /// Parse and store failures are logged and swallowed. The only error is
    /// [`Fatal::InjectedFault`], which the caller must treat as a crash.
    #[instrument(skip_all, fields(bytes = delivery.body.len()))]
    pub async fn process(&mut self, delivery: &Delivery) -> Result<(), Fatal> {
        debug!(headers = ?delivery.headers, "Processing order");

        let document = match OrderDocument::from_body(&delivery.body) {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, body = %String::from_utf8_lossy(&delivery.body), "Dropping order");
                return Ok(());
            }
        };

        match self.store.get() {
            Some(store) => match store.upsert(&document).await {
                Ok(key) => info!(%key, "Order stored"),
                Err(e) => error!(key = %document.key(), error = %e, "Order not stored"),
            },
            None => debug!(key = %document.key(), "Store not connected, skipping persistence"),
        }

        let delay = self.rng.random_range(self.delay_ms.clone());
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.roll_for_fault()
    }

    fn roll_for_fault(&mut self) -> Result<(), Fatal> {
        if self.error_percent == 0 {
            return Ok(());
        }
        let roll: u32 = self.rng.random_range(0..100);
        if roll < u32::from(self.error_percent) {
            return Err(Fatal::InjectedFault {
                roll,
                error_percent: self.error_percent,
            });
        }
        Ok(())
    }
}
