//! Document persistence for processed orders.
//!
//! [`OrderStore`] is the only thing the processor needs from the store. The production
//! implementation is [`MongoStore`]; tests use [`MemoryStore`](crate::mock::MemoryStore).
//!
//! The store client is connected once, in the background, by a bootstrap task. Until it
//! lands in the [`StoreSlot`] the processor skips persistence.

pub mod mongo;

pub use mongo::{connect_with_retry, MongoStore};

use crate::model::OrderDocument;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Errors raised by store implementations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connect(String),
    #[error("Document encoding failed: {0}")]
    Encode(String),
    #[error("Insertion error: {0}")]
    Write(String),
}

/// Insert-or-overwrite persistence keyed by the document's `_id`.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Writes `document`, replacing any stored document with the same key.
    /// Returns the key written.
    async fn upsert(&self, document: &OrderDocument) -> Result<String, StoreError>;
}

/// Write-once slot holding the connected store.
///
/// Written only by the bootstrap task, read only by the processor.
pub type StoreSlot<S> = Arc<OnceCell<S>>;

pub fn empty_slot<S>() -> StoreSlot<S> {
    Arc::new(OnceCell::new())
}
