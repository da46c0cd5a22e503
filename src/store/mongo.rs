//! MongoDB-backed [`OrderStore`].

use super::{OrderStore, StoreError};
use crate::model::{OrderDocument, PRIMARY_KEY_FIELD};
use async_trait::async_trait;
use mongodb::bson::{self, doc, Document};
use mongodb::{Client, Collection};
use std::time::Duration;
use tracing::{info, warn};

pub const DATABASE: &str = "orders";
pub const COLLECTION: &str = "orders";

#[derive(Debug, Clone)]
pub struct MongoStore {
    collection: Collection<Document>,
}

impl MongoStore {
    /// Uses the `orders.orders` collection.
    pub fn new(client: &Client) -> Self {
        Self {
            collection: client.database(DATABASE).collection(COLLECTION),
        }
    }

    /// Builds the URI for an unauthenticated server on `host`.
    pub fn uri_for(host: &str) -> String {
        format!("mongodb://{host}:27017")
    }
}

/// Single connection attempt, confirmed with a `ping`.
pub async fn connect(uri: &str) -> Result<Client, StoreError> {
    let client = Client::with_uri_str(uri)
        .await
        .map_err(|e| StoreError::Connect(e.to_string()))?;
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|e| StoreError::Connect(e.to_string()))?;
    Ok(client)
}

/// Connects with a fixed delay between attempts, forever.
///
/// Runs once at startup; a client that later loses its server is not re-dialed here.
pub async fn connect_with_retry(uri: &str, delay: Duration) -> Client {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        info!(uri, attempt, "Connecting to store");
        match connect(uri).await {
            Ok(client) => {
                info!(uri, attempt, "Store connected");
                return client;
            }
            Err(e) => warn!(uri, attempt, error = %e, ?delay, "Reconnecting to store"),
        }
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl OrderStore for MongoStore {
    async fn upsert(&self, document: &OrderDocument) -> Result<String, StoreError> {
        let fields = bson::to_document(document).map_err(|e| StoreError::Encode(e.to_string()))?;
        let key = fields
            .get(PRIMARY_KEY_FIELD)
            .cloned()
            .ok_or_else(|| StoreError::Encode(format!("missing {PRIMARY_KEY_FIELD}")))?;

        self.collection
            .replace_one(doc! { "_id": key }, fields)
            .upsert(true)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(document.key())
    }
}
