//! Error types for order processing.

use thiserror::Error;

/// Reasons a delivery is dropped before it reaches the store.
///
/// None of these are retried: the broker already forgot the message under auto-ack.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// The body is not valid JSON.
    #[error("Error parsing order: {0}")]
    Parse(String),

    /// The body is valid JSON but not an object.
    #[error("Order is not a JSON object")]
    NotAnObject,

    /// `orderid` is absent, null or empty, so there is no storage key.
    #[error("Order has no orderid")]
    MissingOrderId,
}
