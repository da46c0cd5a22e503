/// An order event as it is stored.
///
/// The body of a delivery is a free-form JSON object. The only field the dispatcher relies
/// on is `orderid`, which is copied into `_id` so the store keys the document by it.
use crate::processor::ProcessError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field carrying the order identifier in published events.
pub const ORDER_ID_FIELD: &str = "orderid";
/// Primary key field in the store.
pub const PRIMARY_KEY_FIELD: &str = "_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderDocument(Map<String, Value>);

impl OrderDocument {
    /// Parses a delivery body and stamps the primary key.
    ///
    /// Rejects bodies that are not JSON objects, and objects whose `orderid` is absent,
    /// `null` or an empty string.
    pub fn from_body(body: &[u8]) -> Result<Self, ProcessError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ProcessError::Parse(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(ProcessError::NotAnObject);
        };

        let order_id = match fields.get(ORDER_ID_FIELD) {
            None | Some(Value::Null) => return Err(ProcessError::MissingOrderId),
            Some(Value::String(id)) if id.is_empty() => return Err(ProcessError::MissingOrderId),
            Some(id) => id.clone(),
        };
        fields.insert(PRIMARY_KEY_FIELD.to_string(), order_id);
        Ok(Self(fields))
    }

    /// The storage key. String ids are returned bare, anything else as JSON text.
    pub fn key(&self) -> String {
        match self.0.get(PRIMARY_KEY_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}
