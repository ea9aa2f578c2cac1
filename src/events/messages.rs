use serde::{Deserialize, Serialize};

use crate::domain::{AppError, Envelope};

/// Request to mint `amount` tokens of a creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemMessage {
    pub creation_id: String,
    pub contract: String,
    pub amount: i64,
}

/// A minted token ready to be recorded as an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliverItemMessage {
    pub creation_id: String,
    pub contract: String,
    pub token: String,
}

/// Decodes an envelope payload as JSON.
pub fn decode<'a, M: Deserialize<'a>>(envelope: &'a Envelope) -> Result<M, AppError> {
    serde_json::from_slice(&envelope.payload).map_err(|e| AppError::Deserialization(e.to_string()))
}
