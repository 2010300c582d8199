//! # Wire Protocol Messages
//!
//! The closed set of messages exchanged between tiers.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Fuelline Protocol Messages                         │
//! │                                                                         │
//! │  PRICES (downward)                                                      │
//! │  ─────────────────                                                      │
//! │  Hub   ───► Relay   PriceBaseUpdate  { fuel_type, base_price }          │
//! │  Relay ───► Leaf    PriceLocalUpdate { fuel_type, final_price }         │
//! │                                                                         │
//! │  SALES (upward)                                                         │
//! │  ──────────────                                                         │
//! │  Leaf  ───► Relay   TransactionReport { leaf_id, fuel_type, litres,     │
//! │  Relay ───► Hub                         loads, relay_id? }              │
//! │                                                                         │
//! │  PRESENCE                                                               │
//! │  ────────                                                               │
//! │  Any   ◄──► Any     Heartbeat { node_id, status }                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format (JSON)
//! Serde's adjacently tagged enum, one message per frame:
//! ```json
//! { "type": "PriceBaseUpdate", "payload": { "fuel_type": "95", "base_price": 1000 } }
//! ```
//!
//! Unknown fields are ignored. `relay_id` may be absent. A missing or unknown
//! `type` is a [`DecodeError`] that drops the message but keeps the
//! connection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use fuelline_core::{FuelType, Price, Transaction};

/// Status carried by the heartbeat a node sends when its link comes up.
pub const STATUS_ONLINE: &str = "online";

// =============================================================================
// Main Message Enum (Tagged Union)
// =============================================================================

/// All protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    /// New base price from the hub.
    PriceBaseUpdate { fuel_type: FuelType, base_price: Price },

    /// Margin-applied price from a relay.
    PriceLocalUpdate { fuel_type: FuelType, final_price: Price },

    /// A completed sale travelling upward.
    TransactionReport(Transaction),

    /// Presence announcement; no side effects beyond logging.
    Heartbeat { node_id: String, status: String },
}

/// Discriminator values accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PriceBaseUpdate,
    PriceLocalUpdate,
    TransactionReport,
    Heartbeat,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::PriceBaseUpdate,
        MessageKind::PriceLocalUpdate,
        MessageKind::TransactionReport,
        MessageKind::Heartbeat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PriceBaseUpdate => "PriceBaseUpdate",
            MessageKind::PriceLocalUpdate => "PriceLocalUpdate",
            MessageKind::TransactionReport => "TransactionReport",
            MessageKind::Heartbeat => "Heartbeat",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownKind(s.to_string()))
    }
}

// =============================================================================
// Decode Errors
// =============================================================================

/// Message-level decode failures. The connection stays open.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// Not UTF-8 JSON, or not a JSON object.
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("message has no \"type\" discriminator")]
    MissingKind,

    #[error("unknown message type: {0}")]
    UnknownKind(String),

    /// Known type, but a required field is missing or mistyped.
    #[error("invalid {kind} fields: {reason}")]
    InvalidFields { kind: MessageKind, reason: String },
}

// =============================================================================
// Encoding / Decoding
// =============================================================================

impl Message {
    /// Returns the message kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::PriceBaseUpdate { .. } => MessageKind::PriceBaseUpdate,
            Message::PriceLocalUpdate { .. } => MessageKind::PriceLocalUpdate,
            Message::TransactionReport(_) => MessageKind::TransactionReport,
            Message::Heartbeat { .. } => MessageKind::Heartbeat,
        }
    }

    /// Returns the message type name as a string (for logging).
    pub fn type_name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Serializes to UTF-8 JSON.
    ///
    /// Fails only for non-finite `litres`, which JSON cannot carry.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        if let Message::TransactionReport(tx) = self {
            if !tx.litres.is_finite() {
                return Err(serde::ser::Error::custom("litres must be finite"));
            }
        }
        serde_json::to_vec(self)
    }

    /// Parses a payload, reporting which stage failed.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let object = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed("expected a JSON object".to_string()))?;

        let kind: MessageKind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingKind)?
            .parse()?;

        serde_json::from_value(value).map_err(|e| DecodeError::InvalidFields {
            kind,
            reason: e.to_string(),
        })
    }

    pub fn price_base(fuel_type: impl Into<FuelType>, base_price: Price) -> Self {
        Message::PriceBaseUpdate {
            fuel_type: fuel_type.into(),
            base_price,
        }
    }

    pub fn price_local(fuel_type: impl Into<FuelType>, final_price: Price) -> Self {
        Message::PriceLocalUpdate {
            fuel_type: fuel_type.into(),
            final_price,
        }
    }

    pub fn heartbeat(node_id: impl Into<String>, status: impl Into<String>) -> Self {
        Message::Heartbeat {
            node_id: node_id.into(),
            status: status.into(),
        }
    }

    /// The heartbeat a node sends when its upstream link comes up.
    pub fn online(node_id: impl Into<String>) -> Self {
        Self::heartbeat(node_id, STATUS_ONLINE)
    }
}

impl From<Transaction> for Message {
    fn from(tx: Transaction) -> Self {
        Message::TransactionReport(tx)
    }
}
