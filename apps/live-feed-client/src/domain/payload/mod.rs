//! Feed Payloads
//!
//! Decoding rules for inbound data. Stream frames and fallback bodies share
//! one rule per feed kind:
//!
//! - **Live price**: a JSON object with a non-zero numeric `price`. Frames
//!   without a usable price are ignored.
//! - **Batch**: a JSON array of records. Empty arrays are ignored on the
//!   stream and rejected from the fallback.
//!
//! Anything that is not JSON, or JSON of the wrong shape, is a decode error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::feed::FeedKind;

/// One record of a batch payload, kept as raw JSON.
pub type Record = Value;

/// A single price update from the live price feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Last traded price.
    pub price: f64,
    /// Symbol reported by the server, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Server timestamp in seconds since the epoch, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// The latest data received for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Latest price tick.
    Price(PriceTick),
    /// Latest batch of records, in server order.
    Batch(Vec<Record>),
}

impl Payload {
    /// The price, for price payloads.
    #[must_use]
    pub const fn price(&self) -> Option<f64> {
        match self {
            Self::Price(tick) => Some(tick.price),
            Self::Batch(_) => None,
        }
    }

    /// The records, for batch payloads.
    #[must_use]
    pub fn records(&self) -> Option<&[Record]> {
        match self {
            Self::Price(_) => None,
            Self::Batch(records) => Some(records),
        }
    }

    /// Number of data points carried.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Price(_) => 1,
            Self::Batch(records) => records.len(),
        }
    }

    /// Whether the payload carries no data points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Payload decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// Input is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),
    /// JSON does not have the shape the feed expects.
    #[error("unexpected payload shape: expected {expected}, got {found}")]
    UnexpectedShape {
        /// Expected JSON type.
        expected: &'static str,
        /// JSON type actually received.
        found: &'static str,
    },
    /// Fallback response carried no records.
    #[error("fallback response contained no records")]
    Empty,
}

/// Decode a stream text frame.
///
/// Returns `Ok(None)` for well-formed frames that carry nothing to apply.
///
/// # Errors
///
/// Returns an error if the frame is not JSON or has the wrong shape.
pub fn decode_message(kind: &FeedKind, text: &str) -> Result<Option<Payload>, PayloadError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| PayloadError::Json(e.to_string()))?;
    accept_value(kind, value)
}

/// Decode a fallback response body.
///
/// # Errors
///
/// Returns an error if the body has the wrong shape or carries no data.
pub fn decode_fallback(kind: &FeedKind, body: Value) -> Result<Payload, PayloadError> {
    accept_value(kind, body)?.ok_or(PayloadError::Empty)
}

/// Apply the feed's well-formedness rule to a parsed JSON value.
///
/// # Errors
///
/// Returns an error if the value has the wrong shape for the feed.
pub fn accept_value(kind: &FeedKind, value: Value) -> Result<Option<Payload>, PayloadError> {
    match kind {
        FeedKind::LivePrice => accept_price(value),
        FeedKind::Batch(_) => accept_batch(value),
    }
}

fn accept_price(value: Value) -> Result<Option<Payload>, PayloadError> {
    let Value::Object(map) = value else {
        return Err(PayloadError::UnexpectedShape {
            expected: "object",
            found: json_type(&value),
        });
    };

    let price = match map.get("price") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(other) => {
            return Err(PayloadError::UnexpectedShape {
                expected: "numeric price",
                found: json_type(other),
            });
        }
    };

    let Some(price) = price.filter(|p| p.is_finite() && *p != 0.0) else {
        return Ok(None);
    };

    Ok(Some(Payload::Price(PriceTick {
        price,
        symbol: map.get("symbol").and_then(Value::as_str).map(str::to_string),
        timestamp: map.get("timestamp").and_then(Value::as_f64),
    })))
}

fn accept_batch(value: Value) -> Result<Option<Payload>, PayloadError> {
    match value {
        Value::Array(records) if records.is_empty() => Ok(None),
        Value::Array(records) => Ok(Some(Payload::Batch(records))),
        other => Err(PayloadError::UnexpectedShape {
            expected: "array",
            found: json_type(&other),
        }),
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
