//! Connection State and Snapshot
//!
//! The observable state surface of a feed manager.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::feed::Subscription;
use crate::domain::payload::{Payload, PayloadError};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint going away (server shutdown, page navigation).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Whether a close code suppresses reconnection.
#[must_use]
pub const fn is_normal_close(code: u16) -> bool {
    matches!(code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
}

/// Lifecycle of the physical streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No subscription is active.
    #[default]
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Transport is open.
    Open {
        /// No payload has arrived on this connection yet.
        awaiting_first_payload: bool,
    },
    /// Transport closed; a reconnect may be pending.
    Closed,
}

impl ConnectionState {
    /// Check if the transport is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open {
                awaiting_first_payload: true,
            } => "open (awaiting first payload)",
            Self::Open { .. } => "open",
            Self::Closed => "closed",
        }
    }
}

/// Last failure observed by a feed manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FeedError {
    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Transport closed with a code other than 1000/1001.
    #[error("connection closed abnormally (code {code}): {reason}")]
    CloseAbnormal {
        /// Close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// Inbound data was malformed or had an unexpected shape.
    #[error("parse error: {0}")]
    Parse(String),
    /// Fallback request returned a non-success status.
    #[error("HTTP error: {status}")]
    Http {
        /// Response status code.
        status: u16,
    },
    /// Fallback request failed before a response arrived.
    #[error("network error: {0}")]
    Network(String),
}

impl From<PayloadError> for FeedError {
    fn from(error: PayloadError) -> Self {
        Self::Parse(error.to_string())
    }
}

/// Where the current payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    /// Streaming connection.
    Stream,
    /// Fallback REST request.
    Fallback,
}

/// Point-in-time view of a feed manager's state surface.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FeedSnapshot {
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Active subscription, if any.
    pub subscription: Option<Subscription>,
    /// Latest accepted payload.
    pub payload: Option<Payload>,
    /// Source of the latest payload.
    pub source: Option<PayloadSource>,
    /// When the latest payload was applied.
    pub updated_at: Option<DateTime<Utc>>,
    /// Transport is open.
    pub is_connected: bool,
    /// Data for the subscription is still being fetched.
    pub is_loading: bool,
    /// Last observed failure.
    pub error: Option<FeedError>,
    /// Consecutive failed connection attempts.
    pub attempts: u32,
}
