//! Prometheus Metrics Module
//!
//! Exposes feed client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Stream frames received and payloads applied by source
//! - **Connections**: Connected flag and scheduled reconnects
//! - **Fallback**: Fallback fetches by outcome
//!
//! All metrics are labelled with the feed path. Recording is a no-op until a
//! recorder is installed.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::connection::PayloadSource;

// =============================================================================
// Recorder Installation
// =============================================================================

static METRICS_ADDR: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called inside a Tokio runtime. Subsequent calls return the address
/// of the first installation.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or a different recorder
/// is already installed.
pub fn init_metrics(addr: SocketAddr) -> Result<SocketAddr, BuildError> {
    if let Some(bound) = METRICS_ADDR.get() {
        return Ok(*bound);
    }

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    Ok(*METRICS_ADDR.get_or_init(|| addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Message counters
    describe_counter!(
        "feed_client_messages_received_total",
        "Total frames received on streaming connections"
    );
    describe_counter!(
        "feed_client_payloads_applied_total",
        "Total payloads applied to the state surface by source"
    );

    // Connection metrics
    describe_gauge!(
        "feed_client_connected",
        "Whether the streaming connection is open (1) or not (0)"
    );
    describe_counter!(
        "feed_client_reconnects_total",
        "Total reconnects scheduled after abnormal closes"
    );

    // Fallback counters
    describe_counter!(
        "feed_client_fallback_fetches_total",
        "Total fallback fetches by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for fallback fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Response parsed.
    Success,
    /// Non-success status.
    HttpError,
    /// No response or unparseable body.
    Failed,
}

impl FetchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::HttpError => "http_error",
            Self::Failed => "failed",
        }
    }
}

const fn source_label(source: PayloadSource) -> &'static str {
    match source {
        PayloadSource::Stream => "stream",
        PayloadSource::Fallback => "fallback",
    }
}

/// Record a frame received on the stream.
pub fn record_message_received(feed: &str) {
    counter!(
        "feed_client_messages_received_total",
        "feed" => feed.to_string()
    )
    .increment(1);
}

/// Record a payload applied to the state surface.
pub fn record_payload_applied(feed: &str, source: PayloadSource) {
    counter!(
        "feed_client_payloads_applied_total",
        "feed" => feed.to_string(),
        "source" => source_label(source)
    )
    .increment(1);
}

/// Update the connected flag for a feed.
pub fn set_connected(feed: &str, connected: bool) {
    gauge!(
        "feed_client_connected",
        "feed" => feed.to_string()
    )
    .set(if connected { 1.0 } else { 0.0 });
}

/// Record a scheduled reconnect.
pub fn record_reconnect(feed: &str) {
    counter!(
        "feed_client_reconnects_total",
        "feed" => feed.to_string()
    )
    .increment(1);
}

/// Record a completed fallback fetch.
pub fn record_fallback(feed: &str, outcome: FetchOutcome) {
    counter!(
        "feed_client_fallback_fetches_total",
        "feed" => feed.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_outcome_as_str() {
        assert_eq!(FetchOutcome::Success.as_str(), "success");
        assert_eq!(FetchOutcome::HttpError.as_str(), "http_error");
        assert_eq!(FetchOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn source_labels() {
        assert_eq!(source_label(PayloadSource::Stream), "stream");
        assert_eq!(source_label(PayloadSource::Fallback), "fallback");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_received("data");
        record_payload_applied("data", PayloadSource::Fallback);
        set_connected("data", true);
        record_reconnect("data");
        record_fallback("data", FetchOutcome::Failed);
    }
}
