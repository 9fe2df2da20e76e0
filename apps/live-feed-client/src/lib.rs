#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Live Feed Client - Streaming Connection Manager
//!
//! Keeps a client connected to a backend's live data feeds: a WebSocket
//! stream per subscription, fixed-delay reconnection after abnormal closes,
//! a one-shot REST fallback when the stream fails or stays silent, and a
//! snapshot of connection state, latest payload and last error that callers
//! observe through a `watch` channel.
//!
//! Price tick feeds and record batch feeds run through the same state
//! machine; only the endpoint shape and payload rules differ.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Feed types and the connection state machine
//!   - `feed`: Feed kinds, subscriptions, endpoint derivation
//!   - `payload`: Payload types and decoding rules
//!   - `connection`: State, errors, reconnect policy, `FeedMachine`
//!
//! - **Application**: Services and port definitions
//!   - `ports`: Stream transport and fallback fetcher interfaces
//!   - `services`: `FeedManager` task, `FeedHandle`, timer scheduler
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: tokio-tungstenite transport
//!   - `http`: reqwest fallback client and symbol catalog
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus metrics
//!   - `telemetry`: Logging and tracing setup
//!
//! # Data Flow
//!
//! ```text
//! WebSocket ──events──┐
//! Timers    ──events──┤     ┌─────────────┐     ┌──────────────┐
//! REST      ──events──┼────►│ FeedManager │────►│ FeedSnapshot │──► watchers
//! FeedHandle ─control─┘     └─────────────┘     └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Feed types and connection state machine.
pub mod domain;

/// Application layer - Feed manager and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{
    ConnectionState, FeedCommand, FeedError, FeedEvent, FeedMachine, FeedSnapshot, PayloadSource,
    ReconnectConfig, TransportEvent,
};
pub use domain::feed::{
    EndpointError, FeedEndpoints, FeedKind, Subscription, SubscriptionError, SubscriptionOptions,
};
pub use domain::payload::{Payload, PayloadError, PriceTick};

// Application services and ports
pub use application::ports::{
    CloseRequest, ConnectionHandle, FallbackFetcher, StreamTransport, TransportSink,
};
pub use application::services::{FeedHandle, FeedManager, ManagerError};

// Infrastructure adapters
pub use infrastructure::config::{ClientConfig, ConfigError, HttpSettings};
pub use infrastructure::http::{HttpClientError, HttpFallbackClient, SymbolCatalog, SymbolInfo};
pub use infrastructure::websocket::WsTransport;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
