//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus configuration and observability.

/// WebSocket stream transport.
pub mod websocket;

/// HTTP fallback client and symbol catalog.
pub mod http;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing setup.
pub mod telemetry;
