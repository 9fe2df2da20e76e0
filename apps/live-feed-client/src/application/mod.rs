//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the feed manager that drives the connection state
//! machine and the port interfaces it drives.

/// Port interfaces for the streaming transport and the fallback fetcher.
pub mod ports;

/// Feed manager, caller handle and timer scheduler.
pub mod services;
