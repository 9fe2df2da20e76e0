//! Domain Layer - Feed types and connection lifecycle.
//!
//! This layer contains the feed, payload and connection types plus the
//! connection state machine. Nothing here performs I/O or reads a clock
//! other than stamping applied payloads.

/// Connection state, errors and the feed state machine.
pub mod connection;

/// Feed kinds, subscriptions and endpoint derivation.
pub mod feed;

/// Payload types and decoding rules.
pub mod payload;
