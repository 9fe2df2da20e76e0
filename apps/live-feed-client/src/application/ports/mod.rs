//! Port Interfaces
//!
//! Defines the interfaces (ports) the feed manager drives. Infrastructure
//! adapters implement them; tests substitute in-memory fakes.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamTransport`: Opens streaming connections that report through a
//!   `TransportSink`
//! - `FallbackFetcher`: Issues the one-shot REST request that substitutes for
//!   a failed stream

mod fallback_port;
mod transport_port;

pub use fallback_port::FallbackFetcher;
#[cfg(test)]
pub use fallback_port::MockFallbackFetcher;
pub use transport_port::{CloseRequest, ConnectionHandle, StreamTransport, TransportSink};
#[cfg(test)]
pub use transport_port::MockStreamTransport;

pub use crate::domain::connection::TransportEvent;
