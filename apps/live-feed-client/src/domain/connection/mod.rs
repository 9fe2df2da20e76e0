//! Connection Lifecycle
//!
//! State, errors, reconnection policy and the transition function that ties
//! them together.

mod machine;
mod reconnect;
mod state;

pub use machine::{
    ConnectionId, FeedCommand, FeedEvent, FeedMachine, FetchId, TimerId, TransportEvent,
};
pub use reconnect::{
    AttemptCounter, DEFAULT_DATA_TIMEOUT, DEFAULT_MAX_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
    ReconnectConfig,
};
pub use state::{
    CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NO_STATUS, CLOSE_NORMAL, ConnectionState, FeedError,
    FeedSnapshot, PayloadSource, is_normal_close,
};
