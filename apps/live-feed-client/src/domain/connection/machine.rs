//! Feed Connection State Machine
//!
//! Pure transition function for one feed subscription. Every input (caller
//! request, transport callback, timer firing, fallback completion) is a
//! [`FeedEvent`]; every side effect the machine wants performed is returned as
//! a [`FeedCommand`]. The machine never performs I/O itself, which keeps the
//! whole lifecycle testable without a network or a clock.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──connect──► Connecting ──opened──► Open{awaiting} ──payload──► Open
//!                        ▲                        │
//!                        │ reconnect due          │ closed
//!                        │ (1000ms)               ▼
//!                        └─────────────────── Closed
//! ```
//!
//! Connections, timers and fallback fetches carry ids. Events whose id is not
//! the current one belong to a superseded subscription or a cancelled timer
//! and are dropped.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use url::Url;

use super::reconnect::{AttemptCounter, ReconnectConfig};
use super::state::{
    CLOSE_NORMAL, ConnectionState, FeedError, FeedSnapshot, PayloadSource, is_normal_close,
};
use crate::domain::feed::{FeedEndpoints, Subscription};
use crate::domain::payload::{Payload, decode_fallback, decode_message};

/// Identifies one physical connection attempt.
pub type ConnectionId = u64;

/// Identifies one scheduled timer.
pub type TimerId = u64;

/// Identifies one fallback fetch.
pub type FetchId = u64;

/// Callback from the streaming transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Opened,
    /// Text frame received.
    Message(String),
    /// Socket-level failure. A `Closed` event follows.
    Error(String),
    /// Connection closed.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Caller asked to stream a subscription.
    Connect(Subscription),
    /// Caller asked to tear everything down.
    Disconnect,
    /// Transport callback for a connection.
    Transport {
        /// Connection the event belongs to.
        connection: ConnectionId,
        /// The callback.
        event: TransportEvent,
    },
    /// Reconnect timer fired.
    ReconnectDue {
        /// Timer that fired.
        timer: TimerId,
    },
    /// Data-arrival timer fired.
    DataTimeout {
        /// Timer that fired.
        timer: TimerId,
    },
    /// Fallback fetch finished.
    FallbackCompleted {
        /// Fetch that finished.
        fetch: FetchId,
        /// Parsed response body or the failure.
        result: Result<Value, FeedError>,
    },
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Open a streaming connection.
    Open {
        /// Id to tag the connection's events with.
        connection: ConnectionId,
        /// Streaming URL.
        url: Url,
    },
    /// Close a streaming connection.
    Close {
        /// Connection to close.
        connection: ConnectionId,
        /// Close code to send.
        code: u16,
        /// Close reason to send.
        reason: &'static str,
    },
    /// Schedule the reconnect timer, replacing any pending one.
    ScheduleReconnect {
        /// Id the timer reports when it fires.
        timer: TimerId,
        /// Delay from now.
        delay: Duration,
    },
    /// Cancel the pending reconnect timer.
    CancelReconnect,
    /// Schedule the data-arrival timer, replacing any pending one.
    ScheduleDataTimeout {
        /// Id the timer reports when it fires.
        timer: TimerId,
        /// Delay from now.
        delay: Duration,
    },
    /// Cancel the pending data-arrival timer.
    CancelDataTimeout,
    /// Issue a fallback fetch.
    Fetch {
        /// Id to report the result with.
        fetch: FetchId,
        /// Fallback URL.
        url: Url,
    },
}

/// Connection lifecycle state machine for one feed.
#[derive(Debug)]
pub struct FeedMachine {
    endpoints: FeedEndpoints,
    config: ReconnectConfig,
    snapshot: FeedSnapshot,
    attempts: AttemptCounter,
    connection: Option<ConnectionId>,
    reconnect_timer: Option<TimerId>,
    data_timer: Option<TimerId>,
    /// Busy flag: at most one fallback fetch per manager.
    fallback: Option<FetchId>,
    /// Subscription the current payload belongs to.
    payload_owner: Option<Subscription>,
    /// No payload has been applied for the current subscription.
    awaiting_data: bool,
    /// A failed fallback ended the attempt sequence until the next connect.
    halted: bool,
    next_id: u64,
}

impl FeedMachine {
    /// Create an idle machine.
    #[must_use]
    pub fn new(endpoints: FeedEndpoints, config: ReconnectConfig) -> Self {
        Self {
            endpoints,
            attempts: AttemptCounter::new(config.max_attempts),
            config,
            snapshot: FeedSnapshot::default(),
            connection: None,
            reconnect_timer: None,
            data_timer: None,
            fallback: None,
            payload_owner: None,
            awaiting_data: false,
            halted: false,
            next_id: 0,
        }
    }

    /// Current state surface.
    #[must_use]
    pub const fn snapshot(&self) -> &FeedSnapshot {
        &self.snapshot
    }

    /// Current connection lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.snapshot.state
    }

    /// The live connection, if any.
    #[must_use]
    pub const fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Whether a fallback fetch is in flight.
    #[must_use]
    pub const fn is_fetching(&self) -> bool {
        self.fallback.is_some()
    }

    /// Endpoints this machine connects to.
    #[must_use]
    pub const fn endpoints(&self) -> &FeedEndpoints {
        &self.endpoints
    }

    /// Reconnection configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Apply one event and return the side effects to perform, in order.
    pub fn handle(&mut self, event: FeedEvent) -> Vec<FeedCommand> {
        let mut commands = Vec::new();

        match event {
            FeedEvent::Connect(subscription) => self.on_connect(subscription, &mut commands),
            FeedEvent::Disconnect => self.on_disconnect(&mut commands),
            FeedEvent::Transport { connection, event } => {
                if self.connection == Some(connection) {
                    self.on_transport(event, &mut commands);
                } else {
                    tracing::debug!(connection, ?event, "Dropping event from stale connection");
                }
            }
            FeedEvent::ReconnectDue { timer } => {
                if self.reconnect_timer == Some(timer) {
                    self.reconnect_timer = None;
                    self.on_reconnect_due(&mut commands);
                } else {
                    tracing::debug!(timer, "Dropping stale reconnect timer");
                }
            }
            FeedEvent::DataTimeout { timer } => {
                if self.data_timer == Some(timer) {
                    self.data_timer = None;
                    self.on_data_timeout(&mut commands);
                } else {
                    tracing::debug!(timer, "Dropping stale data timeout");
                }
            }
            FeedEvent::FallbackCompleted { fetch, result } => {
                if self.fallback == Some(fetch) {
                    self.fallback = None;
                    self.on_fallback_completed(result, &mut commands);
                } else {
                    tracing::debug!(fetch, "Discarding result of superseded fallback fetch");
                }
            }
        }

        self.snapshot.attempts = self.attempts.count();
        commands
    }

    // =========================================================================
    // Caller requests
    // =========================================================================

    fn on_connect(&mut self, subscription: Subscription, commands: &mut Vec<FeedCommand>) {
        let unchanged = self.snapshot.subscription.as_ref() == Some(&subscription);

        if unchanged {
            match self.snapshot.state {
                ConnectionState::Connecting => {
                    tracing::debug!(%subscription, "Connection attempt already in flight");
                    return;
                }
                ConnectionState::Open { .. } => {
                    tracing::debug!(%subscription, "Already streaming subscription");
                    return;
                }
                ConnectionState::Idle | ConnectionState::Closed => {}
            }

            tracing::info!(%subscription, "Reconnecting on caller request");
            self.halted = false;
            self.cancel_reconnect(commands);
            if self.awaiting_data && self.data_timer.is_none() {
                self.schedule_data_timeout(commands);
            }
            self.open_connection(commands);
            return;
        }

        tracing::info!(
            %subscription,
            feed = %self.endpoints.kind(),
            "Switching subscription"
        );

        self.close_connection("subscription changed", commands);
        self.cancel_reconnect(commands);
        self.cancel_data_timeout(commands);
        self.fallback = None;
        self.attempts.reset();
        self.halted = false;

        if self.payload_owner.as_ref() != Some(&subscription) {
            self.snapshot.payload = None;
            self.snapshot.source = None;
            self.snapshot.updated_at = None;
            self.payload_owner = None;
        }

        self.snapshot.subscription = Some(subscription);
        self.snapshot.is_loading = true;
        self.awaiting_data = true;
        self.schedule_data_timeout(commands);
        self.open_connection(commands);
    }

    fn on_disconnect(&mut self, commands: &mut Vec<FeedCommand>) {
        if self.snapshot.subscription.is_none() && self.connection.is_none() {
            tracing::debug!("Already disconnected");
        } else {
            tracing::info!(
                feed = %self.endpoints.kind(),
                "Disconnecting"
            );
        }

        self.cancel_reconnect(commands);
        self.cancel_data_timeout(commands);
        self.close_connection("client disconnect", commands);
        self.fallback = None;
        self.attempts.reset();
        self.awaiting_data = false;
        self.halted = false;

        self.snapshot.subscription = None;
        self.snapshot.state = ConnectionState::Idle;
        self.snapshot.is_connected = false;
        self.snapshot.is_loading = false;
    }

    // =========================================================================
    // Transport callbacks
    // =========================================================================

    fn on_transport(&mut self, event: TransportEvent, commands: &mut Vec<FeedCommand>) {
        match event {
            TransportEvent::Opened => {
                tracing::info!(
                    connection = ?self.connection,
                    feed = %self.endpoints.kind(),
                    "Stream connected"
                );
                self.snapshot.state = ConnectionState::Open {
                    awaiting_first_payload: true,
                };
                self.snapshot.is_connected = true;
                self.attempts.reset();
                self.halted = false;
            }
            TransportEvent::Message(text) => self.on_message(&text, commands),
            TransportEvent::Error(message) => {
                tracing::warn!(error = %message, attempts = self.attempts.count(), "Stream error");
                self.snapshot.error = Some(FeedError::Transport(message));

                if self.attempts.is_exhausted() {
                    self.start_fallback("attempt threshold reached", commands);
                }
            }
            TransportEvent::Closed { code, reason } => self.on_closed(code, reason, commands),
        }
    }

    fn on_message(&mut self, text: &str, commands: &mut Vec<FeedCommand>) {
        match decode_message(self.endpoints.kind(), text) {
            Ok(Some(payload)) => {
                tracing::debug!(points = payload.len(), "Stream payload received");
                self.halted = false;
                self.apply_payload(payload, PayloadSource::Stream, commands);
                if self.snapshot.state.is_open() {
                    self.snapshot.state = ConnectionState::Open {
                        awaiting_first_payload: false,
                    };
                }
            }
            Ok(None) => {
                tracing::debug!("Ignoring frame without data");
            }
            Err(error) => {
                tracing::warn!(%error, "Malformed stream frame");
                self.snapshot.error = Some(error.into());
            }
        }
    }

    fn on_closed(&mut self, code: u16, reason: String, commands: &mut Vec<FeedCommand>) {
        self.connection = None;
        self.snapshot.state = ConnectionState::Closed;
        self.snapshot.is_connected = false;
        self.attempts.increment();

        if is_normal_close(code) {
            tracing::info!(code, %reason, "Stream closed");
            return;
        }

        tracing::warn!(
            code,
            %reason,
            attempts = self.attempts.count(),
            "Stream closed abnormally"
        );
        self.snapshot.error = Some(FeedError::CloseAbnormal { code, reason });

        if self.halted {
            tracing::info!("Not reconnecting: attempt sequence ended by failed fallback");
            return;
        }

        self.schedule_reconnect(commands);
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn on_reconnect_due(&mut self, commands: &mut Vec<FeedCommand>) {
        if self.snapshot.state != ConnectionState::Closed || self.snapshot.subscription.is_none() {
            tracing::debug!(state = self.snapshot.state.as_str(), "Reconnect no longer needed");
            return;
        }

        tracing::info!(attempt = self.attempts.count(), "Reconnecting stream");
        self.open_connection(commands);
    }

    fn on_data_timeout(&mut self, commands: &mut Vec<FeedCommand>) {
        if !self.awaiting_data {
            return;
        }

        tracing::info!(
            timeout = ?self.config.data_timeout,
            "No data received in time"
        );
        self.start_fallback("data timeout", commands);
    }

    // =========================================================================
    // Fallback
    // =========================================================================

    fn start_fallback(&mut self, trigger: &'static str, commands: &mut Vec<FeedCommand>) {
        if !self.endpoints.kind().supports_fallback() {
            tracing::debug!(trigger, feed = %self.endpoints.kind(), "Feed has no fallback endpoint");
            return;
        }
        if self.fallback.is_some() {
            tracing::debug!(trigger, "Fallback fetch already in flight");
            return;
        }
        let Some(url) = self
            .snapshot
            .subscription
            .as_ref()
            .map(|subscription| self.endpoints.fallback_url(subscription))
        else {
            return;
        };

        let fetch = self.next_id();
        tracing::info!(%url, trigger, "Starting fallback fetch");

        self.fallback = Some(fetch);
        self.snapshot.is_loading = true;
        self.snapshot.error = None;
        commands.push(FeedCommand::Fetch { fetch, url });
    }

    fn on_fallback_completed(
        &mut self,
        result: Result<Value, FeedError>,
        commands: &mut Vec<FeedCommand>,
    ) {
        let decoded = result.and_then(|body| {
            decode_fallback(self.endpoints.kind(), body).map_err(FeedError::from)
        });

        match decoded {
            Ok(payload) => {
                tracing::info!(points = payload.len(), "Fallback payload received");
                self.apply_payload(payload, PayloadSource::Fallback, commands);
            }
            Err(error) => {
                tracing::error!(%error, "Fallback fetch failed");
                let ends_sequence = matches!(error, FeedError::Http { .. });
                self.snapshot.error = Some(error);
                self.snapshot.is_loading = false;

                if ends_sequence {
                    self.halted = true;
                    self.cancel_reconnect(commands);
                }
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn apply_payload(
        &mut self,
        payload: Payload,
        source: PayloadSource,
        commands: &mut Vec<FeedCommand>,
    ) {
        self.snapshot.payload = Some(payload);
        self.snapshot.source = Some(source);
        self.snapshot.updated_at = Some(Utc::now());
        self.snapshot.is_loading = false;
        self.payload_owner.clone_from(&self.snapshot.subscription);
        self.awaiting_data = false;
        self.cancel_data_timeout(commands);
    }

    fn open_connection(&mut self, commands: &mut Vec<FeedCommand>) {
        let Some(url) = self
            .snapshot
            .subscription
            .as_ref()
            .map(|subscription| self.endpoints.stream_url(subscription))
        else {
            return;
        };

        let connection = self.next_id();
        tracing::info!(%url, connection, "Opening stream");

        self.snapshot.error = None;
        self.snapshot.state = ConnectionState::Connecting;
        self.snapshot.is_connected = false;
        self.connection = Some(connection);
        commands.push(FeedCommand::Open { connection, url });
    }

    fn close_connection(&mut self, reason: &'static str, commands: &mut Vec<FeedCommand>) {
        if let Some(connection) = self.connection.take() {
            commands.push(FeedCommand::Close {
                connection,
                code: CLOSE_NORMAL,
                reason,
            });
        }
        self.snapshot.is_connected = false;
    }

    fn schedule_reconnect(&mut self, commands: &mut Vec<FeedCommand>) {
        let timer = self.next_id();
        self.reconnect_timer = Some(timer);
        commands.push(FeedCommand::ScheduleReconnect {
            timer,
            delay: self.config.reconnect_delay,
        });
    }

    fn cancel_reconnect(&mut self, commands: &mut Vec<FeedCommand>) {
        if self.reconnect_timer.take().is_some() {
            commands.push(FeedCommand::CancelReconnect);
        }
    }

    fn schedule_data_timeout(&mut self, commands: &mut Vec<FeedCommand>) {
        let timer = self.next_id();
        self.data_timer = Some(timer);
        commands.push(FeedCommand::ScheduleDataTimeout {
            timer,
            delay: self.config.data_timeout,
        });
    }

    fn cancel_data_timeout(&mut self, commands: &mut Vec<FeedCommand>) {
        if self.data_timer.take().is_some() {
            commands.push(FeedCommand::CancelDataTimeout);
        }
    }

    const fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}
