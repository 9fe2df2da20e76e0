//! Stream Transport Port (Driven Port)
//!
//! Interface for opening streaming connections. A transport runs each
//! connection on its own task and reports [`TransportEvent`]s through the
//! [`TransportSink`] it was given; the manager keeps the returned
//! [`ConnectionHandle`] to close or abort it.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use crate::domain::connection::{ConnectionId, FeedEvent, TransportEvent};

/// Port for streaming connections.
#[cfg_attr(test, mockall::automock)]
pub trait StreamTransport: Send + Sync {
    /// Start connecting to `url`. Must be called inside a Tokio runtime.
    ///
    /// The connection reports `Opened`, `Message`, `Error` and `Closed`
    /// through `sink`. `Closed` is the last event of every connection that
    /// was not closed locally.
    fn open(&self, url: &Url, sink: TransportSink) -> ConnectionHandle;
}

/// Delivers transport callbacks for one connection to the manager.
#[derive(Debug, Clone)]
pub struct TransportSink {
    connection: ConnectionId,
    events: mpsc::UnboundedSender<FeedEvent>,
}

impl TransportSink {
    /// Create a sink tagging events with `connection`.
    #[must_use]
    pub const fn new(connection: ConnectionId, events: mpsc::UnboundedSender<FeedEvent>) -> Self {
        Self { connection, events }
    }

    /// Connection this sink reports for.
    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Report an event. Returns `false` once the manager has stopped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events
            .send(FeedEvent::Transport {
                connection: self.connection,
                event,
            })
            .is_ok()
    }

    /// Check if the manager has stopped listening.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Local request to close a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseRequest {
    /// Close code to send.
    pub code: u16,
    /// Close reason to send.
    pub reason: &'static str,
}

/// Owner of one open connection.
///
/// [`close`](Self::close) asks the connection to close gracefully and lets
/// its task finish on its own. Dropping the handle without closing aborts the
/// task.
#[derive(Debug)]
pub struct ConnectionHandle {
    close: Option<oneshot::Sender<CloseRequest>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Create a handle around the connection's close channel.
    #[must_use]
    pub const fn new(close: oneshot::Sender<CloseRequest>) -> Self {
        Self {
            close: Some(close),
            task: None,
        }
    }

    /// Attach the task running the connection.
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Request a graceful close.
    pub fn close(mut self, code: u16, reason: &'static str) {
        if let Some(close) = self.close.take() {
            // Receiver is gone if the connection already ended.
            let _ = close.send(CloseRequest { code, reason });
        }
        // Detach so the task can send its close frame.
        self.task.take();
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
