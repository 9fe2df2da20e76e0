//! Feed Handle
//!
//! Caller-facing API of a running [`FeedManager`](super::FeedManager).
//! Requests are processed in the order they are sent; state is observed
//! through a `watch` channel that always holds the latest snapshot.

use tokio::sync::{mpsc, oneshot, watch};

use crate::domain::connection::{FeedError, FeedSnapshot};
use crate::domain::feed::{Subscription, SubscriptionError, SubscriptionOptions};
use crate::domain::payload::Payload;

/// Errors returned by [`FeedHandle`] requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    /// Manager task is no longer running.
    #[error("feed manager has stopped")]
    Stopped,
    /// Subscription parameters are invalid.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

/// Request sent from a handle to the manager task.
#[derive(Debug)]
pub(super) enum Control {
    Connect(Subscription, oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    Sync(oneshot::Sender<()>),
}

/// Handle to a running feed manager.
///
/// Cheap to clone. The manager disconnects and stops once every handle has
/// been dropped.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    control: mpsc::Sender<Control>,
    state: watch::Receiver<FeedSnapshot>,
}

impl FeedHandle {
    pub(super) const fn new(
        control: mpsc::Sender<Control>,
        state: watch::Receiver<FeedSnapshot>,
    ) -> Self {
        Self { control, state }
    }

    /// Stream `symbol` with `options`.
    ///
    /// No-op if the same subscription is already connecting or open. A
    /// different subscription replaces the current one. Returns once the
    /// manager has applied the request.
    pub async fn connect(
        &self,
        symbol: &str,
        options: SubscriptionOptions,
    ) -> Result<(), ManagerError> {
        let subscription = Subscription::new(symbol, options)?;
        self.subscribe(subscription).await
    }

    /// Stream a validated subscription. See [`connect`](Self::connect).
    pub async fn subscribe(&self, subscription: Subscription) -> Result<(), ManagerError> {
        self.request(|reply| Control::Connect(subscription, reply))
            .await
    }

    /// Close the connection and cancel all pending timers. Idempotent.
    ///
    /// The last payload stays visible in the snapshot.
    pub async fn disconnect(&self) -> Result<(), ManagerError> {
        self.request(Control::Disconnect).await
    }

    /// Wait until the manager has processed every request sent before this
    /// one and every event queued at the time it is handled.
    pub async fn sync(&self) -> Result<(), ManagerError> {
        self.request(Control::Sync).await
    }

    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.state.clone()
    }

    /// Latest payload.
    #[must_use]
    pub fn payload(&self) -> Option<Payload> {
        self.state.borrow().payload.clone()
    }

    /// Whether the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected
    }

    /// Whether data for the subscription is still being fetched.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    /// Last observed failure.
    #[must_use]
    pub fn error(&self) -> Option<FeedError> {
        self.state.borrow().error.clone()
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<()>) -> Control,
    ) -> Result<(), ManagerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(build(reply_tx))
            .await
            .map_err(|_| ManagerError::Stopped)?;
        reply_rx.await.map_err(|_| ManagerError::Stopped)
    }
}
