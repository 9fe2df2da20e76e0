//! Feed Manager
//!
//! Owns one [`FeedMachine`] and executes the commands it returns. Every input
//! (caller requests, transport callbacks, timer firings, fallback results) is
//! funnelled into a single task, so the machine sees a strict sequence of
//! events and the connection, timers and fetch it tracks cannot race.
//!
//! # Event Flow
//!
//! ```text
//!   FeedHandle ──control──┐
//!   transport  ──events───┤
//!   scheduler  ──events───┼──► FeedManager::run ──► FeedMachine::handle
//!   fetch task ──events───┘            │                    │
//!                                      │◄─── FeedCommands ──┘
//!                                      └──► watch::Sender<FeedSnapshot>
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::handle::{Control, FeedHandle};
use super::scheduler::{Scheduler, TimerKind};
use crate::application::ports::{
    ConnectionHandle, FallbackFetcher, StreamTransport, TransportEvent, TransportSink,
};
use crate::domain::connection::{
    ConnectionId, FeedCommand, FeedError, FeedEvent, FeedMachine, FeedSnapshot, FetchId,
    ReconnectConfig,
};
use crate::domain::feed::FeedEndpoints;
use crate::infrastructure::metrics::{self, FetchOutcome};

/// Capacity of the caller request channel.
const CONTROL_CAPACITY: usize = 32;

/// Single-task driver of a feed state machine.
pub struct FeedManager {
    machine: FeedMachine,
    transport: Arc<dyn StreamTransport>,
    fetcher: Arc<dyn FallbackFetcher>,
    scheduler: Scheduler,
    events_tx: mpsc::UnboundedSender<FeedEvent>,
    events_rx: mpsc::UnboundedReceiver<FeedEvent>,
    control_rx: mpsc::Receiver<Control>,
    state_tx: watch::Sender<FeedSnapshot>,
    connection: Option<(ConnectionId, ConnectionHandle)>,
    fetch_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    feed: String,
}

impl FeedManager {
    /// Create a manager and the handle that drives it.
    ///
    /// Nothing happens until [`run`](Self::run) is polled or
    /// [`spawn`](Self::spawn) is called.
    #[must_use]
    pub fn new(
        endpoints: FeedEndpoints,
        config: ReconnectConfig,
        transport: Arc<dyn StreamTransport>,
        fetcher: Arc<dyn FallbackFetcher>,
    ) -> (Self, FeedHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(FeedSnapshot::default());
        let feed = endpoints.kind().to_string();

        let manager = Self {
            machine: FeedMachine::new(endpoints, config),
            transport,
            fetcher,
            scheduler: Scheduler::new(events_tx.clone()),
            events_tx,
            events_rx,
            control_rx,
            state_tx,
            connection: None,
            fetch_task: None,
            cancel: CancellationToken::new(),
            feed,
        };

        (manager, FeedHandle::new(control_tx, state_rx))
    }

    /// Stop the manager when `cancel` fires, in addition to when every handle
    /// is dropped.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the manager on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until cancelled or every handle is dropped, then tear
    /// down the connection, timers and any in-flight fetch.
    pub async fn run(mut self) {
        tracing::info!(feed = %self.feed, "Feed manager started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!(feed = %self.feed, "Feed manager cancelled");
                    break;
                }
                Some(event) = self.events_rx.recv() => self.dispatch(event),
                control = self.control_rx.recv() => {
                    let Some(control) = control else {
                        tracing::debug!(feed = %self.feed, "All feed handles dropped");
                        break;
                    };
                    self.on_control(control);
                }
            }
        }

        self.shutdown();
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::Connect(subscription, reply) => {
                self.dispatch(FeedEvent::Connect(subscription));
                let _ = reply.send(());
            }
            Control::Disconnect(reply) => {
                self.dispatch(FeedEvent::Disconnect);
                let _ = reply.send(());
            }
            Control::Sync(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn dispatch(&mut self, event: FeedEvent) {
        if let FeedEvent::Transport {
            connection,
            event: TransportEvent::Message(_),
        } = &event
            && self.machine.connection() == Some(*connection)
        {
            metrics::record_message_received(&self.feed);
        }

        let last_update = self.machine.snapshot().updated_at;
        for command in self.machine.handle(event) {
            self.execute(command);
        }
        self.release_stale_connection();

        let snapshot = self.machine.snapshot();
        if snapshot.updated_at != last_update
            && let Some(source) = snapshot.source
        {
            metrics::record_payload_applied(&self.feed, source);
        }

        self.publish();
    }

    fn execute(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::Open { connection, url } => {
                let sink = TransportSink::new(connection, self.events_tx.clone());
                let handle = self.transport.open(&url, sink);
                if let Some((previous, _)) = self.connection.replace((connection, handle)) {
                    tracing::debug!(connection = previous, "Aborted superseded connection");
                }
            }
            FeedCommand::Close {
                connection,
                code,
                reason,
            } => {
                if let Some((_, handle)) = self.connection.take_if(|(id, _)| *id == connection) {
                    handle.close(code, reason);
                }
            }
            FeedCommand::ScheduleReconnect { timer, delay } => {
                metrics::record_reconnect(&self.feed);
                self.scheduler.schedule(
                    TimerKind::Reconnect,
                    delay,
                    FeedEvent::ReconnectDue { timer },
                );
            }
            FeedCommand::CancelReconnect => self.scheduler.cancel(TimerKind::Reconnect),
            FeedCommand::ScheduleDataTimeout { timer, delay } => {
                self.scheduler.schedule(
                    TimerKind::DataTimeout,
                    delay,
                    FeedEvent::DataTimeout { timer },
                );
            }
            FeedCommand::CancelDataTimeout => self.scheduler.cancel(TimerKind::DataTimeout),
            FeedCommand::Fetch { fetch, url } => self.spawn_fetch(fetch, url),
        }
    }

    /// Drop the handle of a connection the machine no longer tracks.
    fn release_stale_connection(&mut self) {
        if self
            .connection
            .as_ref()
            .is_some_and(|(id, _)| self.machine.connection() != Some(*id))
        {
            self.connection = None;
        }
    }

    fn spawn_fetch(&mut self, fetch: FetchId, url: Url) {
        if let Some(previous) = self.fetch_task.take() {
            previous.abort();
        }

        let fetcher = Arc::clone(&self.fetcher);
        let events = self.events_tx.clone();
        let feed = self.feed.clone();

        self.fetch_task = Some(tokio::spawn(async move {
            let result = fetcher.fetch(&url).await;
            let outcome = match &result {
                Ok(_) => FetchOutcome::Success,
                Err(FeedError::Http { .. }) => FetchOutcome::HttpError,
                Err(_) => FetchOutcome::Failed,
            };
            metrics::record_fallback(&feed, outcome);
            let _ = events.send(FeedEvent::FallbackCompleted { fetch, result });
        }));
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        let connected = snapshot.is_connected;
        let changed = self.state_tx.send_if_modified(|current| {
            if current == snapshot {
                return false;
            }
            *current = snapshot.clone();
            true
        });

        if changed {
            metrics::set_connected(&self.feed, connected);
        }
    }

    fn shutdown(&mut self) {
        self.dispatch(FeedEvent::Disconnect);
        self.scheduler.cancel_all();
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        tracing::info!(feed = %self.feed, "Feed manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{CloseRequest, MockFallbackFetcher, MockStreamTransport};
    use crate::application::services::ManagerError;
    use crate::domain::connection::{ConnectionState, PayloadSource};
    use crate::domain::feed::{FeedKind, SubscriptionOptions};
    use crate::domain::payload::Payload;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::oneshot;

    type Opened = Arc<Mutex<Vec<(Url, TransportSink, oneshot::Receiver<CloseRequest>)>>>;

    fn recording_transport() -> (MockStreamTransport, Opened) {
        let opened: Opened = Arc::default();
        let log = Arc::clone(&opened);
        let mut transport = MockStreamTransport::new();
        transport.expect_open().returning(move |url, sink| {
            let (close_tx, close_rx) = oneshot::channel();
            log.lock().push((url.clone(), sink, close_rx));
            ConnectionHandle::new(close_tx)
        });
        (transport, opened)
    }

    fn manager(
        transport: MockStreamTransport,
        fetcher: MockFallbackFetcher,
    ) -> (FeedHandle, JoinHandle<()>) {
        let endpoints =
            FeedEndpoints::new("ws://localhost:8000/ws", FeedKind::data(), "USDT").unwrap();
        let (manager, handle) = FeedManager::new(
            endpoints,
            ReconnectConfig::default(),
            Arc::new(transport),
            Arc::new(fetcher),
        );
        (handle, manager.spawn())
    }

    async fn settle(handle: &FeedHandle) {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        handle.sync().await.unwrap();
    }

    fn sink(opened: &Opened, index: usize) -> TransportSink {
        opened.lock()[index].1.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_opens_stream_url() {
        let (transport, opened) = recording_transport();
        let (handle, _task) = manager(transport, MockFallbackFetcher::new());

        handle.connect("btc", SubscriptionOptions::days(30)).await.unwrap();

        assert_eq!(opened.lock().len(), 1);
        assert_eq!(
            opened.lock()[0].0.as_str(),
            "ws://localhost:8000/ws/data?ticker=BTCUSDT&days=30"
        );
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Connecting);
        assert!(snapshot.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_symbol_is_rejected_before_reaching_manager() {
        let (transport, opened) = recording_transport();
        let (handle, _task) = manager(transport, MockFallbackFetcher::new());

        let err = handle
            .connect("BTC/USDT", SubscriptionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Subscription(_)));
        assert!(opened.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_payload_reaches_snapshot() {
        let (transport, opened) = recording_transport();
        let (handle, _task) = manager(transport, MockFallbackFetcher::new());
        handle.connect("BTC", SubscriptionOptions::days(30)).await.unwrap();

        let sink = sink(&opened, 0);
        sink.emit(TransportEvent::Opened);
        sink.emit(TransportEvent::Message(r#"[{"t":1,"p":100}]"#.to_string()));
        settle(&handle).await;

        let snapshot = handle.snapshot();
        assert!(snapshot.is_connected);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.source, Some(PayloadSource::Stream));
        assert_eq!(handle.payload().as_ref().map(Payload::len), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn data_timeout_uses_fallback_fetcher() {
        let (transport, _opened) = recording_transport();
        let mut fetcher = MockFallbackFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url.as_str() == "http://localhost:8000/api/data/BTCUSDT?days=30")
            .times(1)
            .returning(|_| Ok(json!([{"t": 1}, {"t": 2}])));
        let (handle, _task) = manager(transport, fetcher);

        handle.connect("BTC", SubscriptionOptions::days(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5001)).await;
        settle(&handle).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.source, Some(PayloadSource::Fallback));
        assert_eq!(snapshot.payload.as_ref().map(Payload::len), Some(2));
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.state, ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_with_normal_code() {
        let (transport, opened) = recording_transport();
        let (handle, _task) = manager(transport, MockFallbackFetcher::new());
        handle.connect("BTC", SubscriptionOptions::days(30)).await.unwrap();
        sink(&opened, 0).emit(TransportEvent::Opened);
        settle(&handle).await;

        handle.disconnect().await.unwrap();

        let close_rx = opened.lock().remove(0).2;
        assert_eq!(
            close_rx.await,
            Ok(CloseRequest {
                code: 1000,
                reason: "client disconnect"
            })
        );
        assert_eq!(handle.snapshot().state, ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_manager() {
        let (transport, opened) = recording_transport();
        let (handle, task) = manager(transport, MockFallbackFetcher::new());
        handle.connect("BTC", SubscriptionOptions::days(30)).await.unwrap();

        let watcher = handle.watch();
        drop(handle);
        task.await.unwrap();

        assert_eq!(watcher.borrow().state, ConnectionState::Idle);
        let close_rx = opened.lock().remove(0).2;
        assert!(close_rx.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_token_stops_manager() {
        let (transport, _opened) = recording_transport();
        let endpoints =
            FeedEndpoints::new("ws://localhost:8000/ws", FeedKind::LivePrice, "USDT").unwrap();
        let cancel = CancellationToken::new();
        let (manager, handle) = FeedManager::new(
            endpoints,
            ReconnectConfig::default(),
            Arc::new(transport),
            Arc::new(MockFallbackFetcher::new()),
        );
        let task = manager.with_cancellation(cancel.clone()).spawn();

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(handle.sync().await, Err(ManagerError::Stopped));
    }
}
