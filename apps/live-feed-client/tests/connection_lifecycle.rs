//! Connection Lifecycle Integration Tests
//!
//! Drives a running feed manager through in-memory transport and fallback
//! fakes with a paused clock, checking reconnect timing, fallback triggers
//! and teardown as a caller observes them.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use live_feed_client::{
    CloseRequest, ConnectionHandle, ConnectionState, FallbackFetcher, FeedEndpoints, FeedError,
    FeedHandle, FeedKind, FeedManager, Payload, PayloadSource, ReconnectConfig, StreamTransport,
    SubscriptionOptions, TransportEvent, TransportSink,
};

// =============================================================================
// Fakes
// =============================================================================

struct Connection {
    url: Url,
    sink: TransportSink,
    close: Option<oneshot::Receiver<CloseRequest>>,
}

#[derive(Clone, Default)]
struct FakeTransport {
    opened: Arc<Mutex<Vec<Connection>>>,
}

impl FakeTransport {
    fn count(&self) -> usize {
        self.opened.lock().len()
    }

    fn url(&self, index: usize) -> Url {
        self.opened.lock()[index].url.clone()
    }

    fn emit(&self, index: usize, event: TransportEvent) {
        let sink = self.opened.lock()[index].sink.clone();
        sink.emit(event);
    }

    fn fail(&self, index: usize) {
        self.emit(index, TransportEvent::Error("connection refused".to_string()));
        self.emit(
            index,
            TransportEvent::Closed {
                code: 1006,
                reason: String::new(),
            },
        );
    }

    fn take_close(&self, index: usize) -> oneshot::Receiver<CloseRequest> {
        self.opened.lock()[index].close.take().unwrap()
    }
}

impl StreamTransport for FakeTransport {
    fn open(&self, url: &Url, sink: TransportSink) -> ConnectionHandle {
        let (close_tx, close_rx) = oneshot::channel();
        self.opened.lock().push(Connection {
            url: url.clone(),
            sink,
            close: Some(close_rx),
        });
        ConnectionHandle::new(close_tx)
    }
}

#[derive(Clone, Default)]
struct FakeFetcher {
    responses: Arc<Mutex<VecDeque<Result<Value, FeedError>>>>,
    calls: Arc<Mutex<Vec<Url>>>,
}

impl FakeFetcher {
    fn respond(&self, response: Result<Value, FeedError>) {
        self.responses.lock().push_back(response);
    }

    fn calls(&self) -> Vec<Url> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl FallbackFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<Value, FeedError> {
        self.calls.lock().push(url.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(FeedError::Network("no scripted response".to_string())))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    handle: FeedHandle,
    transport: FakeTransport,
    fetcher: FakeFetcher,
    _task: JoinHandle<()>,
}

impl Harness {
    fn start(kind: FeedKind) -> Self {
        Self::with_config(kind, ReconnectConfig::default())
    }

    fn with_config(kind: FeedKind, config: ReconnectConfig) -> Self {
        let transport = FakeTransport::default();
        let fetcher = FakeFetcher::default();
        let endpoints = FeedEndpoints::new("ws://localhost:8000/ws", kind, "USDT").unwrap();
        let (manager, handle) = FeedManager::new(
            endpoints,
            config,
            Arc::new(transport.clone()),
            Arc::new(fetcher.clone()),
        );

        Self {
            handle,
            transport,
            fetcher,
            _task: manager.spawn(),
        }
    }

    async fn connect(&self, symbol: &str, days: u32) {
        self.handle
            .connect(symbol, SubscriptionOptions::days(days))
            .await
            .unwrap();
    }

    /// Let spawned tasks run, then wait for the manager to drain its queue.
    async fn settle(&self) {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        self.handle.sync().await.unwrap();
    }

    async fn advance(&self, millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.settle().await;
    }
}

fn no_data_timeout() -> ReconnectConfig {
    ReconnectConfig {
        data_timeout: Duration::from_secs(3600),
        ..ReconnectConfig::default()
    }
}

// =============================================================================
// Reconnection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_after_fixed_delay() {
    let h = Harness::start(FeedKind::data());
    h.connect("BTC", 30).await;
    h.transport.emit(0, TransportEvent::Opened);
    h.transport.emit(
        0,
        TransportEvent::Closed {
            code: 1006,
            reason: String::new(),
        },
    );
    h.settle().await;

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Closed);
    assert!(!snapshot.is_connected);
    assert!(matches!(
        snapshot.error,
        Some(FeedError::CloseAbnormal { code: 1006, .. })
    ));

    h.advance(999).await;
    assert_eq!(h.transport.count(), 1);

    h.advance(2).await;
    assert_eq!(h.transport.count(), 2);
    assert_eq!(h.transport.url(1), h.transport.url(0));
    assert_eq!(h.handle.snapshot().state, ConnectionState::Connecting);
    assert!(h.handle.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn normal_close_stays_closed() {
    for code in [1000, 1001] {
        let h = Harness::start(FeedKind::data());
        h.connect("BTC", 30).await;
        h.transport.emit(0, TransportEvent::Opened);
        h.transport.emit(
            0,
            TransportEvent::Closed {
                code,
                reason: "bye".to_string(),
            },
        );

        h.advance(10_000).await;
        assert_eq!(h.transport.count(), 1);
        assert_eq!(h.handle.snapshot().state, ConnectionState::Closed);
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_attempts_continue_without_limit() {
    let h = Harness::with_config(FeedKind::LivePrice, no_data_timeout());
    h.connect("ETH", 1).await;

    for attempt in 0..10 {
        h.transport.fail(attempt);
        h.advance(1001).await;
    }

    assert_eq!(h.transport.count(), 11);
    assert!(h.fetcher.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let h = Harness::start(FeedKind::data());
    h.connect("BTC", 30).await;
    h.transport.fail(0);
    h.settle().await;

    h.handle.disconnect().await.unwrap();
    h.advance(10_000).await;

    assert_eq!(h.transport.count(), 1);
    assert_eq!(h.handle.snapshot().state, ConnectionState::Idle);
    assert!(h.fetcher.calls().is_empty());
}

// =============================================================================
// Fallback
// =============================================================================

#[tokio::test(start_paused = true)]
async fn error_at_attempt_threshold_issues_fallback() {
    let h = Harness::with_config(FeedKind::data(), no_data_timeout());
    h.fetcher.respond(Ok(json!([{"t": 1, "p": 100}, {"t": 2, "p": 101}])));
    h.connect("BTC", 30).await;

    for attempt in 0..3 {
        h.transport.fail(attempt);
        h.advance(1001).await;
        assert!(h.fetcher.calls().is_empty());
    }

    h.transport
        .emit(3, TransportEvent::Error("connection refused".to_string()));
    h.settle().await;

    assert_eq!(
        h.fetcher
            .calls()
            .iter()
            .map(Url::as_str)
            .collect::<Vec<_>>(),
        vec!["http://localhost:8000/api/data/BTCUSDT?days=30"]
    );
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.source, Some(PayloadSource::Fallback));
    assert_eq!(snapshot.payload.as_ref().map(Payload::len), Some(2));
    assert!(!snapshot.is_loading);
}

#[tokio::test(start_paused = true)]
async fn silent_stream_falls_back_after_data_timeout() {
    let h = Harness::start(FeedKind::raw_data());
    h.fetcher.respond(Ok(json!([{"close": 1.5}])));
    h.connect("SOL", 7).await;
    h.transport.emit(0, TransportEvent::Opened);

    h.advance(4999).await;
    assert!(h.fetcher.calls().is_empty());
    assert!(h.handle.is_loading());

    h.advance(2).await;
    assert_eq!(
        h.fetcher.calls()[0].as_str(),
        "http://localhost:8000/api/raw-data/SOLUSDT?days=7"
    );
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.source, Some(PayloadSource::Fallback));
    assert!(snapshot.is_connected);
    assert_eq!(
        snapshot.state,
        ConnectionState::Open {
            awaiting_first_payload: true
        }
    );
}

#[tokio::test(start_paused = true)]
async fn first_payload_disarms_data_timeout() {
    let h = Harness::start(FeedKind::data());
    h.connect("BTC", 30).await;
    h.transport.emit(0, TransportEvent::Opened);
    h.transport
        .emit(0, TransportEvent::Message(r#"[{"t":1}]"#.to_string()));

    h.advance(10_000).await;
    assert!(h.fetcher.calls().is_empty());
    assert_eq!(h.handle.snapshot().source, Some(PayloadSource::Stream));
}

#[tokio::test(start_paused = true)]
async fn http_error_from_fallback_stops_reconnecting() {
    let h = Harness::start(FeedKind::data());
    h.fetcher.respond(Err(FeedError::Http { status: 502 }));
    h.connect("BTC", 30).await;

    h.advance(5001).await;
    assert_eq!(h.handle.error(), Some(FeedError::Http { status: 502 }));
    assert!(!h.handle.is_loading());

    h.transport.fail(0);
    h.advance(10_000).await;
    assert_eq!(h.transport.count(), 1);
    assert_eq!(h.handle.snapshot().state, ConnectionState::Closed);

    // A new explicit connect starts a fresh sequence.
    h.connect("BTC", 30).await;
    assert_eq!(h.transport.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn stream_delivering_after_http_error_keeps_reconnecting() {
    let h = Harness::start(FeedKind::data());
    h.fetcher.respond(Err(FeedError::Http { status: 503 }));
    h.connect("BTC", 30).await;
    h.transport.emit(0, TransportEvent::Opened);

    h.advance(5001).await;
    assert_eq!(h.handle.error(), Some(FeedError::Http { status: 503 }));

    h.transport
        .emit(0, TransportEvent::Message(r#"[{"t":1}]"#.to_string()));
    h.transport.emit(
        0,
        TransportEvent::Closed {
            code: 1006,
            reason: String::new(),
        },
    );
    h.advance(1001).await;

    assert_eq!(h.transport.count(), 2);
    assert_eq!(h.handle.snapshot().source, Some(PayloadSource::Stream));
}

#[tokio::test(start_paused = true)]
async fn price_feed_never_falls_back() {
    let h = Harness::start(FeedKind::LivePrice);
    h.connect("BTC", 1).await;

    h.advance(6000).await;
    for attempt in 0..5 {
        h.transport.fail(attempt);
        h.advance(1001).await;
    }

    assert!(h.fetcher.calls().is_empty());
    assert!(h.handle.is_loading());
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test(start_paused = true)]
async fn repeated_connect_opens_one_connection() {
    let h = Harness::start(FeedKind::data());
    for _ in 0..3 {
        h.connect("BTC", 30).await;
    }
    h.transport.emit(0, TransportEvent::Opened);
    h.settle().await;
    h.connect("btc", 30).await;

    assert_eq!(h.transport.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscription_change_ignores_late_frames() {
    let h = Harness::start(FeedKind::LivePrice);
    h.connect("BTC", 1).await;
    h.transport.emit(0, TransportEvent::Opened);
    h.settle().await;

    h.connect("ETH", 1).await;
    assert_eq!(
        h.transport.take_close(0).await,
        Ok(CloseRequest {
            code: 1000,
            reason: "subscription changed"
        })
    );
    assert_eq!(
        h.transport.url(1).as_str(),
        "ws://localhost:8000/ws/live-price?ticker=ETHUSDT"
    );

    h.transport.emit(
        0,
        TransportEvent::Message(r#"{"symbol":"BTC","price":97000}"#.to_string()),
    );
    h.settle().await;
    assert!(h.handle.payload().is_none());

    h.transport.emit(1, TransportEvent::Opened);
    h.transport.emit(
        1,
        TransportEvent::Message(r#"{"symbol":"ETH","price":3500.5}"#.to_string()),
    );
    h.settle().await;
    assert_eq!(
        h.handle.payload().as_ref().and_then(Payload::price),
        Some(3500.5)
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_then_connect_opens_exactly_one_connection() {
    let h = Harness::start(FeedKind::data());
    h.connect("BTC", 30).await;
    h.transport.emit(0, TransportEvent::Opened);
    h.settle().await;

    h.handle.disconnect().await.unwrap();
    h.handle.disconnect().await.unwrap();
    h.connect("BTC", 30).await;
    h.advance(2000).await;

    assert_eq!(h.transport.count(), 2);
    assert_eq!(h.handle.snapshot().state, ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_only_records_error() {
    let h = Harness::start(FeedKind::data());
    h.connect("BTC", 30).await;
    h.transport.emit(0, TransportEvent::Opened);
    h.transport
        .emit(0, TransportEvent::Message(r#"[{"t":1}]"#.to_string()));
    h.settle().await;
    let before = h.handle.snapshot();

    h.transport
        .emit(0, TransportEvent::Message("{not json".to_string()));
    h.settle().await;

    let after = h.handle.snapshot();
    assert!(matches!(after.error, Some(FeedError::Parse(_))));
    assert_eq!(after.payload, before.payload);
    assert_eq!(after.state, before.state);
    assert_eq!(after.is_connected, before.is_connected);
    assert_eq!(after.is_loading, before.is_loading);
}

#[tokio::test(start_paused = true)]
async fn watchers_see_every_transition() {
    let h = Harness::start(FeedKind::data());
    let mut rx = h.handle.watch();

    h.connect("BTC", 30).await;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().state, ConnectionState::Connecting);

    h.transport.emit(0, TransportEvent::Opened);
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_connected);

    h.transport
        .emit(0, TransportEvent::Message(r#"[{"t":1}]"#.to_string()));
    rx.changed().await.unwrap();
    assert!(!rx.borrow_and_update().is_loading);
}
