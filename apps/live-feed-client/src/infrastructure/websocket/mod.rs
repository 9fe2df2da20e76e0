//! WebSocket Transport
//!
//! tokio-tungstenite implementation of [`StreamTransport`]. Each connection
//! runs on its own task and translates socket activity into
//! [`TransportEvent`]s:
//!
//! | Socket activity              | Events                          |
//! |------------------------------|---------------------------------|
//! | Handshake succeeds           | `Opened`                        |
//! | Handshake fails              | `Error`, `Closed(1006)`         |
//! | Text or UTF-8 binary frame   | `Message`                       |
//! | Close frame                  | `Closed(code)` (1005 if absent) |
//! | Read error                   | `Error`, `Closed(1006)`         |
//! | Stream ends without close    | `Closed(1006)`                  |
//!
//! A connection closed through its handle sends a close frame and reports
//! nothing further.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use url::Url;

use crate::application::ports::{
    CloseRequest, ConnectionHandle, StreamTransport, TransportEvent, TransportSink,
};
use crate::domain::connection::{CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL};

/// WebSocket stream transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Create a transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl StreamTransport for WsTransport {
    fn open(&self, url: &Url, sink: TransportSink) -> ConnectionHandle {
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_connection(url.clone(), sink, close_rx));
        ConnectionHandle::new(close_tx).with_task(task)
    }
}

async fn run_connection(
    url: Url,
    sink: TransportSink,
    mut close_rx: oneshot::Receiver<CloseRequest>,
) {
    let connection = sink.connection();
    if sink.is_closed() {
        tracing::debug!(connection, "Manager stopped before connecting");
        return;
    }
    tracing::debug!(%url, connection, "Connecting to stream");

    let ws_stream = tokio::select! {
        _ = &mut close_rx => {
            tracing::debug!(connection, "Connection closed before handshake completed");
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                tracing::warn!(%url, connection, error = %e, "WebSocket handshake failed");
                sink.emit(TransportEvent::Error(e.to_string()));
                sink.emit(TransportEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: String::new(),
                });
                return;
            }
        }
    };

    if !sink.emit(TransportEvent::Opened) {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            request = &mut close_rx => {
                let request = request.unwrap_or(CloseRequest {
                    code: CLOSE_NORMAL,
                    reason: "",
                });
                let frame = CloseFrame {
                    code: CloseCode::from(request.code),
                    reason: Utf8Bytes::from_static(request.reason),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    tracing::debug!(connection, error = %e, "Failed to send close frame");
                }
                tracing::debug!(connection, code = request.code, "Connection closed locally");
                return;
            }
            frame = read.next() => {
                let delivered = match frame {
                    Some(Ok(Message::Text(text))) => {
                        sink.emit(TransportEvent::Message(text.as_str().to_owned()))
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => sink.emit(TransportEvent::Message(text)),
                        Err(_) => {
                            tracing::debug!(
                                connection,
                                len = data.len(),
                                "Ignoring non-UTF-8 binary frame"
                            );
                            true
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (CLOSE_NO_STATUS, String::new()),
                            |f| (u16::from(f.code), f.reason.as_str().to_owned()),
                        );
                        tracing::debug!(connection, code, %reason, "Server sent close frame");
                        sink.emit(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Some(Ok(_)) => true,
                    Some(Err(e)) => {
                        sink.emit(TransportEvent::Error(e.to_string()));
                        sink.emit(TransportEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: String::new(),
                        });
                        return;
                    }
                    None => {
                        sink.emit(TransportEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                };

                if !delivered {
                    tracing::debug!(connection, "Manager stopped, dropping connection");
                    return;
                }
            }
        }
    }
}
