//! # Session Transport
//!
//! The WebSocket connection to the tutoring backend: connect, typed message
//! send/receive, fail-fast error handling, and orderly teardown. One
//! transport serves exactly one live session; there is no automatic
//! reconnect; a fresh instance is required to connect again.
//!
//! ## Wire Protocol (JSON, one object per frame):
//! - **Client → Server**: `{"type": "video", "data": "<base64 JPEG>"}`,
//!   `{"type": "audio", "data": "<base64 16-bit PCM @16kHz mono>"}`,
//!   `{"type": "text_input", "payload": "<string>"}`
//! - **Server → Client**: `{"type": "stream_start"}`,
//!   `{"type": "text", "data": "<fragment>"}`,
//!   `{"type": "audio", "data": "<base64 16-bit PCM @24kHz mono>"}`,
//!   `{"type": "stream_end"}`
//!
//! ## Structure:
//! `connect()` splits the socket and spawns two pumps: a send pump draining
//! an outbound channel into the sink, and a receive pump parsing inbound
//! frames into `TransportEvent`s. Sends while the transport is not OPEN are
//! dropped with a logged warning (live media is worth nothing late; see the
//! capture pipeline). Malformed inbound JSON is logged and dropped
//! per-message; it never terminates the session.

use crate::error::{SessionError, SessionResult};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, warn};

/// Messages this client sends to the tutoring backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// One compressed camera frame
    #[serde(rename = "video")]
    Video {
        /// Base64-encoded JPEG bytes
        data: String,
    },

    /// One block of microphone audio
    #[serde(rename = "audio")]
    Audio {
        /// Base64-encoded 16-bit LE PCM at the capture rate
        data: String,
    },

    /// A typed chat message from the student
    #[serde(rename = "text_input")]
    TextInput { payload: String },
}

/// Messages the tutoring backend sends to this client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// A new tutor response stream is starting
    #[serde(rename = "stream_start")]
    StreamStart,

    /// A text fragment of the current tutor response
    #[serde(rename = "text")]
    Text { data: String },

    /// A block of tutor audio for the playback queue
    #[serde(rename = "audio")]
    Audio {
        /// Base64-encoded 16-bit LE PCM at the playback rate
        data: String,
    },

    /// The current tutor response stream is complete
    #[serde(rename = "stream_end")]
    StreamEnd,
}

/// Connection lifecycle state.
///
/// Closed is terminal: once a transport leaves Open it never goes back, and
/// the owning session must build a fresh transport to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Closed,
    Connecting,
    Open,
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Closed => "closed",
            TransportState::Connecting => "connecting",
            TransportState::Open => "open",
        }
    }
}

/// What the receive pump reports to the owning session.
#[derive(Debug)]
pub enum TransportEvent {
    /// A well-formed inbound message
    Inbound(ServerMessage),
    /// The connection is gone (clean close, error, or peer drop). Emitted
    /// exactly once; the transport is Closed afterwards.
    Closed { reason: String },
}

/// Cheap cloneable sender handle given to the capture pipeline.
///
/// Every send checks the shared state first: producers drop samples rather
/// than buffering toward a socket that cannot take them.
#[derive(Clone)]
pub struct TransportHandle {
    state: Arc<RwLock<TransportState>>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    dropped: Arc<AtomicU64>,
}

impl TransportHandle {
    /// Whether the socket is currently open for business.
    pub fn is_open(&self) -> bool {
        *self.state.read().unwrap() == TransportState::Open
    }

    /// Queue one message for transmission.
    ///
    /// ## Returns:
    /// - **true**: accepted by the send pump
    /// - **false**: transport not OPEN (or pump gone); the message was
    ///   dropped, counted and logged; never buffered, never retried
    pub fn send(&self, message: ClientMessage) -> bool {
        if !self.is_open() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Dropping outbound message, transport is {}",
                self.state.read().unwrap().as_str()
            );
            return false;
        }
        if self.outbound.send(message).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping outbound message, send pump has exited");
            return false;
        }
        true
    }

    /// Messages dropped because the transport was not open.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
impl TransportHandle {
    /// Detached handle for exercising producers without a socket.
    pub(crate) fn new_for_tests(
        state: TransportState,
    ) -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = Self {
            state: Arc::new(RwLock::new(state)),
            outbound,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (handle, rx)
    }
}

/// One live WebSocket connection to the tutoring backend.
pub struct SessionTransport {
    state: Arc<RwLock<TransportState>>,
    handle: TransportHandle,
    shutdown: tokio::sync::watch::Sender<bool>,
    send_pump: JoinHandle<()>,
    recv_pump: JoinHandle<()>,
}

impl SessionTransport {
    /// Open the socket and start both pumps.
    ///
    /// ## Parameters:
    /// - **target**: full connection URL (identity segments already encoded)
    /// - **events**: channel the receive pump reports into
    ///
    /// ## Returns:
    /// The transport in the Open state, or `Connect` when the handshake
    /// fails. There is no retry here by design.
    pub async fn connect(
        target: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> SessionResult<Self> {
        let state = Arc::new(RwLock::new(TransportState::Connecting));
        info!("Connecting session transport to {}", target);

        let (ws_stream, _response) = connect_async(target)
            .await
            .map_err(|e| {
                *state.write().unwrap() = TransportState::Closed;
                SessionError::Connect(e.to_string())
            })?;

        *state.write().unwrap() = TransportState::Open;
        info!("Session transport open");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

        // Send pump: serialize and transmit until told to shut down, the
        // channel closes, or the sink fails. Always emits a close frame on
        // the way out.
        let send_state = state.clone();
        let send_pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_message = outbound_rx.recv() => {
                        let message = match maybe_message {
                            Some(message) => message,
                            None => break,
                        };
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Failed to serialize outbound message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_tx.send(tungstenite::Message::Text(json.into())).await {
                            warn!("Send pump stopping: {}", e);
                            *send_state.write().unwrap() = TransportState::Closed;
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Send pump closing socket");
            let _ = ws_tx.close().await;
        });

        // Receive pump: parse and dispatch until the peer closes or errors.
        // Exactly one Closed event is emitted at the end.
        let recv_state = state.clone();
        let recv_pump = tokio::spawn(async move {
            let reason = loop {
                let frame = match ws_rx.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => break format!("socket error: {}", e),
                    None => break "connection dropped".to_string(),
                };

                match frame {
                    tungstenite::Message::Text(text) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(message) => {
                                if events.send(TransportEvent::Inbound(message)).is_err() {
                                    // Session is gone; nothing left to feed.
                                    break "event receiver dropped".to_string();
                                }
                            }
                            Err(e) => {
                                // Per-message drop; the session stays up.
                                warn!("Dropping malformed server payload: {}", e);
                            }
                        }
                    }
                    tungstenite::Message::Close(frame) => {
                        break match frame {
                            Some(frame) => format!("closed by server: {}", frame.reason),
                            None => "closed by server".to_string(),
                        };
                    }
                    tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => {
                        // Keepalive handled by tungstenite.
                    }
                    other => {
                        debug!("Ignoring unexpected frame: {:?}", other);
                    }
                }
            };

            *recv_state.write().unwrap() = TransportState::Closed;
            info!("Session transport closed: {}", reason);
            let _ = events.send(TransportEvent::Closed { reason });
        });

        let handle = TransportHandle {
            state: state.clone(),
            outbound: outbound_tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        Ok(Self {
            state,
            handle,
            shutdown: shutdown_tx,
            send_pump,
            recv_pump,
        })
    }

    pub fn state(&self) -> TransportState {
        *self.state.read().unwrap()
    }

    /// Sender handle for the capture pipeline and chat input.
    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Tear the connection down.
    ///
    /// Marks the transport Closed (new sends drop immediately), signals the
    /// send pump to stop and emit a close frame, then detaches the receive
    /// pump. Outstanding handle clones held by producers become inert
    /// droppers rather than keeping the socket alive.
    pub async fn close(mut self) {
        *self.state.write().unwrap() = TransportState::Closed;
        let _ = self.shutdown.send(true);

        if let Err(e) = (&mut self.send_pump).await {
            if !e.is_cancelled() {
                warn!("Send pump ended abnormally: {}", e);
            }
        }
        // The receive pump ends on the close frame echo or socket drop.
        self.recv_pump.abort();
        debug!("Session transport torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_client_message_wire_format() {
        let json = serde_json::to_string(&ClientMessage::Video {
            data: "abc123".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"video","data":"abc123"}"#);

        let json = serde_json::to_string(&ClientMessage::TextInput {
            payload: "hello".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"text_input","payload":"hello"}"#);
    }

    #[test]
    fn test_server_message_wire_format() {
        let message: ServerMessage =
            serde_json::from_str(r#"{"type":"stream_start"}"#).unwrap();
        assert_eq!(message, ServerMessage::StreamStart);

        let message: ServerMessage =
            serde_json::from_str(r#"{"type":"text","data":"hi"}"#).unwrap();
        assert_eq!(
            message,
            ServerMessage::Text {
                data: "hi".to_string()
            }
        );

        assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"bogus"}"#).is_err());
    }

    /// End-to-end against an in-process server: inbound dispatch order,
    /// malformed-payload drop, and the single Closed event.
    #[tokio::test]
    async fn test_dispatch_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            for payload in [
                r#"{"type":"stream_start"}"#,
                r#"{"type":"text","data":"A"}"#,
                r#"this is not json"#,
                r#"{"type":"text","data":"B"}"#,
                r#"{"type":"stream_end"}"#,
            ] {
                ws.send(tungstenite::Message::Text(payload.to_string().into()))
                    .await
                    .unwrap();
            }

            // Expect one client frame back, then close.
            let frame = ws.next().await.unwrap().unwrap();
            let echoed = match frame {
                tungstenite::Message::Text(text) => text.to_string(),
                other => panic!("unexpected frame {:?}", other),
            };
            ws.close(None).await.unwrap();
            echoed
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = SessionTransport::connect(&format!("ws://{}", addr), events_tx)
            .await
            .unwrap();
        assert_eq!(transport.state(), TransportState::Open);

        let handle = transport.handle();
        assert!(handle.send(ClientMessage::TextInput {
            payload: "ready".to_string(),
        }));

        let mut inbound = Vec::new();
        let mut closed_reasons = Vec::new();
        while let Some(event) = events_rx.recv().await {
            match event {
                TransportEvent::Inbound(message) => inbound.push(message),
                TransportEvent::Closed { reason } => {
                    closed_reasons.push(reason);
                    break;
                }
            }
        }

        // The malformed payload was dropped; order of the rest is preserved.
        assert_eq!(
            inbound,
            vec![
                ServerMessage::StreamStart,
                ServerMessage::Text {
                    data: "A".to_string()
                },
                ServerMessage::Text {
                    data: "B".to_string()
                },
                ServerMessage::StreamEnd,
            ]
        );
        assert_eq!(closed_reasons.len(), 1);

        let echoed = server.await.unwrap();
        assert!(echoed.contains("text_input"));

        transport.close().await;
    }

    #[tokio::test]
    async fn test_send_drops_when_not_open() {
        let (handle, mut outbound_rx) = TransportHandle::new_for_tests(TransportState::Closed);

        assert!(!handle.send(ClientMessage::Audio {
            data: "AAAA".to_string(),
        }));
        assert_eq!(handle.dropped_count(), 1);
        assert!(outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_fail_fast() {
        // Bind-then-drop guarantees nothing is listening on the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let result = SessionTransport::connect(&format!("ws://{}", addr), events_tx).await;
        assert!(matches!(result, Err(SessionError::Connect(_))));
    }
}
