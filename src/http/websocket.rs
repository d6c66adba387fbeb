//! WebSocket relay.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Dial the backend with the client's headers, minus handshake negotiation
//! - Pump frames in both directions, touching the activity clock per message
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - Text and Binary frames are forwarded with type and payload unchanged
//! - Ping/Pong are answered by each side's stack and not forwarded
//! - A Close frame is forwarded and ends that direction
//! - When one pump ends the other is stopped, then both sockets are closed

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::http::header::{
    CONNECTION, HOST, SEC_WEBSOCKET_EXTENSIONS, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};
use axum::http::HeaderMap;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as BackendCloseFrame;
use tokio_tungstenite::tungstenite::{Error as BackendError, Message as BackendMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::{TargetConfig, TimeoutConfig};
use crate::lifecycle::ActivityClock;
use crate::observability::metrics;

type BackendSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

const HANDSHAKE_HEADERS: [axum::http::HeaderName; 7] = [
    CONNECTION,
    UPGRADE,
    SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_VERSION,
    SEC_WEBSOCKET_PROTOCOL,
    SEC_WEBSOCKET_EXTENSIONS,
    HOST,
];

/// True when `Connection` carries the `upgrade` token and `Upgrade` is `websocket`.
pub fn is_websocket_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_upgrade && upgrade_websocket
}

/// Translate an HTTP base URL into its WebSocket form and append the request URI.
pub fn backend_ws_url(base_url: &str, path_and_query: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}{}", ws_base, path_and_query)
}

/// Client headers to forward on the backend dial.
pub fn filter_handshake_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in &HANDSHAKE_HEADERS {
        filtered.remove(name);
    }
    filtered
}

/// How one direction of a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEnd {
    /// A Close frame was relayed; carries its code.
    Closed(Option<u16>),
    /// The source stream ended without a Close frame.
    Dropped,
    /// Reading from the source failed.
    ReadFailed(String),
    /// Writing to the destination failed.
    WriteFailed(String),
    /// The sibling direction ended first.
    Stopped,
}

impl PumpEnd {
    /// Normal and going-away closes and plain drops are routine.
    pub fn is_expected(&self) -> bool {
        match self {
            PumpEnd::Closed(None) | PumpEnd::Dropped | PumpEnd::Stopped => true,
            PumpEnd::Closed(Some(code)) => {
                *code == close_code::NORMAL || *code == close_code::AWAY
            }
            PumpEnd::ReadFailed(_) => true,
            PumpEnd::WriteFailed(_) => false,
        }
    }
}

/// One message as seen by a pump.
enum Frame<M> {
    Data(M),
    Close { message: M, code: Option<u16> },
    Control,
}

fn client_to_backend(message: Message) -> Frame<BackendMessage> {
    match message {
        Message::Text(text) => Frame::Data(BackendMessage::Text(text.to_string().into())),
        Message::Binary(data) => Frame::Data(BackendMessage::Binary(data)),
        Message::Ping(_) | Message::Pong(_) => Frame::Control,
        Message::Close(frame) => {
            let code = frame.as_ref().map(|f| f.code);
            let frame = frame.map(|f| BackendCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.to_string().into(),
            });
            Frame::Close {
                message: BackendMessage::Close(frame),
                code,
            }
        }
    }
}

fn backend_to_client(message: BackendMessage) -> Frame<Message> {
    match message {
        BackendMessage::Text(text) => Frame::Data(Message::Text(text.to_string().into())),
        BackendMessage::Binary(data) => Frame::Data(Message::Binary(data)),
        BackendMessage::Ping(_) | BackendMessage::Pong(_) | BackendMessage::Frame(_) => {
            Frame::Control
        }
        BackendMessage::Close(frame) => {
            let code = frame.as_ref().map(|f| u16::from(f.code));
            let frame = frame.map(|f| CloseFrame {
                code: u16::from(f.code),
                reason: f.reason.to_string().into(),
            });
            Frame::Close {
                message: Message::Close(frame),
                code,
            }
        }
    }
}

/// Relays upgraded client sockets to the backend.
#[derive(Debug, Clone)]
pub struct WebSocketRelay {
    ws_base_url: String,
    handshake_timeout: Duration,
    clock: Arc<ActivityClock>,
}

impl WebSocketRelay {
    pub fn new(target: &TargetConfig, timeouts: &TimeoutConfig, clock: Arc<ActivityClock>) -> Self {
        Self {
            ws_base_url: target.normalized_base_url().to_string(),
            handshake_timeout: timeouts.ws_handshake(),
            clock,
        }
    }

    pub fn backend_url(&self, path_and_query: &str) -> String {
        backend_ws_url(&self.ws_base_url, path_and_query)
    }

    /// Run one relay session on an upgraded client socket.
    pub async fn run(&self, mut client: WebSocket, path_and_query: String, headers: HeaderMap) {
        let url = self.backend_url(&path_and_query);

        let backend = match self.dial(&url, &headers).await {
            Some(backend) => backend,
            None => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "Backend connection failed".into(),
                }));
                if let Err(e) = client.send(close).await {
                    tracing::debug!(error = %e, "Failed to send close frame to client");
                }
                return;
            }
        };

        metrics::websocket_session_opened();
        tracing::debug!(url = %url, "WebSocket session established");

        self.relay(client, backend).await;

        metrics::websocket_session_closed();
        tracing::debug!(url = %url, "WebSocket session ended");
    }

    async fn dial(&self, url: &str, headers: &HeaderMap) -> Option<BackendSocket> {
        let mut request = match url.into_client_request() {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(url = %url, error = %e, "Invalid backend WebSocket URL");
                return None;
            }
        };
        for (name, value) in filter_handshake_headers(headers).iter() {
            request.headers_mut().append(name.clone(), value.clone());
        }

        match timeout(self.handshake_timeout, connect_async(request)).await {
            Ok(Ok((socket, _response))) => Some(socket),
            Ok(Err(BackendError::Http(response))) => {
                let body = response
                    .body()
                    .as_deref()
                    .map(String::from_utf8_lossy)
                    .unwrap_or_default();
                tracing::error!(
                    url = %url,
                    status = response.status().as_u16(),
                    headers = ?response.headers(),
                    body = %body,
                    "WebSocket dial rejected by backend"
                );
                None
            }
            Ok(Err(e)) => {
                tracing::error!(url = %url, error = %e, "WebSocket dial failed with no response");
                None
            }
            Err(_) => {
                tracing::error!(
                    url = %url,
                    timeout_secs = self.handshake_timeout.as_secs(),
                    "WebSocket dial timed out"
                );
                None
            }
        }
    }

    async fn relay(&self, client: WebSocket, backend: BackendSocket) {
        let (mut client_tx, client_rx) = client.split();
        let (mut backend_tx, backend_rx) = backend.split();
        let (stop_tx, stop_rx) = watch::channel(false);

        let (upstream, downstream) = tokio::join!(
            pump(
                "client_to_backend",
                client_rx,
                &mut backend_tx,
                client_to_backend,
                &stop_tx,
                stop_rx.clone(),
                &self.clock,
            ),
            pump(
                "backend_to_client",
                backend_rx,
                &mut client_tx,
                backend_to_client,
                &stop_tx,
                stop_rx,
                &self.clock,
            ),
        );

        log_end("client_to_backend", &upstream);
        log_end("backend_to_client", &downstream);

        let _ = timeout(CLOSE_GRACE, backend_tx.close()).await;
        let _ = timeout(CLOSE_GRACE, client_tx.close()).await;
    }
}

async fn pump<S, K, I, O, RE, WE>(
    direction: &'static str,
    mut source: S,
    sink: &mut K,
    convert: fn(I) -> Frame<O>,
    stop_tx: &watch::Sender<bool>,
    mut stop: watch::Receiver<bool>,
    clock: &ActivityClock,
) -> PumpEnd
where
    S: Stream<Item = Result<I, RE>> + Unpin,
    K: Sink<O, Error = WE> + Unpin,
    RE: Display,
    WE: Display,
{
    let end = loop {
        let next = tokio::select! {
            _ = stop.changed() => break PumpEnd::Stopped,
            next = source.next() => next,
        };

        let message = match next {
            None => break PumpEnd::Dropped,
            Some(Err(e)) => break PumpEnd::ReadFailed(e.to_string()),
            Some(Ok(message)) => message,
        };

        match convert(message) {
            Frame::Control => continue,
            Frame::Data(message) => {
                clock.touch();
                metrics::record_websocket_message(direction);
                if let Err(e) = sink.send(message).await {
                    break PumpEnd::WriteFailed(e.to_string());
                }
            }
            Frame::Close { message, code } => {
                clock.touch();
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(direction, error = %e, "Failed to relay close frame");
                }
                break PumpEnd::Closed(code);
            }
        }
    };

    stop_tx.send_replace(true);
    end
}

fn log_end(direction: &'static str, end: &PumpEnd) {
    if end.is_expected() {
        tracing::debug!(direction, end = ?end, "WebSocket direction finished");
    } else {
        tracing::warn!(direction, end = ?end, "WebSocket direction closed unexpectedly");
    }
}
