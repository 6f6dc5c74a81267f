//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Open a backend WebSocket for every upgraded client session
//! - Buffer client frames until the backend session is open
//! - Bidirectional frame forwarding
//! - Close-code translation and failure handling
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Session States
//! ```text
//! Connecting ──backend open──▶ Open ──close / error──▶ Closed
//!     │                                                  ▲
//!     └──────────── client gone / connect error ─────────┘
//! ```
//!
//! # Design Decisions
//! - One task per session selects over both sockets; both directions share
//!   the same forwarding code
//! - Pending frames live inside the `Connecting` state and nowhere else
//! - Close codes below the configured minimum, and the never-sent 1005/1006,
//!   are replaced by the proxy's own code
//! - Opening the backend session has a deadline; missing it is a connect error
//! - Socket-level errors drop both sockets without a close frame; forwarding
//!   errors close both sides with the internal-error code
//! - Payloads and text/binary framing pass through untouched. Masking is set
//!   by each connection's role, so client frames are unmasked on the way in
//!   and masked again towards the backend

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{self, WebSocket};
use axum::http::request::Parts;
use axum::http::HeaderName;
use bytes::Bytes;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as BackendCloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as BackendMessage};
use tokio_tungstenite::{client_async_tls_with_config, Connector};
use tracing::Instrument;

use crate::config::WebSocketConfig;
use crate::net::connect::connect_ipv4;
use crate::net::SessionTracker;
use crate::observability::metrics;
use crate::routing::{translate, OutboundRequest, Route};

/// Close code reported when a close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when a peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("client socket: {0}")]
    Client(#[source] axum::Error),

    #[error("backend socket: {0}")]
    Backend(#[source] tungstenite::Error),

    #[error("backend connect: {0}")]
    Connect(#[from] std::io::Error),
}

/// Close status carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// One relayed frame, independent of the library that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

impl From<ws::Message> for Frame {
    fn from(message: ws::Message) -> Self {
        match message {
            ws::Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            ws::Message::Binary(data) => Frame::Binary(data),
            ws::Message::Ping(data) => Frame::Ping(data),
            ws::Message::Pong(data) => Frame::Pong(data),
            ws::Message::Close(close) => Frame::Close(close.map(|c| CloseReason {
                code: c.code,
                reason: c.reason.as_str().to_owned(),
            })),
        }
    }
}

impl From<Frame> for ws::Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => ws::Message::Text(text.into()),
            Frame::Binary(data) => ws::Message::Binary(data),
            Frame::Ping(data) => ws::Message::Ping(data),
            Frame::Pong(data) => ws::Message::Pong(data),
            Frame::Close(close) => ws::Message::Close(close.map(|c| ws::CloseFrame {
                code: c.code,
                reason: c.reason.into(),
            })),
        }
    }
}

impl Frame {
    /// Convert a backend message. Raw frames are never produced when reading.
    fn from_backend(message: BackendMessage) -> Option<Self> {
        Some(match message {
            BackendMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
            BackendMessage::Binary(data) => Frame::Binary(data),
            BackendMessage::Ping(data) => Frame::Ping(data),
            BackendMessage::Pong(data) => Frame::Pong(data),
            BackendMessage::Close(close) => Frame::Close(close.map(|c| CloseReason {
                code: c.code.into(),
                reason: c.reason.as_str().to_owned(),
            })),
            BackendMessage::Frame(_) => return None,
        })
    }

    fn into_backend(self) -> BackendMessage {
        match self {
            Frame::Text(text) => BackendMessage::Text(text.into()),
            Frame::Binary(data) => BackendMessage::Binary(data),
            Frame::Ping(data) => BackendMessage::Ping(data),
            Frame::Pong(data) => BackendMessage::Pong(data),
            Frame::Close(close) => BackendMessage::Close(close.map(|c| BackendCloseFrame {
                code: CloseCode::from(c.code),
                reason: c.reason.into(),
            })),
        }
    }
}

/// Close codes used by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosePolicy {
    pub minimum: u16,
    pub by_proxy: u16,
    pub internal_error: u16,
}

impl ClosePolicy {
    /// Close to send onward for a close received from one peer.
    ///
    /// 1005 and 1006 are never sent on the wire, so they are replaced even
    /// when the minimum would let them through.
    pub fn translate(&self, received: Option<CloseReason>) -> CloseReason {
        let received = received.unwrap_or_else(|| CloseReason::new(CLOSE_NO_STATUS, ""));
        let reserved = matches!(received.code, CLOSE_NO_STATUS | CLOSE_ABNORMAL);
        if reserved || received.code < self.minimum {
            CloseReason::new(self.by_proxy, received.reason)
        } else {
            received
        }
    }

    /// Close sent to both peers when forwarding fails.
    pub fn internal_error(&self) -> CloseReason {
        CloseReason::new(
            self.internal_error,
            serde_json::json!({ "error": "Internal Server Error" }).to_string(),
        )
    }
}

impl From<&WebSocketConfig> for ClosePolicy {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            minimum: config.close_code_minimum,
            by_proxy: config.close_by_proxy,
            internal_error: config.close_internal_error,
        }
    }
}

/// How a relay session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The client left before the backend session opened.
    Abandoned,
    /// The client closed; this code went to the backend.
    ClientClosed(u16),
    /// The backend closed; this code went to the client.
    BackendClosed(u16),
    /// A socket failed; both sockets were dropped without a close frame.
    Terminated,
    /// Forwarding failed; both sides were sent the internal-error close.
    Failed,
}

#[derive(Debug)]
enum SessionState {
    Connecting { pending: Vec<Frame> },
    Open,
    Closed,
}

impl SessionState {
    fn buffer(&mut self, frame: Frame) {
        if let SessionState::Connecting { pending } = self {
            pending.push(frame);
        }
    }

    /// Move to `Open`, handing back the frames to flush.
    fn open(&mut self) -> Vec<Frame> {
        match std::mem::replace(self, SessionState::Open) {
            SessionState::Connecting { pending } => pending,
            other => {
                *self = other;
                Vec::new()
            }
        }
    }

    /// Move to `Closed`, dropping whatever is still pending.
    fn close(&mut self) {
        if let SessionState::Connecting { pending } =
            std::mem::replace(self, SessionState::Closed)
        {
            if !pending.is_empty() {
                tracing::debug!(discarded = pending.len(), "Dropping buffered frames");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ToBackend,
    ToClient,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::ToBackend => "client_to_backend",
            Direction::ToClient => "backend_to_client",
        }
    }
}

enum Flow {
    Continue,
    Closed(u16),
}

/// Relay one session between a client socket and a backend socket that is
/// still being opened by `connect`.
///
/// Each socket is passed as a frame stream and a frame sink. Returning drops
/// all four halves.
pub async fn run_relay<CS, CK, BS, BK, F>(
    mut client_rx: CS,
    mut client_tx: CK,
    connect: F,
    policy: ClosePolicy,
) -> RelayOutcome
where
    CS: Stream<Item = Result<Frame, RelayError>> + Unpin,
    CK: Sink<Frame, Error = RelayError> + Unpin,
    BS: Stream<Item = Result<Frame, RelayError>> + Unpin,
    BK: Sink<Frame, Error = RelayError> + Unpin,
    F: Future<Output = Result<(BS, BK), RelayError>>,
{
    let mut state = SessionState::Connecting {
        pending: Vec::new(),
    };
    tokio::pin!(connect);

    let (mut backend_rx, mut backend_tx) = loop {
        tokio::select! {
            connected = &mut connect => match connected {
                Ok(pair) => break pair,
                Err(e) => {
                    tracing::warn!(error = %e, "Backend session error");
                    state.close();
                    return RelayOutcome::Terminated;
                }
            },
            inbound = client_rx.next() => match inbound {
                Some(Ok(Frame::Close(close))) => {
                    tracing::debug!(code = ?close.map(|c| c.code), "Client closed before backend opened");
                    state.close();
                    let _ = client_tx.close().await;
                    return RelayOutcome::Abandoned;
                }
                Some(Ok(frame)) => state.buffer(frame),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Client session error");
                    state.close();
                    return RelayOutcome::Terminated;
                }
                None => {
                    tracing::debug!("Client went away before backend opened");
                    state.close();
                    return RelayOutcome::Abandoned;
                }
            },
        }
    };

    let pending = state.open();
    tracing::debug!(buffered = pending.len(), "Backend session open");
    if let Err(e) = flush_pending(pending, &mut backend_tx).await {
        fail_both(&mut client_tx, &mut backend_tx, &policy, &e).await;
        state.close();
        return RelayOutcome::Failed;
    }

    let outcome = loop {
        tokio::select! {
            inbound = client_rx.next() => {
                let frame = match inbound {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Client session error");
                        break RelayOutcome::Terminated;
                    }
                    None => Frame::Close(Some(CloseReason::new(CLOSE_ABNORMAL, ""))),
                };
                match forward(frame, &mut backend_tx, &policy, Direction::ToBackend).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Closed(code)) => {
                        let _ = client_tx.close().await;
                        break RelayOutcome::ClientClosed(code);
                    }
                    Err(e) => {
                        fail_both(&mut client_tx, &mut backend_tx, &policy, &e).await;
                        break RelayOutcome::Failed;
                    }
                }
            }
            outbound = backend_rx.next() => {
                let frame = match outbound {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Backend session error");
                        break RelayOutcome::Terminated;
                    }
                    None => Frame::Close(Some(CloseReason::new(CLOSE_ABNORMAL, ""))),
                };
                match forward(frame, &mut client_tx, &policy, Direction::ToClient).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Closed(code)) => {
                        let _ = backend_tx.close().await;
                        break RelayOutcome::BackendClosed(code);
                    }
                    Err(e) => {
                        fail_both(&mut client_tx, &mut backend_tx, &policy, &e).await;
                        break RelayOutcome::Failed;
                    }
                }
            }
        }
    };

    state.close();
    outcome
}

async fn flush_pending<K>(pending: Vec<Frame>, backend: &mut K) -> Result<(), RelayError>
where
    K: Sink<Frame, Error = RelayError> + Unpin,
{
    if pending.is_empty() {
        return Ok(());
    }
    for frame in pending {
        backend.feed(frame).await?;
        metrics::record_ws_frame(Direction::ToBackend.as_str());
    }
    backend.flush().await
}

async fn forward<K>(
    frame: Frame,
    sink: &mut K,
    policy: &ClosePolicy,
    direction: Direction,
) -> Result<Flow, RelayError>
where
    K: Sink<Frame, Error = RelayError> + Unpin,
{
    match frame {
        Frame::Close(received) => {
            let received_code = received.as_ref().map_or(CLOSE_NO_STATUS, |c| c.code);
            let close = policy.translate(received);
            let code = close.code;
            tracing::debug!(
                direction = direction.as_str(),
                received = received_code,
                sent = code,
                "Propagating close"
            );
            sink.send(Frame::Close(Some(close))).await?;
            Ok(Flow::Closed(code))
        }
        frame => {
            sink.send(frame).await?;
            metrics::record_ws_frame(direction.as_str());
            Ok(Flow::Continue)
        }
    }
}

/// Close both peers with the internal-error code. Each close is attempted
/// regardless of how the other one went.
async fn fail_both<CK, BK>(client: &mut CK, backend: &mut BK, policy: &ClosePolicy, error: &RelayError)
where
    CK: Sink<Frame, Error = RelayError> + Unpin,
    BK: Sink<Frame, Error = RelayError> + Unpin,
{
    tracing::warn!(error = %error, "Exception while relaying, closing both sides");
    let close = Frame::Close(Some(policy.internal_error()));

    let (client_result, backend_result) = tokio::join!(
        async {
            client.send(close.clone()).await?;
            client.close().await
        },
        async {
            backend.send(close.clone()).await?;
            backend.close().await
        },
    );
    if let Err(e) = client_result {
        tracing::warn!(error = %e, "Failed to close client socket");
    }
    if let Err(e) = backend_result {
        tracing::warn!(error = %e, "Failed to close backend socket");
    }
}

/// Remove the router's handshake marker from the end of the path, keeping
/// any query string.
pub fn strip_handshake_marker(url: &str, marker: &str) -> String {
    match url.split_once('?') {
        Some((path, query)) => format!("{}?{}", path.strip_suffix(marker).unwrap_or(path), query),
        None => url.strip_suffix(marker).unwrap_or(url).to_string(),
    }
}

/// Split an upgraded client socket into frame halves.
pub fn client_halves(
    socket: WebSocket,
) -> (
    impl Stream<Item = Result<Frame, RelayError>> + Unpin,
    impl Sink<Frame, Error = RelayError> + Unpin,
) {
    let (tx, rx) = socket.split();
    let rx = rx.map(|message| message.map(Frame::from).map_err(RelayError::Client));
    let tx = tx
        .sink_map_err(RelayError::Client)
        .with(|frame: Frame| future::ready(Ok::<_, RelayError>(ws::Message::from(frame))));
    (rx, tx)
}

/// Split a backend socket into frame halves.
pub fn backend_halves<S>(
    socket: S,
) -> (
    impl Stream<Item = Result<Frame, RelayError>> + Unpin,
    impl Sink<Frame, Error = RelayError> + Unpin,
)
where
    S: Stream<Item = Result<BackendMessage, tungstenite::Error>>
        + Sink<BackendMessage, Error = tungstenite::Error>
        + Unpin,
{
    let (tx, rx) = socket.split();
    let rx = rx.filter_map(|message| {
        future::ready(match message {
            Ok(message) => Frame::from_backend(message).map(Ok),
            Err(e) => Some(Err(RelayError::Backend(e))),
        })
    });
    let tx = tx
        .sink_map_err(RelayError::Backend)
        .with(|frame: Frame| future::ready(Ok::<_, RelayError>(frame.into_backend())));
    (rx, tx)
}

/// Run `opening` with a limit; running out counts as a failed connect.
async fn within<T, F>(limit: Duration, opening: F) -> Result<T, RelayError>
where
    F: Future<Output = Result<T, RelayError>>,
{
    tokio::time::timeout(limit, opening).await.unwrap_or_else(|_| {
        Err(RelayError::Connect(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("backend session not open within {limit:?}"),
        )))
    })
}

/// WebSocket proxy for one route.
#[derive(Clone)]
pub struct WebSocketProxy {
    route: Arc<Route>,
    policy: ClosePolicy,
    marker: String,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    sessions: SessionTracker,
}

impl WebSocketProxy {
    pub fn new(
        route: Arc<Route>,
        config: &WebSocketConfig,
        connect_timeout: Duration,
        sessions: SessionTracker,
    ) -> Self {
        Self {
            route,
            policy: ClosePolicy::from(config),
            marker: config.handshake_marker.clone(),
            connect_timeout,
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            sessions,
        }
    }

    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    /// Relay an upgraded client socket. `inbound` is the upgrade request with
    /// the URL as seen by this service.
    pub async fn relay(&self, socket: WebSocket, inbound: Parts) {
        let guard = self.sessions.track();
        let span = tracing::info_span!(
            "ws_relay",
            session_id = %guard.id(),
            service = %self.route.key(),
        );

        async move {
            let original = inbound
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let url = strip_handshake_marker(original, &self.marker);
            tracing::debug!(original = %original, url = %url, "WS proxy request");

            let mut outbound = translate(&inbound.method, &url, &inbound.headers, &self.route);
            if let Some(auth) = self.route.authorization() {
                auth.inject(&inbound, &mut outbound);
            }

            let (client_rx, client_tx) = client_halves(socket);
            let connect = async {
                let socket = within(self.handshake_timeout, self.connect_backend(&outbound)).await?;
                Ok::<_, RelayError>(backend_halves(socket))
            };

            let outcome = run_relay(client_rx, client_tx, connect, self.policy).await;
            tracing::debug!(?outcome, "Relay session ended");
            drop(guard);
        }
        .instrument(span)
        .await
    }

    async fn connect_backend(
        &self,
        outbound: &OutboundRequest,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        RelayError,
    > {
        let target = outbound.target(self.route.ws_scheme());
        let mut request = target
            .as_str()
            .into_client_request()
            .map_err(RelayError::Backend)?;

        // The handshake headers tungstenite generated take precedence.
        let generated: HashSet<HeaderName> = request.headers().keys().cloned().collect();
        for (name, value) in outbound.headers.iter() {
            if !generated.contains(name) {
                request.headers_mut().append(name.clone(), value.clone());
            }
        }

        let stream = connect_ipv4(&outbound.host, outbound.port, self.connect_timeout).await?;
        let connector = self
            .route
            .tls()
            .map(|config| Connector::Rustls(config.clone()))
            .unwrap_or(Connector::Plain);

        let (socket, response) = client_async_tls_with_config(request, stream, None, Some(connector))
            .await
            .map_err(RelayError::Backend)?;
        tracing::debug!(target = %target, status = %response.status(), "Backend session opened");
        Ok(socket)
    }
}
