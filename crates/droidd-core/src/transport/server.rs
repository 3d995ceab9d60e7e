//! Transport server implementation
//!
//! Listens on three ports, each serving exactly one upgrade path:
//! `/control` (textual request/response), `/binary` (framed payloads,
//! both directions), `/events` (fan-out push). Every accepted connection
//! authenticates during the handshake before any protocol traffic.
//!
//! Ordering: responses leave in completion order, correlated by id;
//! binary frames leave in enqueue order; event subscribers are
//! independent and lossy.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use droidd_proto::{BinaryFrame, Envelope, WireError};
use droidd_proto::{error as codes, AgentError};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{
    Request as WsRequest, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::router::CommandRouter;

/// Outbound binary queue depth; producers block when full
const BINARY_QUEUE_CAPACITY: usize = 16;
/// Event fan-out buffer per subscriber; lossy on overflow
const EVENT_BUFFER: usize = 64;
/// Frame size cap on the textual channels
const TEXT_FRAME_LIMIT: usize = 4 * 1024 * 1024;

/// Handler for inbound binary frames; the default drops them at debug
pub type BinaryInHandler = Arc<dyn Fn(BinaryFrame) + Send + Sync>;

/// Channel roles, one per port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelRole {
    Control,
    Binary,
    Event,
}

impl ChannelRole {
    fn path(&self) -> &'static str {
        match self {
            ChannelRole::Control => "/control",
            ChannelRole::Binary => "/binary",
            ChannelRole::Event => "/events",
        }
    }
}

/// Transport server options
pub struct TransportOptions {
    pub host: String,
    pub control_port: u16,
    pub binary_port: u16,
    pub event_port: u16,
    pub max_connections: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        TransportOptions {
            host: "0.0.0.0".to_string(),
            control_port: 18900,
            binary_port: 18901,
            event_port: 18902,
            max_connections: 5,
            heartbeat_interval: Duration::from_millis(5000),
            heartbeat_timeout: Duration::from_millis(15000),
        }
    }
}

type ConnSender = mpsc::UnboundedSender<Message>;

/// The three-channel transport server
pub struct TransportServer {
    options: TransportOptions,
    auth: Arc<Authenticator>,
    router: Arc<CommandRouter>,
    hello_params: serde_json::Value,
    event_tx: broadcast::Sender<Envelope>,
    control_conns: Arc<RwLock<HashMap<u64, ConnSender>>>,
    binary_conns: Arc<RwLock<HashMap<u64, ConnSender>>>,
    binary_out_tx: mpsc::Sender<BinaryFrame>,
    binary_out_rx: StdMutex<Option<mpsc::Receiver<BinaryFrame>>>,
    binary_in: StdMutex<BinaryInHandler>,
    next_conn_id: AtomicU64,
    shutdown_tx: StdMutex<Option<broadcast::Sender<()>>>,
    bound_addrs: StdMutex<Option<[SocketAddr; 3]>>,
}

impl TransportServer {
    pub fn new(
        options: TransportOptions,
        auth: Arc<Authenticator>,
        router: Arc<CommandRouter>,
        hello_params: serde_json::Value,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (binary_out_tx, binary_out_rx) = mpsc::channel(BINARY_QUEUE_CAPACITY);
        Arc::new(TransportServer {
            options,
            auth,
            router,
            hello_params,
            event_tx,
            control_conns: Arc::new(RwLock::new(HashMap::new())),
            binary_conns: Arc::new(RwLock::new(HashMap::new())),
            binary_out_tx,
            binary_out_rx: StdMutex::new(Some(binary_out_rx)),
            binary_in: StdMutex::new(Arc::new(|frame: BinaryFrame| {
                debug!(
                    correlation = %frame.correlation_str(),
                    len = frame.payload.len(),
                    "Inbound binary frame dropped (no handler)"
                );
            })),
            next_conn_id: AtomicU64::new(1),
            shutdown_tx: StdMutex::new(None),
            bound_addrs: StdMutex::new(None),
        })
    }

    /// Replace the inbound-binary handler (default: drop at debug)
    pub fn set_binary_handler(&self, handler: BinaryInHandler) {
        *self.binary_in.lock().expect("lock") = handler;
    }

    /// Sender side of the bounded outbound binary queue. A send awaits
    /// queue space; frames are never dropped.
    pub fn binary_sender(&self) -> mpsc::Sender<BinaryFrame> {
        self.binary_out_tx.clone()
    }

    /// Publish an event envelope to every event-channel subscriber.
    /// Best-effort: slow subscribers lose the oldest events.
    pub fn emit_event(&self, envelope: Envelope) {
        let _ = self.event_tx.send(envelope);
    }

    /// Send the same textual envelope to every active control
    /// connection; individual failures are swallowed.
    pub async fn broadcast(&self, envelope: Envelope) {
        let Ok(text) = envelope.to_json() else {
            return;
        };
        let conns = self.control_conns.read().await;
        for sender in conns.values() {
            let _ = sender.send(Message::Text(text.clone()));
        }
    }

    /// Bound addresses after start: [control, binary, event]
    pub fn bound_addrs(&self) -> Option<[SocketAddr; 3]> {
        *self.bound_addrs.lock().expect("lock")
    }

    /// Bind the three listeners and start serving
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        *self.shutdown_tx.lock().expect("lock") = Some(shutdown_tx.clone());

        let roles = [
            (ChannelRole::Control, self.options.control_port),
            (ChannelRole::Binary, self.options.binary_port),
            (ChannelRole::Event, self.options.event_port),
        ];

        let mut addrs = [None; 3];
        for (i, (role, port)) in roles.into_iter().enumerate() {
            let listener = TcpListener::bind((self.options.host.as_str(), port)).await?;
            addrs[i] = Some(listener.local_addr()?);
            info!(role = ?role, addr = %listener.local_addr()?, "Channel listening");
            self.spawn_accept_loop(listener, role, shutdown_tx.clone());
        }
        *self.bound_addrs.lock().expect("lock") =
            Some([addrs[0].unwrap(), addrs[1].unwrap(), addrs[2].unwrap()]);

        // Drain the outbound binary queue into the active binary
        // connections, preserving enqueue order
        if let Some(mut binary_rx) = self.binary_out_rx.lock().expect("lock").take() {
            let binary_conns = self.binary_conns.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = binary_rx.recv() => {
                            let Some(frame) = frame else { break };
                            let payload = frame.encode();
                            let conns = binary_conns.read().await;
                            for sender in conns.values() {
                                let _ = sender.send(Message::Binary(payload.to_vec()));
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        Ok(())
    }

    fn spawn_accept_loop(
        self: &Arc<Self>,
        listener: TcpListener,
        role: ChannelRole,
        shutdown_tx: broadcast::Sender<()>,
    ) {
        let server = self.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let server = server.clone();
                                let conn_shutdown = shutdown_tx.clone();
                                tokio::spawn(async move {
                                    if let Err(e) =
                                        server.handle_connection(stream, addr, role, conn_shutdown).await
                                    {
                                        debug!(?addr, ?role, "Connection ended: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!(?role, "Accept failed: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!(?role, "Listener shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Close every connection with a going-away reason and stop the
    /// listeners
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().expect("lock").take() {
            let _ = tx.send(());
        }
        self.control_conns.write().await.clear();
        self.binary_conns.write().await.clear();
        info!("Transport stopped");
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        role: ChannelRole,
        shutdown_tx: broadcast::Sender<()>,
    ) -> anyhow::Result<()> {
        // Capture path and bearer token during the handshake
        let handshake = Arc::new(StdMutex::new((String::new(), None::<String>)));
        let handshake_capture = Arc::clone(&handshake);
        let ws_stream = accept_hdr_async(stream, move |req: &WsRequest, resp: WsResponse| {
            if let Ok(mut slot) = handshake_capture.lock() {
                slot.0 = req.uri().path().to_string();
                slot.1 = bearer_token(req);
            }
            Ok(resp)
        })
        .await?;
        let (path, token) = {
            let slot = handshake.lock().expect("lock");
            (slot.0.clone(), slot.1.clone())
        };

        let (mut ws_tx, ws_rx) = ws_stream.split();

        if path != role.path() {
            let _ = ws_tx
                .send(Message::Close(Some(close_frame(
                    4000,
                    format!("Invalid path. Use {}", role.path()),
                ))))
                .await;
            warn!(?addr, %path, "Invalid upgrade path");
            return Ok(());
        }

        if role == ChannelRole::Control
            && self.control_conns.read().await.len() >= self.options.max_connections
        {
            let _ = ws_tx
                .send(Message::Close(Some(close_frame(4003, "Too many connections"))))
                .await;
            warn!(?addr, "Connection limit reached");
            return Ok(());
        }

        // Authenticate before any protocol traffic
        let session = match self
            .auth
            .authenticate(token.as_deref(), &addr.to_string())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                let _ = ws_tx
                    .send(Message::Close(Some(close_frame(4001, e.message.clone()))))
                    .await;
                return Ok(());
            }
        };

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let result = match role {
            ChannelRole::Control => {
                self.serve_control(conn_id, addr, ws_tx, ws_rx, &session.id, shutdown_tx)
                    .await
            }
            ChannelRole::Binary => {
                self.serve_binary(conn_id, addr, ws_tx, ws_rx, shutdown_tx)
                    .await
            }
            ChannelRole::Event => self.serve_event(addr, ws_tx, ws_rx, shutdown_tx).await,
        };
        self.auth.invalidate(&session.id).await;
        result
    }

    async fn serve_control(
        &self,
        conn_id: u64,
        addr: SocketAddr,
        mut ws_tx: SplitSink<WebSocketStream<TcpStream>, Message>,
        mut ws_rx: futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
        session_id: &str,
        shutdown_tx: broadcast::Sender<()>,
    ) -> anyhow::Result<()> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        self.control_conns.write().await.insert(conn_id, out_tx.clone());
        info!(?addr, conn_id, "Control client connected");

        // Opening hello, then strictly request/response
        let mut hello_params = self.hello_params.clone();
        hello_params["sessionId"] = serde_json::Value::String(session_id.to_string());
        let hello = Envelope::event("system.hello", Some(hello_params));
        let _ = out_tx.send(Message::Text(hello.to_json()?));

        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut ping_timer = tokio::time::interval(self.options.heartbeat_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_pong = Instant::now();

        loop {
            tokio::select! {
                outgoing = out_rx.recv() => {
                    let Some(message) = outgoing else { break };
                    // A control-channel send failure terminates the
                    // connection; the response is discarded
                    if let Err(e) = ws_tx.send(message).await {
                        debug!(?addr, "Control send failed: {}", e);
                        break;
                    }
                }
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > TEXT_FRAME_LIMIT {
                                warn!(?addr, len = text.len(), "Oversized control frame dropped");
                                continue;
                            }
                            self.handle_control_text(&text, &out_tx, session_id).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_pong = Instant::now();
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = out_tx.send(Message::Pong(payload));
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(?addr, "Control receive failed: {}", e);
                            break;
                        }
                        _ => {}
                    }
                }
                _ = ping_timer.tick() => {
                    if last_pong.elapsed() > self.options.heartbeat_timeout {
                        warn!(?addr, "Heartbeat timed out; dropping control connection");
                        break;
                    }
                    let _ = out_tx.send(Message::Ping(Vec::new()));
                }
                _ = shutdown_rx.recv() => {
                    let _ = ws_tx
                        .send(Message::Close(Some(close_frame(1001, "Server going away"))))
                        .await;
                    break;
                }
            }
        }

        self.control_conns.write().await.remove(&conn_id);
        info!(?addr, conn_id, "Control client disconnected");
        Ok(())
    }

    async fn handle_control_text(
        &self,
        text: &str,
        out_tx: &mpsc::UnboundedSender<Message>,
        session_id: &str,
    ) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let mut response = Envelope::request("", None);
                response.msg_type = droidd_proto::MessageType::Response;
                response.method = None;
                response.error = Some(WireError::from(AgentError::new(
                    codes::MESSAGE_PROTOCOL_ERROR,
                    format!("protocol error: {}", e),
                )));
                if let Ok(json) = response.to_json() {
                    let _ = out_tx.send(Message::Text(json));
                }
                return;
            }
        };

        if !envelope.is_request() {
            debug!(msg_type = ?envelope.msg_type, "Non-request on control channel ignored");
            return;
        }

        self.auth.validate(session_id).await;

        // Requests dispatch concurrently; responses leave in completion
        // order, correlated by id
        let router = self.router.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let response = router.dispatch(&envelope).await;
            match response.to_json() {
                Ok(json) => {
                    let _ = out_tx.send(Message::Text(json));
                }
                Err(e) => error!("Response serialization failed: {}", e),
            }
        });
    }

    async fn serve_binary(
        &self,
        conn_id: u64,
        addr: SocketAddr,
        mut ws_tx: SplitSink<WebSocketStream<TcpStream>, Message>,
        mut ws_rx: futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> anyhow::Result<()> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        self.binary_conns.write().await.insert(conn_id, out_tx);
        info!(?addr, conn_id, "Binary client connected");

        let mut shutdown_rx = shutdown_tx.subscribe();
        loop {
            tokio::select! {
                outgoing = out_rx.recv() => {
                    let Some(message) = outgoing else { break };
                    if ws_tx.send(message).await.is_err() {
                        break;
                    }
                }
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Binary(data))) => {
                            match BinaryFrame::decode(&data) {
                                Ok(frame) => {
                                    let handler = self.binary_in.lock().expect("lock").clone();
                                    handler(frame);
                                }
                                Err(e) => {
                                    warn!(?addr, "Bad inbound binary frame: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(?addr, "Binary receive failed: {}", e);
                            break;
                        }
                        _ => {}
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = ws_tx
                        .send(Message::Close(Some(close_frame(1001, "Server going away"))))
                        .await;
                    break;
                }
            }
        }

        self.binary_conns.write().await.remove(&conn_id);
        info!(?addr, conn_id, "Binary client disconnected");
        Ok(())
    }

    async fn serve_event(
        &self,
        addr: SocketAddr,
        mut ws_tx: SplitSink<WebSocketStream<TcpStream>, Message>,
        mut ws_rx: futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> anyhow::Result<()> {
        let mut events = self.event_tx.subscribe();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut ping_timer = tokio::time::interval(self.options.heartbeat_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_pong = Instant::now();
        info!(?addr, "Event subscriber connected");

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(envelope) => {
                            let Ok(text) = envelope.to_json() else { continue };
                            if ws_tx.send(Message::Text(text)).await.is_err() {
                                // Swallowed; subscriber cleaned up below
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(?addr, skipped, "Event subscriber lagged; events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => {}
                    }
                }
                _ = ping_timer.tick() => {
                    if last_pong.elapsed() > self.options.heartbeat_timeout {
                        warn!(?addr, "Heartbeat timed out; dropping event subscriber");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = ws_tx
                        .send(Message::Close(Some(close_frame(1001, "Server going away"))))
                        .await;
                    break;
                }
            }
        }

        info!(?addr, "Event subscriber disconnected");
        Ok(())
    }
}

fn close_frame(code: u16, reason: impl Into<String>) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into().into(),
    }
}

/// Bearer token from the Authorization header or a `token` query param
fn bearer_token(req: &WsRequest) -> Option<String> {
    if let Some(value) = req.headers().get("authorization") {
        if let Ok(text) = value.to_str() {
            if let Some(token) = text.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    let query = req.uri().query()?;
    query.split('&').find_map(|pair| {
        pair.strip_prefix("token=").map(str::to_string)
    })
}
