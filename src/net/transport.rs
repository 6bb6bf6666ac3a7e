//! WebSocket session to the conversational backend.
//!
//! One logical session with automatic reconnect. Inbound frames go to a
//! single handler on the reader task, so commands are seen in receive order.
//! Outbound frames share one sink behind a mutex; every send has a bounded
//! wait for the lock and for the write itself, and a failed send is dropped.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::ErrorKind;

/// Longest wait for the send lock.
pub const SEND_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest wait for one frame to be written.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

const DEVICE_HEADER: &str = "x-device-name";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub endpoint: String,
    pub use_tls: bool,
    /// Delay between a lost session and the next connect attempt.
    pub reconnect_ms: u64,
    pub connect_timeout_ms: u64,
    /// Sent as `x-device-name` on the upgrade request.
    pub device_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7860,
            endpoint: "/companion".into(),
            use_tls: false,
            reconnect_ms: 10_000,
            connect_timeout_ms: 10_000,
            device_name: "companion".into(),
        }
    }
}

impl ServerConfig {
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let path = if self.endpoint.starts_with('/') {
            self.endpoint.clone()
        } else {
            format!("/{}", self.endpoint)
        };
        format!("{scheme}://{}:{}{path}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not open")]
    NotOpen,
    #[error("send lock not acquired within {0:?}")]
    LockTimeout(Duration),
    #[error("send did not complete within {0:?}")]
    SendTimeout(Duration),
    #[error("connect did not complete within {0:?}")]
    ConnectTimeout(Duration),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport already started")]
    AlreadyRunning,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotOpen
            | Self::LockTimeout(_)
            | Self::SendTimeout(_)
            | Self::ConnectTimeout(_)
            | Self::WebSocket(_) => ErrorKind::TransientIo,
            Self::InvalidRequest(_) => ErrorKind::InvalidArgument,
            Self::AlreadyRunning => ErrorKind::State,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Idle = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
}

impl TransportState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// One inbound data frame, borrowed for the duration of the handler call.
#[derive(Debug, Clone, Copy)]
pub enum InboundFrame<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

pub type FrameHandler = Box<dyn FnMut(InboundFrame<'_>) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Error(String),
}

struct Inner {
    config: ServerConfig,
    state: AtomicU8,
    running: AtomicBool,
    sink: Mutex<Option<WsSink>>,
    shutdown: Notify,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Inner {
    fn set_state(&self, to: TransportState) {
        let from = TransportState::from_u8(self.state.swap(to as u8, Ordering::AcqRel));
        if from != to {
            debug!(%from, %to, "Transport state");
        }
    }

    fn emit(&self, event: TransportEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Arc::new(Inner {
                config,
                state: AtomicU8::new(TransportState::Idle as u8),
                running: AtomicBool::new(false),
                sink: Mutex::new(None),
                shutdown: Notify::new(),
                events: tx,
            }),
        };
        (transport, rx)
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    pub fn url(&self) -> String {
        self.inner.config.url()
    }

    /// Spawn the session task on the current runtime. It connects, feeds
    /// frames to `handler` and reconnects after the configured back-off
    /// until [`stop`](Self::stop).
    pub fn start(&self, handler: FrameHandler) -> Result<JoinHandle<()>, TransportError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyRunning);
        }
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(run_session(inner, handler)))
    }

    /// Close the session and stop reconnecting.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Transport stopping");
        self.inner.shutdown.notify_one();
    }

    pub async fn send_binary(&self, data: &[u8]) -> Result<(), TransportError> {
        self.send(Message::Binary(data.to_vec())).await
    }

    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send(Message::Text(text.to_string())).await
    }

    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let mut guard = tokio::time::timeout(SEND_LOCK_TIMEOUT, self.inner.sink.lock())
            .await
            .map_err(|_| TransportError::LockTimeout(SEND_LOCK_TIMEOUT))?;
        let sink = guard.as_mut().ok_or(TransportError::NotOpen)?;
        tokio::time::timeout(SEND_TIMEOUT, sink.send(msg))
            .await
            .map_err(|_| TransportError::SendTimeout(SEND_TIMEOUT))??;
        Ok(())
    }
}

async fn connect(config: &ServerConfig) -> Result<WsStream, TransportError> {
    let url = config.url();
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
    let name = HeaderValue::from_str(&config.device_name)
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
    request.headers_mut().insert(DEVICE_HEADER, name);

    let limit = Duration::from_millis(config.connect_timeout_ms);
    let (ws, _response) = tokio::time::timeout(limit, connect_async(request))
        .await
        .map_err(|_| TransportError::ConnectTimeout(limit))??;
    Ok(ws)
}

async fn run_session(inner: Arc<Inner>, mut handler: FrameHandler) {
    let url = inner.config.url();
    let backoff = Duration::from_millis(inner.config.reconnect_ms);

    while inner.running.load(Ordering::Acquire) {
        inner.set_state(TransportState::Connecting);
        info!(url = %url, "Connecting");

        let attempt = tokio::select! {
            result = connect(&inner.config) => result,
            _ = inner.shutdown.notified() => {
                info!(url = %url, "Connect abandoned");
                break;
            }
        };
        match attempt {
            Ok(ws) => {
                let (sink, stream) = ws.split();
                *inner.sink.lock().await = Some(sink);
                inner.set_state(TransportState::Open);
                info!(url = %url, "Transport open");
                inner.emit(TransportEvent::Connected);

                let reason = read_frames(&inner, stream, &mut handler).await;

                inner.set_state(TransportState::Closing);
                if let Some(mut sink) = inner.sink.lock().await.take() {
                    if let Err(e) = sink.close().await {
                        debug!(error = %e, "Close handshake failed");
                    }
                }
                inner.set_state(TransportState::Idle);
                info!(reason = %reason, "Transport closed");
                inner.emit(TransportEvent::Disconnected { reason });
            }
            Err(e) => {
                inner.set_state(TransportState::Idle);
                warn!(url = %url, error = %e, "Connect failed");
                inner.emit(TransportEvent::Error(e.to_string()));
            }
        }

        if !inner.running.load(Ordering::Acquire) {
            break;
        }
        debug!(delay_ms = backoff.as_millis() as u64, "Reconnect scheduled");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = inner.shutdown.notified() => {}
        }
    }
    inner.set_state(TransportState::Idle);
    info!("Transport task finished");
}

/// Pump frames until the session ends; returns why it ended.
async fn read_frames(inner: &Inner, mut stream: SplitStream<WsStream>, handler: &mut FrameHandler) -> String {
    loop {
        tokio::select! {
            _ = inner.shutdown.notified() => return "stopped".into(),
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => handler(InboundFrame::Text(&text)),
                Some(Ok(Message::Binary(data))) => handler(InboundFrame::Binary(&data)),
                // tungstenite queues the pong reply itself.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(f) => format!("closed by peer: {} {}", u16::from(f.code), f.reason),
                        None => "closed by peer".into(),
                    };
                }
                Some(Err(e)) => {
                    inner.emit(TransportEvent::Error(e.to_string()));
                    return e.to_string();
                }
                None => return "stream ended".into(),
            },
        }
    }
}
