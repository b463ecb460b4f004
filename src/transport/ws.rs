//! WebSocket transport.
//!
//! Carries [`Frame`]s as JSON text over `tokio-tungstenite` and reconnects
//! with exponential backoff when the link drops.
//!
//! # Architecture
//!
//! ```text
//!   Client ──emit──► WsTransport ──frame_tx──► connection task ──► socket
//!                         │                         │
//!                         └─on(type)─► forwarded ◄──┤ filter by type
//!                                                   ▼
//!   Client::dispatch ◄────────── EventSink ◄── Message / Reconnect
//! ```
//!
//! Frames emitted while disconnected wait in the channel and are written once
//! the link is back. After every successful reconnect (not the first
//! connect) a [`TransportEvent::Reconnect`] is delivered.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use url::Url;

use super::{Connector, EventSink, Frame, Transport, TransportEvent};
use crate::error::ClientError;

/// Initial reconnection delay.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Maximum reconnection delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Concrete WebSocket stream type.
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a pong frame in response to a ping.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("WebSocket send_pong failed")
    }

    /// Flush pending writes and close the sink.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Pong(_) | tungstenite::Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Open a WebSocket and split it into (writer, reader) halves.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    }
}

/// [`Connector`] producing [`WsTransport`]s.
///
/// Must be used from within a tokio runtime; the connection task is spawned
/// on the current runtime.
#[derive(Debug, Clone)]
pub struct WsConnector {
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }
}

impl WsConnector {
    /// Connector with the default 1s..60s backoff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the reconnection backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &Url, events: EventSink) -> Result<Box<dyn Transport>, ClientError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ClientError::Transport(format!("WebSocket transport needs a tokio runtime: {e}"))
        })?;

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let forwarded = Arc::new(Mutex::new(HashSet::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let queued = Arc::new(AtomicUsize::new(0));

        let config = ConnectionConfig {
            ws_url: http_to_ws_scheme(url.as_str()),
            forwarded: Arc::clone(&forwarded),
            shutdown: Arc::clone(&shutdown),
            queued: Arc::clone(&queued),
            events,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
        };
        let task = runtime.spawn(run_connection_loop(config, frame_rx));

        Ok(Box::new(WsTransport {
            frame_tx,
            forwarded,
            shutdown,
            queued,
            task,
        }))
    }
}

/// Handle to a running WebSocket connection task.
#[derive(Debug)]
pub struct WsTransport {
    frame_tx: mpsc::UnboundedSender<String>,
    forwarded: Arc<Mutex<HashSet<String>>>,
    shutdown: Arc<AtomicBool>,
    /// Frames accepted by `emit` and not yet written to a socket.
    queued: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl Transport for WsTransport {
    fn on(&mut self, msg_type: &str) {
        self.forwarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(msg_type.to_string());
    }

    fn emit(&mut self, msg_type: &str, payload: Value) -> Result<(), ClientError> {
        let text = Frame::encode(msg_type, payload)?;
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.frame_tx.send(text).map_err(|e| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            ClientError::Transport(format!("connection task stopped: {e}"))
        })
    }

    fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Internal configuration for the connection loop.
struct ConnectionConfig {
    ws_url: String,
    forwarded: Arc<Mutex<HashSet<String>>>,
    shutdown: Arc<AtomicBool>,
    queued: Arc<AtomicUsize>,
    events: EventSink,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl ConnectionConfig {
    fn mark_written(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_forwarded(&self, msg_type: &str) -> bool {
        self.forwarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(msg_type)
    }
}

/// Result of the inner message loop.
enum ConnectionLoopExit {
    /// Shutdown was requested or nobody is listening any more.
    Shutdown,
    /// Connection was lost -- should reconnect.
    Disconnected,
}

/// Main connection loop with reconnection.
async fn run_connection_loop(config: ConnectionConfig, mut frame_rx: mpsc::UnboundedReceiver<String>) {
    let mut backoff = config.initial_backoff;
    let mut connected_before = false;
    // Frame whose write failed; re-sent first on the next connection.
    let mut unsent: Option<String> = None;

    loop {
        if config.shutdown.load(Ordering::SeqCst) {
            log::info!("[Transport] Shutdown requested, exiting connection loop");
            return;
        }

        log::info!("[Transport] Connecting to {}", config.ws_url);

        let (mut writer, mut reader) = match connect(&config.ws_url).await {
            Ok(pair) => {
                log::info!("[Transport] WebSocket connected");
                backoff = config.initial_backoff;
                pair
            }
            Err(e) => {
                log::warn!(
                    "[Transport] Connection failed: {:#} (retry in {:?})",
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.max_backoff);
                continue;
            }
        };

        if connected_before && config.events.send(TransportEvent::Reconnect).is_err() {
            log::debug!("[Transport] Event receiver dropped, exiting connection loop");
            return;
        }
        connected_before = true;

        let exit = run_message_loop(&config, &mut writer, &mut reader, &mut frame_rx, &mut unsent).await;

        if let ConnectionLoopExit::Shutdown = exit {
            let _ = writer.close().await;
            return;
        }

        log::info!("[Transport] Disconnected, reconnecting in {:?}", backoff);
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_backoff);
    }
}

/// Inner loop for a single WebSocket connection.
async fn run_message_loop(
    config: &ConnectionConfig,
    writer: &mut WsWriter,
    reader: &mut WsReader,
    frame_rx: &mut mpsc::UnboundedReceiver<String>,
    unsent: &mut Option<String>,
) -> ConnectionLoopExit {
    if let Some(text) = unsent.take() {
        if let Err(e) = writer.send_text(&text).await {
            log::warn!("[Transport] Failed to re-send frame: {:#}", e);
            *unsent = Some(text);
            return ConnectionLoopExit::Disconnected;
        }
        config.mark_written();
    }

    loop {
        if config.shutdown.load(Ordering::SeqCst) {
            log::info!("[Transport] Shutdown requested, closing connection");
            return ConnectionLoopExit::Shutdown;
        }

        tokio::select! {
            msg = reader.recv() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !route_text(config, &text) {
                            return ConnectionLoopExit::Shutdown;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        log::debug!("[Transport] Ignoring {} byte binary frame", data.len());
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = writer.send_pong(data).await {
                            log::debug!("[Transport] Failed to answer ping: {:#}", e);
                        }
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!("[Transport] Connection closed by server ({code}: {reason})");
                        return ConnectionLoopExit::Disconnected;
                    }
                    Some(Err(e)) => {
                        log::warn!("[Transport] WebSocket error: {:#}", e);
                        return ConnectionLoopExit::Disconnected;
                    }
                    None => {
                        log::info!("[Transport] WebSocket stream ended");
                        return ConnectionLoopExit::Disconnected;
                    }
                }
            }

            outgoing = frame_rx.recv() => {
                let Some(text) = outgoing else {
                    log::debug!("[Transport] Transport handle dropped");
                    return ConnectionLoopExit::Shutdown;
                };
                if let Err(e) = writer.send_text(&text).await {
                    log::warn!("[Transport] Failed to send frame: {:#}", e);
                    *unsent = Some(text);
                    return ConnectionLoopExit::Disconnected;
                }
                config.mark_written();
                log::trace!("[Transport] Sent {}", preview(&text, 120));
            }
        }
    }
}

/// At most `max_chars` characters of `text`, cut on a character boundary.
fn preview(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(end, _)| &text[..end])
}

/// Forward a text frame to the event sink if its type is installed.
///
/// Returns `false` once the event receiver is gone.
fn route_text(config: &ConnectionConfig, text: &str) -> bool {
    let Some(frame) = Frame::decode(text) else {
        log::warn!("[Transport] Ignoring non-frame text: {}", preview(text, 100));
        return true;
    };

    if !config.is_forwarded(&frame.msg_type) {
        log::trace!("[Transport] No handler installed for '{}'", frame.msg_type);
        return true;
    }

    config
        .events
        .send(TransportEvent::message(frame.msg_type, frame.data))
        .is_ok()
}
