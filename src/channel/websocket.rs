//! WebSocket implementation of the duplex channel.
//!
//! Wire format: one JSON document per text frame, both directions. The
//! authentication token travels as a bearer header on the handshake request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use super::{ChannelEvent, ChannelStatus, DuplexChannel};
use crate::config::SessionOptions;
use crate::error::{LiveError, LiveResult};
use crate::protocol::ClientMessage;

/// Capacity of the outbound send queue.
const SEND_QUEUE_CAPACITY: usize = 256;

/// Capacity of the inbound event queue.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Close code reported when the connection drops without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// WebSocket-backed duplex channel.
pub struct WebSocketChannel {
    endpoint: String,
    token: Option<String>,
    handshake_timeout: Duration,
    /// Connected flag shared with the connection task for live status reads.
    connected: Arc<AtomicBool>,
    /// Guards against overlapping connect calls.
    connecting: AtomicBool,
    ws_sender: Arc<tokio::sync::Mutex<Option<mpsc::Sender<ClientMessage>>>>,
    events_tx: mpsc::Sender<ChannelEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketChannel {
    /// Create a channel for the session's endpoint. Does not connect.
    pub fn new(options: &SessionOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            endpoint: options.endpoint.clone(),
            token: options.token.clone(),
            handshake_timeout: options.handshake_timeout,
            connected: Arc::new(AtomicBool::new(false)),
            connecting: AtomicBool::new(false),
            ws_sender: Arc::new(tokio::sync::Mutex::new(None)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            task: Mutex::new(None),
        }
    }

    /// Build the handshake request, with the bearer token when configured.
    fn build_request(&self) -> LiveResult<http::Request<()>> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| LiveError::ConnectionFailed(format!("invalid endpoint: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| LiveError::ConnectionFailed("endpoint has no host".to_string()))?
            .to_string();

        let mut builder = http::Request::builder()
            .uri(&self.endpoint)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            );
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder
            .body(())
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl DuplexChannel for WebSocketChannel {
    async fn connect(&self) -> LiveResult<()> {
        if self.connected.load(Ordering::SeqCst) || self.connecting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.connect_inner().await;
        self.connecting.store(false, Ordering::SeqCst);
        result
    }

    async fn disconnect(&self) -> LiveResult<()> {
        *self.ws_sender.lock().await = None;
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        debug!("channel disconnected");
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        if self.connected.load(Ordering::SeqCst) {
            ChannelStatus::Connected
        } else {
            ChannelStatus::Disconnected
        }
    }

    async fn send(&self, message: ClientMessage) -> LiveResult<()> {
        if let Some(sender) = self.ws_sender.lock().await.as_ref() {
            sender
                .send(message)
                .await
                .map_err(|e| LiveError::ChannelClosed(e.to_string()))
        } else {
            Err(LiveError::NotConnected)
        }
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.events_rx.lock().take()
    }
}

impl WebSocketChannel {
    async fn connect_inner(&self) -> LiveResult<()> {
        let request = self.build_request()?;
        let connect_result =
            timeout(self.handshake_timeout, tokio_tungstenite::connect_async(request)).await;
        let (ws_stream, _response) = match connect_result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(LiveError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                return Err(LiveError::Timeout("channel handshake timed out".to_string()));
            }
        };

        info!(endpoint = %self.endpoint, "channel connected");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientMessage>(SEND_QUEUE_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);
        self.connected.store(true, Ordering::SeqCst);

        let events = self.events_tx.clone();
        let connected = self.connected.clone();
        let ws_sender = self.ws_sender.clone();

        let _ = events.send(ChannelEvent::Connected).await;

        let handle = tokio::spawn(async move {
            let mut close: Option<(u16, String)> = None;
            loop {
                tokio::select! {
                    Some(message) = rx.recv() => {
                        let json = match serde_json::to_string(&message) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("failed to serialize outbound message: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                            break;
                        }
                    }

                    Some(frame) = ws_source.next() => {
                        match frame {
                            Ok(Message::Text(text)) => {
                                let _ = events.send(ChannelEvent::Message(text.to_string())).await;
                            }
                            Ok(Message::Close(frame)) => {
                                debug!("channel closed by server");
                                close = frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                                break;
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    warn!("failed to send pong: {e}");
                                }
                            }
                            Err(e) => {
                                let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                                break;
                            }
                            _ => {}
                        }
                    }

                    else => break,
                }
            }

            connected.store(false, Ordering::SeqCst);
            *ws_sender.lock().await = None;
            let (code, reason) =
                close.unwrap_or_else(|| (ABNORMAL_CLOSURE, "connection lost".to_string()));
            let _ = events.send(ChannelEvent::Closed { code, reason }).await;
            debug!("channel task ended");
        });

        *self.task.lock() = Some(handle);
        Ok(())
    }
}
