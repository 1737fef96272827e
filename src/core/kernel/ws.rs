use crate::core::errors::NetworkError;
use crate::core::traits::{Transport, TransportEvent, TransportEventSink};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub connect_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Tungstenite-based `Transport`
///
/// The stream is split on connect: the sink stays behind a mutex for senders,
/// the source is drained by a reader task that forwards data frames to the
/// event sink. Ping/pong is answered here and never reaches the owner.
pub struct TungsteniteTransport {
    config: WsConfig,
    writer: Arc<Mutex<Option<WsSink>>>,
    connected: Arc<AtomicBool>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new(WsConfig::default())
    }
}

impl std::fmt::Debug for TungsteniteTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteTransport")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl TungsteniteTransport {
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            writer: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            reader: std::sync::Mutex::new(None),
        }
    }

    fn stop_reader(&self) {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn send_raw(&self, message: Message) -> Result<(), NetworkError> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected);
        }

        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(NetworkError::NotConnected)?;
        sink.send(message).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            NetworkError::Transport(format!("Failed to send WebSocket message: {}", e))
        })
    }
}

/// Forward inbound frames until the link closes
async fn read_loop(
    mut read: WsSource,
    writer: Arc<Mutex<Option<WsSink>>>,
    connected: Arc<AtomicBool>,
    events: TransportEventSink,
) {
    loop {
        let event = match read.next().await {
            Some(Ok(Message::Text(text))) => TransportEvent::Text(text),
            Some(Ok(Message::Binary(data))) => TransportEvent::Binary(data),
            Some(Ok(Message::Ping(data))) => {
                if let Some(sink) = writer.lock().await.as_mut() {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        warn!("Failed to send pong response: {}", e);
                    }
                }
                continue;
            }
            Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "WebSocket closed by peer");
                connected.store(false, Ordering::SeqCst);
                let _ = events.send(TransportEvent::Disconnected);
                return;
            }
            Some(Err(e)) => {
                connected.store(false, Ordering::SeqCst);
                let _ = events.send(TransportEvent::Error(format!("WebSocket error: {}", e)));
                return;
            }
            None => {
                connected.store(false, Ordering::SeqCst);
                let _ = events.send(TransportEvent::Disconnected);
                return;
            }
        };

        if events.send(event).is_err() {
            debug!("Event receiver dropped, stopping reader");
            return;
        }
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    #[instrument(skip(self, events), fields(url = %url))]
    async fn connect(&self, url: &str, events: TransportEventSink) -> Result<(), NetworkError> {
        self.stop_reader();

        let (ws_stream, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(url))
            .await
            .map_err(|_| NetworkError::ConnectionTimeout("WebSocket connection timeout".to_string()))?
            .map_err(|e| NetworkError::Transport(format!("WebSocket connection failed: {}", e)))?;

        let (write, read) = ws_stream.split();
        *self.writer.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(read_loop(
            read,
            Arc::clone(&self.writer),
            Arc::clone(&self.connected),
            events,
        ));
        *self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    #[instrument(skip(self))]
    async fn disconnect(&self) -> Result<(), NetworkError> {
        self.stop_reader();
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), NetworkError> {
        self.send_raw(Message::Text(text)).await
    }

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), NetworkError> {
        self.send_raw(Message::Binary(data)).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
