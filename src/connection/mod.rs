//! Persistent connection state machine.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                  │
//!      │                      fail            link down
//!      │                        ▼                  ▼
//!      └──── exhausted ──── Reconnecting ◀─────────┘
//! ```
//!
//! Inbound transport events are drained by a pump task. Text goes through the
//! frame accumulator, binary goes straight to the active processor, and the
//! resulting events are dispatched to handlers in registration order.
//!
//! A connect only succeeds if the transport still reports the link up when it
//! returns. Link-down reports that arrive while Connecting are settled by that
//! check; once Connected, exactly one report performs the teardown.

pub mod backoff;
pub mod session;

use crate::core::config::NetworkConfig;
use crate::core::dispatch::{HandlerDispatcher, HandlerId};
use crate::core::errors::NetworkError;
use crate::core::kernel::TextFrameAccumulator;
use crate::core::traits::{EventHandler, SessionSource, Transport, TransportEvent, TransportEventSink};
use crate::core::types::{ConnectionState, NetworkEvent, OutboundChat, OutboundEnvelope};
use crate::processors::ProcessorRegistry;
use serde_json::Value;
use session::{SessionState, SessionUpdate};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Clears the connecting flag on every exit path of a connect attempt
struct ConnectingGuard<'a>(&'a AtomicBool);

impl<'a> ConnectingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner<T: Transport> {
    transport: T,
    config: NetworkConfig,
    url: String,
    state: Mutex<ConnectionState>,
    connecting: AtomicBool,
    manual_disconnect: AtomicBool,
    reconnect_pending: AtomicBool,
    reconnect_attempts: AtomicU32,
    monitor_started: AtomicBool,
    session: Arc<SessionState>,
    /// Session the next connect asks the server to resume
    resume_session: Mutex<Option<String>>,
    accumulator: Mutex<TextFrameAccumulator>,
    registry: Arc<ProcessorRegistry>,
    encoding: RwLock<&'static str>,
    dispatcher: Arc<HandlerDispatcher>,
    shutdown: CancellationToken,
    events_tx: TransportEventSink,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

/// Single logical connection to the chat server
///
/// Cloning yields another handle to the same connection.
pub struct ChatConnection<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ChatConnection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for ChatConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConnection")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("encoding", &self.encoding())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ChatConnection<T> {
    /// Connection with the default processors and a private dispatcher
    pub fn new(transport: T, config: NetworkConfig) -> Self {
        Self::with_parts(
            transport,
            config,
            Arc::new(ProcessorRegistry::with_defaults()),
            Arc::new(HandlerDispatcher::new()),
        )
    }

    pub fn with_parts(
        transport: T,
        config: NetworkConfig,
        registry: Arc<ProcessorRegistry>,
        dispatcher: Arc<HandlerDispatcher>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let encoding = registry.resolve(&config.socket.encoding).encoding();
        let accumulator = TextFrameAccumulator::new(config.socket.max_message_size);

        Self {
            inner: Arc::new(Inner {
                transport,
                url: config.websocket_url(),
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                connecting: AtomicBool::new(false),
                manual_disconnect: AtomicBool::new(false),
                reconnect_pending: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                monitor_started: AtomicBool::new(false),
                session: Arc::new(SessionState::new()),
                resume_session: Mutex::new(None),
                accumulator: Mutex::new(accumulator),
                registry,
                encoding: RwLock::new(encoding),
                dispatcher,
                shutdown: CancellationToken::new(),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn dispatcher(&self) -> &Arc<HandlerDispatcher> {
        &self.inner.dispatcher
    }

    pub fn on_event<H: EventHandler + 'static>(&self, handler: H) -> HandlerId {
        self.inner.dispatcher.register(handler)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<NetworkEvent> {
        self.inner.dispatcher.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn reset_reconnect_attempts(&self) {
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session.get()
    }

    /// Read-only session view for the request client
    pub fn session_source(&self) -> Arc<dyn SessionSource> {
        Arc::clone(&self.inner.session) as Arc<dyn SessionSource>
    }

    /// Forget the current session and notify handlers. Later reconnects
    /// no longer ask to resume it.
    pub fn end_session(&self) {
        self.inner.lock_resume().take();
        if let Some(session_id) = self.inner.session.clear() {
            info!(%session_id, "Session ended");
            self.inner.dispatch(&NetworkEvent::SessionEnded(session_id));
        }
    }

    pub fn encoding(&self) -> &'static str {
        *self
            .inner
            .encoding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the active processor. Unknown keys fall back to `json`.
    ///
    /// Returns the encoding actually in effect.
    pub fn set_encoding(&self, key: &str) -> &'static str {
        let encoding = self.inner.registry.resolve(key).encoding();
        let previous = std::mem::replace(
            &mut *self
                .inner
                .encoding
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            encoding,
        );
        if previous != encoding {
            self.inner.lock_accumulator().clear();
            info!(from = previous, to = encoding, "Message encoding changed");
        }
        encoding
    }

    /// Open the connection
    ///
    /// A call made while a connect is in flight, or while connected, does not
    /// start a second transport connect and returns the current state.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<ConnectionState, NetworkError> {
        self.open(None, cancel).await
    }

    /// Open the connection asking the server to resume `session_id`
    ///
    /// Automatic reconnects keep asking for the same session until it ends.
    pub async fn connect_with_session(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ConnectionState, NetworkError> {
        self.open(Some(session_id.to_string()), cancel).await
    }

    async fn open(
        &self,
        resume: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<ConnectionState, NetworkError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(NetworkError::Cancelled);
        }
        self.inner.manual_disconnect.store(false, Ordering::SeqCst);
        if !self.is_connected() {
            *self.inner.lock_resume() = resume;
        }
        self.inner.connect(cancel).await
    }

    /// Ask the server for a fresh session, opening the link first if needed
    ///
    /// The current session is ended before the request goes out so the id
    /// the server answers with is accepted.
    #[instrument(skip(self, cancel))]
    pub async fn request_new_session(&self, cancel: &CancellationToken) -> Result<(), NetworkError> {
        if !self.is_connected() {
            warn!("Not connected, connecting before requesting a session");
            self.connect(cancel).await?;
        }
        if !self.is_connected() {
            let message = "Cannot request a session without a connection".to_string();
            error!("{}", message);
            self.inner.dispatch(&NetworkEvent::Error(message));
            return Err(NetworkError::NotConnected);
        }

        self.end_session();
        info!("Requesting new session");
        self.send_message("session", Value::String("request".to_string()))
            .await
    }

    /// Close the connection without scheduling a reconnect
    #[instrument(skip(self), fields(url = %self.inner.url))]
    pub async fn disconnect(&self) -> Result<(), NetworkError> {
        self.inner.manual_disconnect.store(true, Ordering::SeqCst);
        let result = self.inner.transport.disconnect().await;
        self.inner.close_link();
        info!("Disconnected");
        result
    }

    /// Start the periodic monitor that revives a dropped connection
    pub fn start_monitor(&self) {
        if self.inner.monitor_started.swap(true, Ordering::SeqCst) {
            return;
        }

        // tokio rejects a zero period
        let period = self
            .inner
            .config
            .socket
            .monitor_interval()
            .max(Duration::from_millis(1));
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        debug!(?period, "Starting connection monitor");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                if inner.should_revive() {
                    info!("Monitor found connection down, reconnecting");
                    let _ = inner.connect(&CancellationToken::new()).await;
                }
            }
            debug!("Connection monitor stopped");
        });
    }

    pub async fn send_text(&self, text: String) -> Result<(), NetworkError> {
        self.ensure_connected()?;
        let result = self.inner.transport.send_text(text).await;
        self.check_send(result)
    }

    pub async fn send_binary(&self, data: Vec<u8>) -> Result<(), NetworkError> {
        self.ensure_connected()?;
        let result = self.inner.transport.send_binary(data).await;
        self.check_send(result)
    }

    /// Send a `{"type": ..., "data": ...}` envelope
    pub async fn send_message(&self, message_type: &str, data: Value) -> Result<(), NetworkError> {
        let envelope = OutboundEnvelope {
            message_type: message_type.to_string(),
            data,
        };
        let text = serde_json::to_string(&envelope)
            .map_err(|e| NetworkError::Serialization(format!("Failed to serialize message: {}", e)))?;
        self.send_text(text).await
    }

    /// Send a chat line tagged with the current session
    pub async fn send_chat(&self, message: &str) -> Result<(), NetworkError> {
        let chat = OutboundChat {
            message: message.to_string(),
            session_id: self.session_id(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let data = serde_json::to_value(&chat)
            .map_err(|e| NetworkError::Serialization(format!("Failed to serialize chat: {}", e)))?;
        self.send_message("chat", data).await
    }

    /// Stop every background task and close the link. The connection cannot
    /// be reopened afterwards.
    pub async fn shutdown(&self) {
        info!("Shutting down connection");
        self.inner.manual_disconnect.store(true, Ordering::SeqCst);
        self.inner.shutdown.cancel();
        if let Err(e) = self.inner.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed during shutdown");
        }
        self.inner.close_link();
    }

    /// A failed send on a dead link takes the link down like a read error
    fn check_send(&self, result: Result<(), NetworkError>) -> Result<(), NetworkError> {
        if let Err(e) = &result {
            warn!(error = %e, "Send failed");
            if !self.inner.transport.is_connected() {
                self.inner.handle_link_down(Some(e.to_string()));
            }
        }
        result
    }

    fn ensure_connected(&self) -> Result<(), NetworkError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(NetworkError::NotConnected)
        }
    }
}

impl<T: Transport> Inner<T> {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, to: ConnectionState) {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, to)
        };
        if from != to {
            debug!(%from, %to, "Connection state changed");
            self.dispatch(&NetworkEvent::StateChanged { from, to });
        }
    }

    fn dispatch(&self, event: &NetworkEvent) {
        self.dispatcher.dispatch(event);
    }

    fn lock_accumulator(&self) -> std::sync::MutexGuard<'_, TextFrameAccumulator> {
        self.accumulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_resume(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.resume_session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn target_url(&self) -> String {
        match self.lock_resume().as_deref() {
            Some(session_id) => self.config.websocket_url_with_session(session_id),
            None => self.url.clone(),
        }
    }

    fn should_revive(&self) -> bool {
        self.state() == ConnectionState::Disconnected
            && !self.reconnect_pending.load(Ordering::SeqCst)
            && !self.connecting.load(Ordering::SeqCst)
            && !self.manual_disconnect.load(Ordering::SeqCst)
            && !self.shutdown.is_cancelled()
    }

    #[instrument(skip(self, cancel), fields(url = %self.url))]
    async fn connect(self: &Arc<Self>, cancel: &CancellationToken) -> Result<ConnectionState, NetworkError> {
        if self.state() == ConnectionState::Connected {
            debug!("Already connected");
            return Ok(ConnectionState::Connected);
        }
        // Held until the outcome is applied, so no second connect can start
        // while the state still reads Connecting
        let Some(_guard) = ConnectingGuard::acquire(&self.connecting) else {
            debug!("Connect already in progress");
            return Ok(self.state());
        };

        self.ensure_pump();
        self.set_state(ConnectionState::Connecting);
        self.lock_accumulator().clear();

        let url = self.target_url();
        debug!(%url, "Opening link");
        let timeout = self.config.socket.connect_timeout();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(NetworkError::Cancelled),
            () = self.shutdown.cancelled() => Err(NetworkError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.transport.connect(&url, self.events_tx.clone())) => {
                outcome.unwrap_or_else(|_| {
                    Err(NetworkError::ConnectionTimeout(format!("no connection after {:?}", timeout)))
                })
            }
        };
        // Link-down reports seen while Connecting are not acted on, the
        // transport is asked directly instead
        let result = result.and_then(|()| {
            if self.transport.is_connected() {
                Ok(())
            } else {
                Err(NetworkError::Transport("link closed while connecting".to_string()))
            }
        });

        match result {
            Ok(()) => {
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);
                info!("Connected");
                self.dispatch(&NetworkEvent::Connected);
                // Closed between the check above and the state change
                if !self.transport.is_connected() {
                    self.handle_link_down(Some("link closed right after connecting".to_string()));
                }
                Ok(self.state())
            }
            Err(NetworkError::Cancelled) => {
                info!("Connect cancelled");
                self.set_state(ConnectionState::Disconnected);
                Err(NetworkError::Cancelled)
            }
            Err(e) => {
                error!(error = %e, "Connect failed");
                self.set_state(ConnectionState::Disconnected);
                self.dispatch(&NetworkEvent::Error(e.to_string()));
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Arm a delayed reconnect according to the policy
    fn schedule_reconnect(self: &Arc<Self>) {
        let policy = &self.config.socket.reconnect;
        if !policy.auto_reconnect
            || self.manual_disconnect.load(Ordering::SeqCst)
            || self.shutdown.is_cancelled()
        {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
        if !policy.allows_attempt(attempts) {
            warn!(attempts, "Reconnect attempts exhausted");
            self.set_state(ConnectionState::Disconnected);
            self.dispatch(&NetworkEvent::ReconnectExhausted { attempts });
            return;
        }

        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already scheduled");
            return;
        }

        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = policy.delay_for(attempt);
        info!(attempt, max_attempts = policy.max_attempts, ?delay, "Scheduling reconnect");
        self.set_state(ConnectionState::Reconnecting);
        self.dispatch(&NetworkEvent::ReconnectScheduled { attempt, delay });

        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            let Some(inner) = weak.upgrade() else { return };
            inner.reconnect_pending.store(false, Ordering::SeqCst);
            if inner.manual_disconnect.load(Ordering::SeqCst) {
                inner.set_state(ConnectionState::Disconnected);
                return;
            }
            // Failures are reported through events and reschedule themselves
            let _ = inner.connect(&CancellationToken::new()).await;
        });
    }

    fn ensure_pump(self: &Arc<Self>) {
        let Some(mut rx) = self
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = rx.recv() => event,
                };
                let Some(event) = event else { break };
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_transport_event(event);
            }
            debug!("Inbound pump stopped");
        });
    }

    fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected => debug!("Transport reports link up"),
            TransportEvent::Text(chunk) => {
                let frames = self.lock_accumulator().push(&chunk);
                if frames.is_empty() {
                    return;
                }
                let processor = self.registry.resolve(self.current_encoding());
                for frame in frames {
                    self.route(processor.process_text(&frame));
                }
            }
            TransportEvent::Binary(data) => {
                let processor = self.registry.resolve(self.current_encoding());
                self.route(processor.process_binary(&data));
            }
            TransportEvent::Disconnected => self.handle_link_down(None),
            TransportEvent::Error(message) => self.handle_link_down(Some(message)),
        }
    }

    fn current_encoding(&self) -> &'static str {
        *self.encoding.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, events: Vec<NetworkEvent>) {
        for event in events {
            if let NetworkEvent::SessionAssigned(session_id) = &event {
                match self.session.assign(session_id) {
                    SessionUpdate::Assigned => {
                        info!(%session_id, "Session assigned");
                        *self.lock_resume() = Some(session_id.clone());
                    }
                    SessionUpdate::Unchanged => {
                        debug!(%session_id, "Session re-announced");
                        continue;
                    }
                    SessionUpdate::Conflict { current } => {
                        warn!(%current, offered = %session_id, "Ignoring different session id while one is held");
                        continue;
                    }
                }
            }
            self.dispatch(&event);
        }
    }

    fn handle_link_down(self: &Arc<Self>, error: Option<String>) {
        if let Some(message) = &error {
            warn!(%message, "Transport error");
            self.dispatch(&NetworkEvent::Error(message.clone()));
        }
        if self.transport.is_connected() {
            debug!("Link-down report for a replaced link, ignoring");
            return;
        }
        if !self.release_link() {
            // A connect in flight or an earlier report owns the teardown
            debug!(state = %self.state(), "Link already down");
            return;
        }

        if error.is_none() {
            warn!("Connection lost");
        }
        self.finish_teardown(true);
        self.schedule_reconnect();
    }

    /// Move Connected to Disconnected. Only one caller per link gets `true`.
    fn release_link(&self) -> bool {
        let released = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        };
        if released {
            let (from, to) = (ConnectionState::Connected, ConnectionState::Disconnected);
            debug!(%from, %to, "Connection state changed");
            self.dispatch(&NetworkEvent::StateChanged { from, to });
        }
        released
    }

    /// Local teardown shared by every way a link ends
    fn close_link(&self) {
        let was_connected = self.release_link();
        self.set_state(ConnectionState::Disconnected);
        self.finish_teardown(was_connected);
    }

    fn finish_teardown(&self, was_connected: bool) {
        self.lock_accumulator().clear();
        if was_connected {
            self.dispatch(&NetworkEvent::Disconnected);
        }
        if let Some(session_id) = self.session.clear() {
            self.dispatch(&NetworkEvent::SessionEnded(session_id));
        }
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
