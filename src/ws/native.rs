//! Native WebSocket client — `tokio-tungstenite`.
//!
//! - Background tokio task for connection management
//! - Application-level ping/pong health check
//! - Capped exponential backoff, reset on every successful connect
//! - Backoff sleep is cancelled by `disconnect()` or by dropping the client
//! - Subscription tracking + auto-resubscribe on reconnect
//! - Stream-based event delivery to consumer

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::domain::candle::CandleUpdate;
use crate::error::WsError;
use crate::ws::{
    Backoff, ConnectionState, Kind, MessageIn, MessageOut, SubscribeParams, SubscriptionSet,
    WsConfig, WsEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// ─── Commands from public API to background task ─────────────────────────────

enum Command {
    Send(MessageOut),
    Disconnect,
}

// ─── Disconnect reasons for reconnection decision ────────────────────────────

enum DisconnectReason {
    UserRequested,
    PongTimeout,
    RateLimited,
    Closed,
}

// ─── Background task state ───────────────────────────────────────────────────

struct TaskState {
    config: WsConfig,
    event_tx: mpsc::Sender<WsEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    subscriptions: SubscriptionSet,
    pending_messages: Vec<MessageOut>,
    backoff: Backoff,
    connection_state: Arc<AtomicU8>,
}

impl TaskState {
    /// Deliver an event, waiting for buffer space. The receiver lives on
    /// [`WsClient`], so a full buffer slows the socket reader instead of
    /// dropping updates.
    async fn emit(&self, event: WsEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!("WS event receiver dropped");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let prev = ConnectionState::from(self.connection_state.swap(state as u8, Ordering::SeqCst));
        if prev != state {
            tracing::debug!(from = %prev, to = %state, "WS connection state");
        }
    }

    /// Queue an outbound message while no socket is open. Subscriptions are
    /// only tracked since the resubscribe pass replays them; pings are dropped.
    fn queue_offline(&mut self, msg: MessageOut) {
        if !self.subscriptions.track(&msg) && !matches!(msg, MessageOut::Ping) {
            self.pending_messages.push(msg);
        }
    }
}

// ─── Public WsClient ─────────────────────────────────────────────────────────

/// Native WebSocket client using `tokio-tungstenite`.
///
/// Uses a background tokio task for connection management.
/// The public API communicates with it via mpsc channels.
pub struct WsClient {
    config: WsConfig,
    cmd_tx: Option<mpsc::Sender<Command>>,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<WsEvent>>,
    event_tx: mpsc::Sender<WsEvent>,
    task_handle: Option<JoinHandle<()>>,
    connection_state: Arc<AtomicU8>,
}

impl WsClient {
    /// Create a new WS client. Does not connect yet.
    pub fn new(config: WsConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            config,
            cmd_tx: None,
            event_rx: tokio::sync::Mutex::new(event_rx),
            event_tx,
            task_handle: None,
            connection_state: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
        }
    }

    /// Start the background connection task.
    ///
    /// Returns immediately; progress is reported through [`events`](Self::events).
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self) -> Result<(), WsError> {
        if self.cmd_tx.is_some() {
            return Ok(());
        }
        if self.config.url.is_empty() {
            return Err(WsError::ConnectionFailed("empty url".into()));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        self.cmd_tx = Some(cmd_tx);
        self.connection_state
            .store(ConnectionState::Connecting as u8, Ordering::SeqCst);

        let state = TaskState {
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
            cmd_rx,
            subscriptions: SubscriptionSet::new(),
            pending_messages: Vec::new(),
            backoff: Backoff::new(self.config.reconnect_policy.clone()),
            connection_state: Arc::clone(&self.connection_state),
        };

        self.task_handle = Some(tokio::spawn(run_task(state)));
        Ok(())
    }

    /// Disconnect from the WebSocket server.
    ///
    /// Sends a graceful close to the background task and waits for it to
    /// finish. A pending reconnect timer is cancelled.
    pub async fn disconnect(&mut self) -> Result<(), WsError> {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Disconnect).await;
        }

        if let Some(mut handle) = self.task_handle.take() {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("WS task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.connection_state
            .store(ConnectionState::Disconnected as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Send a message to the server.
    ///
    /// Messages sent while the socket is down are queued and flushed on the
    /// next connect. Returns `WsError::NotConnected` before `connect()`.
    pub fn send(&self, msg: MessageOut) -> Result<(), WsError> {
        match &self.cmd_tx {
            Some(tx) => tx.try_send(Command::Send(msg)).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    WsError::SendFailed("Command channel full".into())
                }
                mpsc::error::TrySendError::Closed(_) => WsError::NotConnected,
            }),
            None => Err(WsError::NotConnected),
        }
    }

    pub fn subscribe(&self, params: SubscribeParams) -> Result<(), WsError> {
        self.send(MessageOut::subscribe(params))
    }

    pub fn unsubscribe(&self, params: SubscribeParams) -> Result<(), WsError> {
        self.send(MessageOut::unsubscribe(params))
    }

    /// Whether the WebSocket is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from(self.connection_state.load(Ordering::SeqCst))
    }

    /// Shared handle to the connection state, readable after the client has
    /// been moved into another task.
    pub(crate) fn state_handle(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.connection_state)
    }

    /// Get a stream of events from the WebSocket connection.
    ///
    /// The returned stream borrows `self`, so it must be dropped
    /// before calling `disconnect()`.
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = WsEvent> + Send + '_>> {
        Box::pin(futures_util::stream::unfold(
            &self.event_rx,
            |rx| async move {
                let mut guard = rx.lock().await;
                guard.recv().await.map(|event| (event, rx))
            },
        ))
    }

    /// Validated candle updates, skipping every other event.
    ///
    /// Payloads that violate the candle invariants are logged and dropped.
    pub fn candle_updates(&self) -> impl Stream<Item = CandleUpdate> + Send + '_ {
        async_stream::stream! {
            let mut events = self.events();
            while let Some(event) = events.next().await {
                let WsEvent::Message(Kind::Candle(payload)) = event else {
                    continue;
                };
                match payload.data.to_update() {
                    Ok(update) => yield update,
                    Err(e) => tracing::debug!(key = %payload.data.key(), "Dropping live candle: {}", e),
                }
            }
        }
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn run_task(mut state: TaskState) {
    loop {
        // ── 1. Attempt connection ────────────────────────────────────────
        state.set_state(ConnectionState::Connecting);
        state.emit(WsEvent::Connecting).await;
        let connect_timeout = Duration::from_millis(state.config.connect_timeout_ms);
        let url = state.config.url.clone();
        let connect = attempt_connect(&url, connect_timeout);
        tokio::pin!(connect);

        let connected = loop {
            tokio::select! {
                result = &mut connect => break result,
                cmd = state.cmd_rx.recv() => match cmd {
                    Some(Command::Send(msg)) => state.queue_offline(msg),
                    Some(Command::Disconnect) | None => {
                        state.set_state(ConnectionState::Disconnected);
                        return;
                    }
                },
            }
        };

        let (sink, stream) = match connected {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(url = %state.config.url, "WebSocket connection failed: {}", e);
                state
                    .emit(WsEvent::Error(format!("Connection failed: {}", e)))
                    .await;
                if backoff_sleep(&mut state, false).await {
                    continue;
                }
                return;
            }
        };

        // ── 2. Connected ─────────────────────────────────────────────────
        state.backoff.reset();
        state.set_state(ConnectionState::Connected);
        state.emit(WsEvent::Connected).await;
        tracing::info!(url = %state.config.url, "WebSocket connected");

        // ── 3. Flush pending messages and resubscribe ────────────────────
        let mut sink = sink;
        resubscribe_all(&mut sink, &state.subscriptions).await;
        flush_pending(&mut sink, &mut state.pending_messages).await;

        // ── 4. Inner select! loop ────────────────────────────────────────
        let reason = run_connected(&mut state, sink, stream).await;

        // ── 5. Post-disconnect decision ──────────────────────────────────
        state.set_state(ConnectionState::Disconnected);

        let rate_limited = match reason {
            DisconnectReason::UserRequested => return,
            DisconnectReason::RateLimited => true,
            DisconnectReason::PongTimeout | DisconnectReason::Closed => false,
        };
        if !backoff_sleep(&mut state, rate_limited).await {
            return;
        }
    }
}

/// The inner connected loop. Runs until the connection breaks.
async fn run_connected(
    state: &mut TaskState,
    mut sink: WsSink,
    mut stream: SplitStream<WsStream>,
) -> DisconnectReason {
    let ping_dur = Duration::from_millis(state.config.ping_interval_ms);
    let pong_dur = Duration::from_millis(state.config.pong_timeout_ms);

    let mut ping_interval = tokio::time::interval(ping_dur);
    ping_interval.reset(); // skip immediate first tick

    let mut pong_deadline: Option<tokio::time::Instant> = None;

    // Parked far in the future while no ping is outstanding.
    let far_future = tokio::time::Instant::now() + Duration::from_secs(86400);
    let pong_sleep = tokio::time::sleep_until(far_future);
    tokio::pin!(pong_sleep);

    loop {
        tokio::select! {
            // ── a) Incoming WS message ───────────────────────────────────
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_str: &str = text.as_ref();
                        match serde_json::from_str::<MessageIn>(text_str) {
                            Ok(msg_in) => {
                                match &msg_in.kind {
                                    Kind::Pong => {
                                        pong_deadline = None;
                                        pong_sleep.as_mut().reset(far_future);
                                    }
                                    Kind::Error(e) => {
                                        tracing::warn!(code = ?e.code, "Server error message: {}", e.message);
                                    }
                                    _ => {}
                                }
                                state.emit(WsEvent::Message(msg_in.kind)).await;
                            }
                            Err(e) => {
                                tracing::warn!("WS deserialization error: {} (raw: {})", e, text_str);
                                state
                                    .emit(WsEvent::Error(format!("Deserialization error: {}", e)))
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        tracing::info!(code, "WebSocket closed by server: {}", reason);
                        state.emit(WsEvent::Disconnected {
                            code: Some(code),
                            reason,
                        }).await;
                        return match code {
                            1008 => DisconnectReason::RateLimited,
                            _ => DisconnectReason::Closed,
                        };
                    }
                    Some(Ok(_)) => {} // Binary, Frame
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        tracing::warn!("WebSocket error: {}", reason);
                        state.emit(WsEvent::Disconnected { code: None, reason }).await;
                        return DisconnectReason::Closed;
                    }
                    None => {
                        state.emit(WsEvent::Disconnected {
                            code: None,
                            reason: "Stream ended".into(),
                        }).await;
                        return DisconnectReason::Closed;
                    }
                }
            }

            // ── b) Command from public API ───────────────────────────────
            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(msg_out)) => {
                        state.subscriptions.track(&msg_out);
                        if let Err(e) = send_msg(&mut sink, &msg_out).await {
                            tracing::warn!("Send failed: {}", e);
                        }
                    }
                    Some(Command::Disconnect) => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client disconnect".into(),
                        }))).await;
                        return DisconnectReason::UserRequested;
                    }
                    // WsClient dropped
                    None => return DisconnectReason::UserRequested,
                }
            }

            // ── c) Ping interval ─────────────────────────────────────────
            _ = ping_interval.tick() => {
                if let Err(e) = send_msg(&mut sink, &MessageOut::Ping).await {
                    tracing::warn!("Failed to send ping: {}", e);
                } else if pong_deadline.is_none() {
                    let deadline = tokio::time::Instant::now() + pong_dur;
                    pong_deadline = Some(deadline);
                    pong_sleep.as_mut().reset(deadline);
                }
            }

            // ── d) Pong timeout ──────────────────────────────────────────
            () = &mut pong_sleep, if pong_deadline.is_some() => {
                tracing::warn!(
                    timeout_ms = state.config.pong_timeout_ms,
                    "Pong timeout, dropping connection"
                );
                state.emit(WsEvent::Disconnected {
                    code: None,
                    reason: "Pong timeout".into(),
                }).await;
                let _ = sink.close().await;
                return DisconnectReason::PongTimeout;
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn attempt_connect(
    url: &str,
    timeout: Duration,
) -> Result<(WsSink, SplitStream<WsStream>), String> {
    let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| "Connection timeout".to_string())?
        .map_err(|e| e.to_string())?;

    Ok(ws_stream.split())
}

async fn send_msg(sink: &mut WsSink, msg: &MessageOut) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}

async fn resubscribe_all(sink: &mut WsSink, subs: &SubscriptionSet) {
    if subs.is_empty() {
        return;
    }
    tracing::info!("Resubscribing to {} tracked subscription(s)", subs.len());
    for sub in subs.iter() {
        if let Err(e) = send_msg(sink, &MessageOut::subscribe(sub.clone())).await {
            tracing::warn!(sub = %sub.subscription_key(), "Failed to resubscribe: {}", e);
        }
    }
}

async fn flush_pending(sink: &mut WsSink, pending: &mut Vec<MessageOut>) {
    if pending.is_empty() {
        return;
    }
    tracing::debug!("Flushing {} pending message(s)", pending.len());
    for msg in std::mem::take(pending) {
        if let Err(e) = send_msg(sink, &msg).await {
            tracing::warn!("Failed to flush pending message: {}", e);
        }
    }
}

// ─── Reconnection backoff ────────────────────────────────────────────────────

/// Sleep before the next attempt. Returns `false` when the task should stop:
/// reconnect disabled, attempts exhausted, or a disconnect arrived mid-sleep.
async fn backoff_sleep(state: &mut TaskState, rate_limited: bool) -> bool {
    if !state.config.reconnect {
        state.set_state(ConnectionState::Disconnected);
        return false;
    }
    let Some(delay) = state.backoff.next_delay(rate_limited) else {
        tracing::warn!(attempts = state.backoff.attempt(), "Reconnect attempts exhausted");
        state.set_state(ConnectionState::Disconnected);
        state.emit(WsEvent::MaxReconnectReached).await;
        return false;
    };

    let attempt = state.backoff.attempt();
    let delay_ms = delay.as_millis() as u64;
    tracing::info!(attempt, delay_ms, rate_limited, "Reconnecting after backoff");
    state.set_state(ConnectionState::Backoff);
    state.emit(WsEvent::Reconnecting { attempt, delay_ms }).await;

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            cmd = state.cmd_rx.recv() => match cmd {
                Some(Command::Send(msg)) => state.queue_offline(msg),
                Some(Command::Disconnect) | None => {
                    tracing::debug!("Backoff cancelled");
                    state.set_state(ConnectionState::Disconnected);
                    return false;
                }
            },
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
