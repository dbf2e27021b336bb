//! WebSocket layer — messages, subscriptions, connection state, reconnect policy.
//!
//! The transport itself lives in `native.rs` (`tokio-tungstenite`, behind the
//! `ws-native` feature). This module defines the shared message/event types.
//!
//! Wire contract:
//!
//! ```text
//! → {"type":"subscribe","params":{"symbol":"BTC","granularity":"1h"}}
//! → {"type":"unsubscribe","params":{"symbol":"BTC","granularity":"1h"}}
//! → {"type":"ping"}
//! ← {"type":"candle","data":{"symbol":"BTC","granularity":"1h","t":..,"o":..,"h":..,"l":..,"c":..,"closed":false}}
//! ← {"type":"pong"}
//! ← {"type":"heartbeat","server_time":..}
//! ← {"type":"error","message":"..","code":".."}
//! ```

pub mod subscriptions;

#[cfg(feature = "ws-native")]
pub mod native;

use crate::domain::candle::wire::WsCandle;
use crate::shared::backoff::capped_exponential;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use subscriptions::{SubscribeParams, SubscriptionSet};

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum MessageOut {
    #[serde(rename = "subscribe")]
    Subscribe { params: SubscribeParams },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { params: SubscribeParams },
    #[serde(rename = "ping")]
    Ping,
}

impl MessageOut {
    pub fn subscribe(params: SubscribeParams) -> Self {
        Self::Subscribe { params }
    }

    pub fn unsubscribe(params: SubscribeParams) -> Self {
        Self::Unsubscribe { params }
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// Raw inbound message from the server.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageIn {
    #[serde(flatten)]
    pub kind: Kind,
}

/// The type of inbound WebSocket message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Kind {
    #[serde(rename = "candle")]
    Candle(CandlePayload),
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatPayload),
    #[serde(rename = "error")]
    Error(WsErrorPayload),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandlePayload {
    pub data: WsCandle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub server_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsErrorPayload {
    pub message: String,
    pub code: Option<String>,
}

// ─── WsEvent ─────────────────────────────────────────────────────────────────

/// High-level events emitted by the WS client to the consumer.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// A parsed message from the server.
    Message(Kind),
    /// A connect attempt has started.
    Connecting,
    /// Connection established (attempt counter has been reset).
    Connected,
    /// Connection lost; a reconnect follows unless the client is stopping.
    Disconnected { code: Option<u16>, reason: String },
    /// Waiting `delay_ms` before reconnect attempt number `attempt`.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Reconnect attempts exhausted; the client is now idle.
    MaxReconnectReached,
    /// A deserialization or protocol error.
    Error(String),
}

// ─── ConnectionState ─────────────────────────────────────────────────────────

/// Connection lifecycle of one live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Backoff = 3,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Backoff,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

// ─── Reconnect policy ────────────────────────────────────────────────────────

/// `delay = min(cap, base * 2^attempt)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Cap used after a policy-violation close (code 1008).
    pub rate_limited_max_delay_ms: u64,
    pub jitter: bool,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 15_000,
            rate_limited_max_delay_ms: 300_000,
            jitter: false,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for_attempt(&self, attempt: u32, rate_limited: bool) -> Duration {
        let cap = if rate_limited {
            self.rate_limited_max_delay_ms
        } else {
            self.max_delay_ms
        };
        capped_exponential(
            Duration::from_millis(self.base_delay_ms),
            2.0,
            attempt,
            Duration::from_millis(cap),
            self.jitter,
        )
    }
}

/// Attempt counter driving [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next reconnect, advancing the counter. `None` once
    /// `max_attempts` is exhausted.
    pub fn next_delay(&mut self, rate_limited: bool) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }
        let delay = self.policy.delay_for_attempt(self.attempt, rate_limited);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Called on every successful `Connected` transition.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failed attempts since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// ─── Config ──────────────────────────────────────────────────────────────────

/// Configuration for the WS client.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub reconnect: bool,
    pub reconnect_policy: ReconnectPolicy,
    pub connect_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: crate::network::DEFAULT_WS_URL.to_string(),
            reconnect: true,
            reconnect_policy: ReconnectPolicy::default(),
            connect_timeout_ms: 10_000,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 10_000,
        }
    }
}
