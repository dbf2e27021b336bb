//! Unified error types.
//!
//! [`SyncError`] carries the recoverable taxonomy of the engine. None of these
//! conditions is fatal: components absorb I/O failures at their boundary and
//! the controller only ever observes "data arrived" or "no data yet".

use thiserror::Error;

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A record violated the candle invariants and was dropped.
    #[error("Invalid record: {reason}")]
    InvalidRecord { reason: String },

    /// A history fetch failed; the caller receives an empty series.
    #[error("Fetch failed for {key}: {reason}")]
    FetchFailed { key: String, reason: String },

    /// The live transport closed or errored; a reconnect is scheduled.
    #[error("Stream disconnected: code={code:?} reason={reason}")]
    StreamDisconnected { code: Option<u16>, reason: String },

    /// A cache entry could not be decoded; it is treated as a miss.
    #[error("Cache entry {key} corrupt: {reason}")]
    CacheCorrupt { key: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// The sync loop's command buffer is full; the edge event was dropped.
    #[error("Sync loop busy, edge event dropped")]
    Busy,

    /// The sync loop has shut down and no longer accepts commands.
    #[error("Sync loop stopped")]
    Stopped,
}

/// HTTP-layer errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[cfg(feature = "http")]
    #[error("Request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Timeout")]
    Timeout,

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// WebSocket errors.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Connection closed: code={code:?} reason={reason}")]
    Closed {
        code: Option<u16>,
        reason: String,
    },
}

/// Cache persistence errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Corrupt entry: {0}")]
    Corrupt(String),
}
