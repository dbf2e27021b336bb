//! # candle-sync
//!
//! Keeps an OHLC candle series for one `(symbol, granularity)` in sync from
//! three sources: a REST history backfill, a local cache, and a live
//! WebSocket stream.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core** — Newtypes, candle domain model, `CandleStore` merge, errors
//! 2. **Cache** — `CacheLayer` over a key-value store with a freshness window
//! 3. **History** — `CandleHttp` with retry policies, paging `HistoryProvider`
//! 4. **Live** — `tokio-tungstenite` client with backoff reconnect, `LiveStream`
//! 5. **Sync** — `SyncController` state machine and its event loop
//! 6. **High-Level Client** — `CandleSync` builder wiring it all together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use candle_sync::prelude::*;
//!
//! let (renderer, mut renders) = ChannelRenderer::new();
//! let engine = CandleSync::builder()
//!     .api_url("https://api.example.com")
//!     .ws_url("wss://stream.example.com/ws")
//!     .cache_dir("/tmp/candles")
//!     .renderer(renderer)
//!     .build()?;
//!
//! engine.switch_key(SeriesKey::new("BTC", Granularity::Hour1)).await?;
//! while let Some(event) = renders.recv().await {
//!     // draw
//! }
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes used across all modules.
pub mod shared;

/// Domain modules: types, wire types, conversions, state.
pub mod domain;

/// Unified error types.
pub mod error;

/// Network URL constants.
pub mod network;

// ── Layer 2: Cache ───────────────────────────────────────────────────────────

/// Candle snapshot cache with TTL.
pub mod cache;

// ── Layer 3: History ─────────────────────────────────────────────────────────

/// HTTP client with retry policies.
#[cfg(feature = "http")]
pub mod http;

/// History provider contract and the REST implementation.
pub mod history;

// ── Layer 4: Live ────────────────────────────────────────────────────────────

/// WebSocket client: messages, subscriptions, events, reconnect policy.
pub mod ws;

/// Live stream contract and the WebSocket implementation.
pub mod live;

// ── Layer 5: Sync ────────────────────────────────────────────────────────────

/// `SyncController`, renderer interface and event loop.
pub mod sync;

// ── Layer 6: High-Level Client ───────────────────────────────────────────────

/// `CandleSync` — the primary entry point.
#[cfg(all(feature = "http", feature = "ws-native"))]
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared newtypes
    pub use crate::shared::{Granularity, SeriesKey, Symbol};

    // Domain types
    pub use crate::domain::candle::{Candle, CandleSeries, CandleStore, CandleUpdate};

    // Errors
    pub use crate::error::{CacheError, HttpError, SyncError, WsError};

    // Network
    pub use crate::network::{DEFAULT_API_URL, DEFAULT_WS_URL};

    // Cache
    pub use crate::cache::{CacheLayer, CandleCache, FileStore, KeyValueStore, MemoryStore, NoCache};

    // History
    pub use crate::history::{FetchOutcome, FetchRequest, HistoryProvider};
    #[cfg(feature = "http")]
    pub use crate::history::HttpHistoryProvider;
    #[cfg(feature = "http")]
    pub use crate::http::retry::{RetryConfig, RetryPolicy};

    // Live
    pub use crate::live::{LiveEvent, LiveStream, NoLiveStream};
    #[cfg(feature = "ws-native")]
    pub use crate::live::WsLiveStream;
    pub use crate::ws::{ConnectionState, ReconnectPolicy, WsConfig, WsEvent};

    // Sync
    pub use crate::sync::{
        ChannelRenderer, NullRenderer, Phase, RenderEvent, RendererSink, ReplaceReason,
        RequestTag, SyncCommand, SyncConfig, SyncController, SyncHandle, SyncStats,
    };

    // High-level client
    #[cfg(all(feature = "http", feature = "ws-native"))]
    pub use crate::client::{CandleSync, CandleSyncBuilder};
}
