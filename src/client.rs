//! High-level client — `CandleSync`, wiring the REST history provider, the
//! WebSocket live stream and a cache into a running sync loop.

use crate::cache::{CacheLayer, CandleCache, FileStore, MemoryStore, DEFAULT_CACHE_TTL};
use crate::error::SyncError;
use crate::history::HttpHistoryProvider;
use crate::http::{CandleHttp, RetryPolicy};
use crate::live::WsLiveStream;
use crate::shared::SeriesKey;
use crate::sync::{
    run, NullRenderer, RendererSink, SyncConfig, SyncController, SyncHandle, SyncStats,
};
use crate::ws::{ReconnectPolicy, WsConfig};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running candle sync engine.
///
/// Dropping it without `shutdown()` aborts the loop.
pub struct CandleSync {
    handle: SyncHandle,
    task: Option<JoinHandle<SyncController>>,
}

impl CandleSync {
    pub fn builder() -> CandleSyncBuilder {
        CandleSyncBuilder::default()
    }

    /// Cloneable handle for key switches and viewport edge signals.
    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    pub async fn switch_key(&self, key: SeriesKey) -> Result<(), SyncError> {
        self.handle.switch_key(key).await
    }

    pub fn on_viewport_near_older_edge(&self, requested_time: i64) -> Result<(), SyncError> {
        self.handle.on_viewport_near_older_edge(requested_time)
    }

    pub fn on_viewport_near_newer_edge(&self, requested_time: i64) -> Result<(), SyncError> {
        self.handle.on_viewport_near_newer_edge(requested_time)
    }

    /// Stop the loop, close the live stream and return the final counters.
    pub async fn shutdown(mut self) -> Result<SyncStats, SyncError> {
        self.handle.shutdown().await?;
        let task = self.task.take().ok_or(SyncError::Stopped)?;
        let controller = task.await.map_err(|_| SyncError::Stopped)?;
        Ok(controller.stats().clone())
    }
}

impl Drop for CandleSync {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

pub struct CandleSyncBuilder {
    api_url: String,
    ws_url: String,
    cache_dir: Option<PathBuf>,
    cache_ttl: Duration,
    reconnect: ReconnectPolicy,
    retry: RetryPolicy,
    config: SyncConfig,
    renderer: Option<Box<dyn RendererSink>>,
}

impl Default for CandleSyncBuilder {
    fn default() -> Self {
        Self {
            api_url: crate::network::DEFAULT_API_URL.to_string(),
            ws_url: crate::network::DEFAULT_WS_URL.to_string(),
            cache_dir: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            reconnect: ReconnectPolicy::default(),
            retry: RetryPolicy::Idempotent,
            config: SyncConfig::default(),
            renderer: None,
        }
    }
}

impl CandleSyncBuilder {
    pub fn api_url(mut self, url: &str) -> Self {
        self.api_url = url.to_string();
        self
    }

    pub fn ws_url(mut self, url: &str) -> Self {
        self.ws_url = url.to_string();
        self
    }

    /// Persist the cache as JSON files under `dir`. Without this the cache
    /// lives in memory for the lifetime of the engine.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn http_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn renderer(mut self, renderer: impl RendererSink + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    /// Build the components and spawn the sync loop. Must be called from
    /// within a tokio runtime. The engine stays `Idle` until the first
    /// `switch_key`.
    pub fn build(self) -> Result<CandleSync, SyncError> {
        if self.config.command_buffer == 0 || self.config.event_buffer == 0 {
            return Err(SyncError::Config("channel buffers must be non-zero".into()));
        }

        let http = CandleHttp::new(&self.api_url)?.with_retry(self.retry);
        let history = HttpHistoryProvider::new(http)
            .max_records_per_call(self.config.max_records_per_call)
            .max_pages(self.config.max_pages_per_fetch);

        let cache: Box<dyn CacheLayer> = match &self.cache_dir {
            Some(dir) => Box::new(CandleCache::with_ttl(FileStore::open(dir)?, self.cache_ttl)),
            None => Box::new(CandleCache::with_ttl(MemoryStore::new(), self.cache_ttl)),
        };

        let (live_tx, live_rx) = mpsc::channel(self.config.event_buffer);
        let live = WsLiveStream::new(
            WsConfig {
                url: self.ws_url,
                reconnect_policy: self.reconnect,
                ..WsConfig::default()
            },
            live_tx,
        );

        let renderer: Box<dyn RendererSink> = match self.renderer {
            Some(renderer) => renderer,
            None => Box::new(NullRenderer),
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_buffer);
        let controller =
            SyncController::new(Arc::new(history), cache, Box::new(live), renderer)
                .with_config(self.config);

        tracing::debug!(api_url = %self.api_url, "Spawning sync loop");
        let task = tokio::spawn(run(controller, cmd_rx, live_rx));

        Ok(CandleSync {
            handle: SyncHandle::new(cmd_tx),
            task: Some(task),
        })
    }
}
