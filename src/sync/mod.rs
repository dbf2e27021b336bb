//! Sync controller — orchestrates store, cache, history and live stream.
//!
//! The controller is a plain state machine. Every input (key switch, viewport
//! edge, live event, fetch completion) is a synchronous transition function;
//! transitions that need history return a [`PendingFetch`] for the caller to
//! drive. The event loop in [`driver`] polls those futures and feeds the
//! results back through [`SyncController::on_fetch_completed`].
//!
//! ```text
//!   Idle ──switch_key──▶ InitialLoad ──cache hit / fetch done──▶ Ready
//!                             ▲                                   │
//!                             └────────────switch_key─────────────┘
//! ```
//!
//! Fetches and live subscriptions are tagged with a [`RequestTag`]. The
//! generation advances on every key switch and on shutdown, so results issued
//! for an earlier key are recognized and dropped when they arrive.

pub mod driver;
pub mod render;

pub use driver::{run, SyncCommand, SyncHandle};
pub use render::{ChannelRenderer, NullRenderer, RenderEvent, RendererSink, ReplaceReason};

use crate::cache::CacheLayer;
use crate::domain::candle::{CandleSeries, CandleStore, CandleUpdate};
use crate::history::{
    FetchOutcome, FetchRequest, HistoryProvider, DEFAULT_MAX_PAGES,
    DEFAULT_MAX_RECORDS_PER_CALL,
};
use crate::live::{LiveEvent, LiveStream};
use crate::shared::{now_secs, SeriesKey};
use crate::ws::ConnectionState;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;

/// How far back an older-edge backfill may reach.
pub const DEFAULT_RETENTION_HORIZON: Duration = Duration::from_secs(30 * 24 * 60 * 60);

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub retention_horizon: Duration,
    pub max_records_per_call: usize,
    /// Pages one history fetch may issue. Together with
    /// `max_records_per_call` this bounds every fetch window, so a backfill
    /// always extends the loaded range without a gap.
    pub max_pages_per_fetch: usize,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retention_horizon: DEFAULT_RETENTION_HORIZON,
            max_records_per_call: DEFAULT_MAX_RECORDS_PER_CALL,
            max_pages_per_fetch: DEFAULT_MAX_PAGES,
            command_buffer: 64,
            event_buffer: 256,
        }
    }
}

// ─── Tags, phases, fetch plumbing ────────────────────────────────────────────

/// Identifies the key and generation a request was issued under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestTag {
    pub key: SeriesKey,
    pub generation: u64,
}

impl RequestTag {
    pub fn new(key: SeriesKey, generation: u64) -> Self {
        Self { key, generation }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    InitialLoad,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    Initial,
    Older,
    Newer,
}

/// A finished history fetch, routed back to the controller.
#[derive(Debug)]
pub struct FetchCompleted {
    pub tag: RequestTag,
    pub purpose: FetchPurpose,
    pub request: FetchRequest,
    pub outcome: FetchOutcome,
}

/// A history fetch issued by a transition, to be polled by the caller.
pub type PendingFetch = BoxFuture<'static, FetchCompleted>;

/// Counters for degraded-mode diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub invalid_records: u64,
    pub fetch_failures: u64,
    pub stale_results_dropped: u64,
    pub live_updates_applied: u64,
    pub reconnects: u64,
}

// ─── SyncController ──────────────────────────────────────────────────────────

pub struct SyncController {
    config: SyncConfig,
    history: Arc<dyn HistoryProvider>,
    cache: Box<dyn CacheLayer>,
    live: Box<dyn LiveStream>,
    renderer: Box<dyn RendererSink>,
    clock: fn() -> i64,

    key: Option<SeriesKey>,
    generation: u64,
    phase: Phase,
    store: CandleStore,
    older_in_flight: bool,
    newer_in_flight: bool,
    connection_state: ConnectionState,
    stats: SyncStats,
}

impl SyncController {
    pub fn new(
        history: Arc<dyn HistoryProvider>,
        cache: Box<dyn CacheLayer>,
        live: Box<dyn LiveStream>,
        renderer: Box<dyn RendererSink>,
    ) -> Self {
        Self {
            config: SyncConfig::default(),
            history,
            cache,
            live,
            renderer,
            clock: now_secs,
            key: None,
            generation: 0,
            phase: Phase::Idle,
            store: CandleStore::new(),
            older_in_flight: false,
            newer_in_flight: false,
            connection_state: ConnectionState::Disconnected,
            stats: SyncStats::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the wall clock (unix seconds).
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn key(&self) -> Option<&SeriesKey> {
        self.key.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn series(&self) -> &CandleSeries {
        self.store.series()
    }

    pub fn bounds(&self) -> Option<(i64, i64)> {
        self.store.bounds()
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn is_backfilling_older(&self) -> bool {
        self.older_in_flight
    }

    pub fn is_backfilling_newer(&self) -> bool {
        self.newer_in_flight
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn current_tag(&self) -> Option<RequestTag> {
        self.key
            .as_ref()
            .map(|key| RequestTag::new(key.clone(), self.generation))
    }

    fn is_current(&self, tag: &RequestTag) -> bool {
        self.generation == tag.generation && self.key.as_ref() == Some(&tag.key)
    }

    // ── Key switch ───────────────────────────────────────────────────────

    /// Make `key` the active series. The first call starts the controller.
    ///
    /// Tears down the live subscription, clears the store and in-flight
    /// guards, and enters `InitialLoad`. Returns the initial fetch on a cache
    /// miss; on a hit the controller is `Ready` when this returns.
    pub fn switch_key(&mut self, key: SeriesKey) -> Option<PendingFetch> {
        if self.key.as_ref() == Some(&key) && self.phase != Phase::Idle {
            tracing::debug!(key = %key, "Key unchanged, ignoring switch");
            return None;
        }

        let replacing = self.key.is_some() && self.phase != Phase::Idle;
        self.teardown();
        self.key = Some(key.clone());

        tracing::info!(key = %key, generation = self.generation, "Switching series");
        if replacing {
            self.renderer
                .on_series_replaced(self.store.series(), ReplaceReason::KeySwitch);
        }
        self.begin_initial_load(key)
    }

    /// Stop the live stream and drop all pending work.
    pub fn shutdown(&mut self) {
        tracing::info!(key = ?self.key.as_ref().map(|k| k.to_string()), "Sync shutdown");
        self.teardown();
        self.key = None;
    }

    fn teardown(&mut self) {
        self.live.unsubscribe();
        self.connection_state = ConnectionState::Disconnected;
        self.store.reset();
        self.generation += 1;
        self.older_in_flight = false;
        self.newer_in_flight = false;
        self.phase = Phase::Idle;
    }

    // ── Initial load ─────────────────────────────────────────────────────

    fn begin_initial_load(&mut self, key: SeriesKey) -> Option<PendingFetch> {
        self.phase = Phase::InitialLoad;

        if let Some(cached) = self.cache.get(&key) {
            if !cached.is_empty() {
                tracing::debug!(key = %key, candles = cached.len(), "Initial load from cache");
                self.complete_initial_load(&key, cached, false);
                return None;
            }
        }

        let (from, to) = self.default_window(&key);
        tracing::debug!(key = %key, from, to, "Initial load from history");
        Some(self.fetch(FetchPurpose::Initial, FetchRequest::new(key, from, to)))
    }

    fn complete_initial_load(&mut self, key: &SeriesKey, candles: CandleSeries, persist: bool) {
        self.store.merge(&candles);
        if persist && !self.store.is_empty() {
            self.cache.put(key, self.store.series());
        }
        self.phase = Phase::Ready;

        tracing::info!(key = %key, candles = self.store.len(), "Series ready");
        self.renderer
            .on_series_replaced(self.store.series(), ReplaceReason::InitialLoad);
        if let Some(latest) = self.store.latest() {
            self.renderer.on_latest_price(latest.close);
        }

        self.open_live();
    }

    fn open_live(&mut self) {
        let Some(tag) = self.current_tag() else {
            return;
        };
        let key = tag.key.clone();
        match self.live.subscribe(tag) {
            Ok(()) => self.connection_state = ConnectionState::Connecting,
            Err(e) => {
                tracing::warn!(key = %key, "Live subscribe failed: {}", e);
                self.connection_state = ConnectionState::Disconnected;
            }
        }
    }

    /// `[now - lookback_step, now]`, bucket-aligned and trimmed to the
    /// fetch budget from the old end.
    fn default_window(&self, key: &SeriesKey) -> (i64, i64) {
        let to = key.granularity.align((self.clock)());
        let from = (to - key.granularity.lookback_step())
            .max(to.saturating_sub(self.budget_span(key)));
        (from, to)
    }

    /// Seconds between the first and last bucket of the largest window one
    /// fetch can return.
    fn budget_span(&self, key: &SeriesKey) -> i64 {
        let buckets = self
            .config
            .max_records_per_call
            .max(1)
            .saturating_mul(self.config.max_pages_per_fetch.max(1));
        let buckets = i64::try_from(buckets).unwrap_or(i64::MAX);
        (buckets - 1).saturating_mul(key.granularity.seconds())
    }

    /// First bucket that lies entirely inside the retention horizon.
    fn horizon_floor(&self, key: &SeriesKey) -> i64 {
        let horizon = (self.clock)() - self.config.retention_horizon.as_secs() as i64;
        let aligned = key.granularity.align(horizon);
        if aligned < horizon {
            aligned + key.granularity.seconds()
        } else {
            aligned
        }
    }

    // ── Viewport edges ───────────────────────────────────────────────────

    /// The visible window approaches the oldest loaded candle.
    ///
    /// Fetches `[requested - lookback_step, oldest)`, clipped to the retention
    /// horizon, unless an older backfill is already in flight or `requested`
    /// is already covered. A window wider than the fetch budget keeps the
    /// part next to `oldest`; the next edge event continues from there.
    pub fn on_viewport_near_older_edge(&mut self, requested: i64) -> Option<PendingFetch> {
        let key = self.ready_key()?;
        if self.older_in_flight {
            tracing::trace!(key = %key, "Older backfill already in flight");
            return None;
        }
        let Some((oldest, _)) = self.store.bounds() else {
            return self.recover_empty(key);
        };
        if requested >= oldest {
            return None;
        }

        let floor = self.horizon_floor(&key);
        let to = oldest - 1;
        let from = key
            .granularity
            .align(requested - key.granularity.lookback_step())
            .max(floor)
            .max(key.granularity.align(to).saturating_sub(self.budget_span(&key)));
        if from > to {
            tracing::debug!(key = %key, oldest, floor, "Older edge at retention horizon");
            return None;
        }

        tracing::debug!(key = %key, from, to, "Backfilling older");
        self.older_in_flight = true;
        Some(self.fetch(FetchPurpose::Older, FetchRequest::new(key, from, to)))
    }

    /// The visible window approaches the newest loaded candle.
    ///
    /// Fetches `(newest, requested]`, clipped to now. A window wider than the
    /// fetch budget keeps the part next to `newest`.
    pub fn on_viewport_near_newer_edge(&mut self, requested: i64) -> Option<PendingFetch> {
        let key = self.ready_key()?;
        if self.newer_in_flight {
            tracing::trace!(key = %key, "Newer backfill already in flight");
            return None;
        }
        let Some((_, newest)) = self.store.bounds() else {
            return self.recover_empty(key);
        };
        if requested <= newest {
            return None;
        }

        let from = newest + key.granularity.seconds();
        let to = requested
            .min((self.clock)())
            .min(from.saturating_add(self.budget_span(&key)));
        if from > to {
            return None;
        }

        tracing::debug!(key = %key, from, to, "Backfilling newer");
        self.newer_in_flight = true;
        Some(self.fetch(FetchPurpose::Newer, FetchRequest::new(key, from, to)))
    }

    /// Retry the default window when the initial load came back empty.
    fn recover_empty(&mut self, key: SeriesKey) -> Option<PendingFetch> {
        if self.older_in_flight {
            return None;
        }
        let (from, to) = self.default_window(&key);
        tracing::debug!(key = %key, from, to, "Store empty, retrying default window");
        self.older_in_flight = true;
        Some(self.fetch(FetchPurpose::Older, FetchRequest::new(key, from, to)))
    }

    fn ready_key(&self) -> Option<SeriesKey> {
        if self.phase != Phase::Ready {
            tracing::trace!(phase = ?self.phase, "Edge event ignored outside Ready");
            return None;
        }
        self.key.clone()
    }

    // ── Fetch completion ─────────────────────────────────────────────────

    fn fetch(&self, purpose: FetchPurpose, request: FetchRequest) -> PendingFetch {
        let history = Arc::clone(&self.history);
        let tag = RequestTag::new(request.key.clone(), self.generation);
        async move {
            let outcome = history.fetch(request.clone()).await;
            FetchCompleted {
                tag,
                purpose,
                request,
                outcome,
            }
        }
        .boxed()
    }

    /// Apply a finished fetch. Results tagged with an earlier key or
    /// generation are dropped.
    pub fn on_fetch_completed(&mut self, done: FetchCompleted) {
        if !self.is_current(&done.tag) {
            self.stats.stale_results_dropped += 1;
            tracing::debug!(
                key = %done.tag.key,
                generation = done.tag.generation,
                current = self.generation,
                purpose = ?done.purpose,
                "Dropping stale fetch result"
            );
            return;
        }

        let FetchCompleted {
            tag,
            purpose,
            request,
            outcome,
        } = done;
        self.stats.invalid_records += outcome.dropped as u64;
        if let Some(error) = &outcome.error {
            self.stats.fetch_failures += 1;
            tracing::debug!(key = %tag.key, from = request.from, to = request.to, "{}", error);
        }

        match purpose {
            FetchPurpose::Initial => {
                if self.phase != Phase::InitialLoad {
                    return;
                }
                self.complete_initial_load(&tag.key, outcome.candles, true);
            }
            FetchPurpose::Older => {
                self.older_in_flight = false;
                self.apply_backfill(outcome.candles, purpose);
            }
            FetchPurpose::Newer => {
                self.newer_in_flight = false;
                self.apply_backfill(outcome.candles, purpose);
            }
        }
    }

    fn apply_backfill(&mut self, candles: CandleSeries, purpose: FetchPurpose) {
        if candles.is_empty() {
            return;
        }
        let before = self.store.bounds();
        self.store.merge(&candles);
        let series = self.store.series();

        let reason = match (purpose, before) {
            (FetchPurpose::Newer, Some((_, newest))) => ReplaceReason::BackfillNewer {
                appended: series.count_after(newest),
            },
            (_, Some((oldest, _))) => ReplaceReason::BackfillOlder {
                prepended: series.count_before(oldest),
            },
            (_, None) => ReplaceReason::BackfillOlder {
                prepended: series.len(),
            },
        };
        tracing::debug!(candles = series.len(), reason = ?reason, "Backfill merged");
        self.renderer.on_series_replaced(series, reason);
    }

    // ── Live events ──────────────────────────────────────────────────────

    /// Apply an event from the live stream, in receipt order.
    pub fn on_live_event(&mut self, event: LiveEvent) {
        if !self.is_current(event.tag()) {
            self.stats.stale_results_dropped += 1;
            tracing::debug!(
                key = %event.tag().key,
                generation = event.tag().generation,
                "Dropping stale live event"
            );
            return;
        }

        match event {
            LiveEvent::Update { update, .. } => self.apply_live_update(update),
            LiveEvent::Rejected { tag, error } => {
                self.stats.invalid_records += 1;
                tracing::debug!(key = %tag.key, "{}", error);
            }
            LiveEvent::State { state, .. } => {
                if state == ConnectionState::Backoff {
                    self.stats.reconnects += 1;
                }
                self.connection_state = state;
            }
            LiveEvent::Disconnected { tag, error } => {
                tracing::info!(key = %tag.key, "{}", error);
            }
        }
    }

    fn apply_live_update(&mut self, update: CandleUpdate) {
        if self.phase != Phase::Ready {
            return;
        }
        let candle = update.candle;
        self.store.merge(&CandleSeries::single(candle));
        self.stats.live_updates_applied += 1;

        self.renderer.on_candle_upserted(&candle);
        if update.is_final {
            if let Some(key) = &self.key {
                self.cache.put(key, self.store.series());
            }
        }
        self.renderer.on_latest_price(candle.close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CandleCache, MemoryStore};
    use crate::domain::candle::Candle;
    use crate::live::NoLiveStream;
    use crate::shared::Granularity;
    use std::sync::Mutex;

    const NOW: i64 = 1_700_002_800; // hour-aligned
    const HOUR: i64 = 3600;

    fn fixed_now() -> i64 {
        NOW
    }

    fn candle(time: i64, close: f64) -> Candle {
        Candle::new(time, close, close + 1.0, close - 1.0, close)
    }

    /// Serves `candles` clipped to the requested range and records requests.
    struct ScriptedHistory {
        candles: Vec<Candle>,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl HistoryProvider for ScriptedHistory {
        fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, FetchOutcome> {
            if let Ok(mut log) = self.requests.lock() {
                log.push(request.clone());
            }
            let hits = self
                .candles
                .iter()
                .copied()
                .filter(|c| c.time >= request.from && c.time <= request.to);
            let series = CandleSeries::from_unsorted(hits);
            async move { FetchOutcome::ok(series, 0) }.boxed()
        }
    }

    fn controller(history: Vec<Candle>) -> (SyncController, Arc<ScriptedHistory>) {
        let history = Arc::new(ScriptedHistory {
            candles: history,
            requests: Mutex::new(Vec::new()),
        });
        let c = SyncController::new(
            history.clone(),
            Box::new(CandleCache::new(MemoryStore::new())),
            Box::new(NoLiveStream),
            Box::new(NullRenderer),
        )
        .with_clock(fixed_now);
        (c, history)
    }

    fn btc() -> SeriesKey {
        SeriesKey::new("BTC", Granularity::Hour1)
    }

    #[tokio::test]
    async fn test_initial_load_fetches_default_window() {
        let (mut c, history) = controller(vec![candle(NOW - HOUR, 10.0), candle(NOW, 11.0)]);
        let fetch = c.switch_key(btc()).expect("cache miss must fetch");
        assert_eq!(c.phase(), Phase::InitialLoad);

        c.on_fetch_completed(fetch.await);
        assert_eq!(c.phase(), Phase::Ready);
        assert_eq!(c.bounds(), Some((NOW - HOUR, NOW)));

        let req = history.requests.lock().unwrap()[0].clone();
        assert_eq!((req.from, req.to), (NOW - 7 * 24 * HOUR, NOW));
    }

    #[tokio::test]
    async fn test_empty_initial_load_is_ready_and_recovers_on_edge() {
        let (mut c, _history) = controller(Vec::new());
        let fetch = c.switch_key(btc()).unwrap();
        c.on_fetch_completed(fetch.await);
        assert_eq!(c.phase(), Phase::Ready);
        assert!(c.series().is_empty());

        let retry = c.on_viewport_near_older_edge(NOW - HOUR);
        assert!(retry.is_some());
        assert!(c.is_backfilling_older());
        assert!(c.on_viewport_near_newer_edge(NOW).is_none());
    }

    #[tokio::test]
    async fn test_edge_events_ignored_during_initial_load() {
        let (mut c, _history) = controller(vec![candle(NOW, 1.0)]);
        let _fetch = c.switch_key(btc()).unwrap();
        assert!(c.on_viewport_near_older_edge(0).is_none());
        assert!(c.on_viewport_near_newer_edge(NOW).is_none());
    }

    #[tokio::test]
    async fn test_older_edge_guard_and_covered_range() {
        let (mut c, _history) = controller(vec![candle(NOW - HOUR, 1.0), candle(NOW, 1.0)]);
        let fetch = c.switch_key(btc()).unwrap();
        c.on_fetch_completed(fetch.await);

        assert!(c.on_viewport_near_older_edge(NOW).is_none(), "already covered");
        let first = c.on_viewport_near_older_edge(NOW - 10 * HOUR);
        assert!(first.is_some());
        assert!(c.on_viewport_near_older_edge(NOW - 20 * HOUR).is_none(), "guarded");

        c.on_fetch_completed(first.unwrap().await);
        assert!(!c.is_backfilling_older());
    }

    #[tokio::test]
    async fn test_older_edge_clipped_to_retention_horizon() {
        let horizon = NOW - 30 * 24 * HOUR;
        let (mut c, history) = controller(vec![candle(horizon + HOUR, 1.0)]);
        let fetch = c.switch_key(btc()).unwrap();
        c.on_fetch_completed(fetch.await);
        // Nothing was in the default window; recover, then set oldest near horizon.
        let recover = c.on_viewport_near_older_edge(NOW).unwrap();
        c.on_fetch_completed(recover.await);
        assert!(c.series().is_empty());

        c.store.merge(&CandleSeries::single(candle(horizon + HOUR, 1.0)));
        let fetch = c.on_viewport_near_older_edge(horizon - 100 * HOUR).unwrap();
        c.on_fetch_completed(fetch.await);
        let last = history.requests.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.from, horizon);
        assert_eq!(last.to, horizon + HOUR - 1);

        c.store.reset();
        c.store.merge(&CandleSeries::single(candle(horizon, 1.0)));
        assert!(c.on_viewport_near_older_edge(horizon - HOUR).is_none());
    }

    #[tokio::test]
    async fn test_newer_edge_fetches_after_newest() {
        let (mut c, history) = controller(vec![
            candle(NOW - 5 * HOUR, 1.0),
            candle(NOW - 2 * HOUR, 2.0),
            candle(NOW - HOUR, 3.0),
        ]);
        c.store.merge(&CandleSeries::single(candle(NOW - 5 * HOUR, 1.0)));
        c.phase = Phase::Ready;
        c.key = Some(btc());

        let fetch = c.on_viewport_near_newer_edge(NOW + 10 * HOUR).unwrap();
        assert!(c.is_backfilling_newer());
        c.on_fetch_completed(fetch.await);
        assert!(!c.is_backfilling_newer());
        assert_eq!(c.bounds(), Some((NOW - 5 * HOUR, NOW - HOUR)));

        let req = history.requests.lock().unwrap()[0].clone();
        assert_eq!((req.from, req.to), (NOW - 4 * HOUR, NOW));
    }

    #[tokio::test]
    async fn test_fetch_windows_fit_page_budget() {
        let hourly = (0..=300).map(|i| candle(NOW - i * HOUR, 1.0)).collect();
        let (c, history) = controller(hourly);
        let mut c = c.with_config(SyncConfig {
            max_records_per_call: 10,
            max_pages_per_fetch: 2,
            ..SyncConfig::default()
        });

        let fetch = c.switch_key(btc()).unwrap();
        c.on_fetch_completed(fetch.await);
        assert_eq!(c.bounds(), Some((NOW - 19 * HOUR, NOW)));

        let fetch = c.on_viewport_near_older_edge(NOW - 200 * HOUR).unwrap();
        c.on_fetch_completed(fetch.await);
        assert_eq!(c.bounds(), Some((NOW - 39 * HOUR, NOW)));
        assert_eq!(c.series().len(), 40);

        let req = history.requests.lock().unwrap()[1].clone();
        assert_eq!((req.from, req.to), (NOW - 39 * HOUR, NOW - 19 * HOUR - 1));

        c.store.reset();
        c.store.merge(&CandleSeries::single(candle(NOW - 100 * HOUR, 1.0)));
        let fetch = c.on_viewport_near_newer_edge(NOW).unwrap();
        c.on_fetch_completed(fetch.await);
        assert_eq!(c.bounds(), Some((NOW - 100 * HOUR, NOW - 80 * HOUR)));
        let req = history.requests.lock().unwrap()[2].clone();
        assert_eq!((req.from, req.to), (NOW - 99 * HOUR, NOW - 80 * HOUR));
    }

    #[tokio::test]
    async fn test_horizon_floor_rounds_up_to_whole_bucket() {
        let day = SeriesKey::new("BTC", Granularity::Day1);
        let today = Granularity::Day1.align(NOW);
        assert_ne!(today, NOW);

        let (mut c, history) = controller(Vec::new());
        c.phase = Phase::Ready;
        c.key = Some(day);
        c.store.merge(&CandleSeries::single(candle(today - 5 * 86_400, 1.0)));

        let fetch = c.on_viewport_near_older_edge(today - 6 * 86_400).unwrap();
        c.on_fetch_completed(fetch.await);
        let req = history.requests.lock().unwrap()[0].clone();
        assert_eq!(req.from, today - 29 * 86_400);
        assert!(req.from >= NOW - 30 * 86_400);
    }

    #[tokio::test]
    async fn test_stale_fetch_after_key_switch_is_dropped() {
        let (mut c, _history) = controller(vec![candle(NOW, 1.0)]);
        let old = c.switch_key(btc()).unwrap();
        let _new = c.switch_key(SeriesKey::new("BTC", Granularity::Day1)).unwrap();

        c.on_fetch_completed(old.await);
        assert_eq!(c.phase(), Phase::InitialLoad);
        assert!(c.series().is_empty());
        assert_eq!(c.stats().stale_results_dropped, 1);
    }

    #[test]
    fn test_live_update_requires_ready_and_current_tag() {
        let (mut c, _history) = controller(Vec::new());
        let stale = RequestTag::new(btc(), 99);
        c.on_live_event(LiveEvent::Update {
            tag: stale,
            update: CandleUpdate {
                candle: candle(NOW, 1.0),
                is_final: true,
            },
        });
        assert!(c.series().is_empty());
        assert_eq!(c.stats().stale_results_dropped, 1);
    }

    #[test]
    fn test_switch_to_same_key_is_noop() {
        let (mut c, _history) = controller(Vec::new());
        assert!(c.switch_key(btc()).is_some());
        let generation = c.generation();
        assert!(c.switch_key(btc()).is_none());
        assert_eq!(c.generation(), generation);
    }

    #[test]
    fn test_shutdown_returns_to_idle() {
        let (mut c, _history) = controller(Vec::new());
        let _ = c.switch_key(btc());
        c.shutdown();
        assert_eq!(c.phase(), Phase::Idle);
        assert!(c.key().is_none());
        assert!(c.on_viewport_near_older_edge(0).is_none());
    }
}
