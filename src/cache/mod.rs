//! Candle cache — a persisted snapshot per series with a freshness window.
//!
//! The cache is only a startup accelerant. Every failure (I/O, corrupt JSON,
//! candles that break the invariants, stale entries) degrades to a miss, so the
//! engine behaves the same with the cache gone, only slower.
//!
//! Persisted layout, under key `cache:{symbol}:{granularity}`:
//!
//! ```json
//! { "candles": [{ "time": 1700000000, "open": 1, "high": 2, "low": 0.5, "close": 1.5 }],
//!   "timestamp": 1700000123456 }
//! ```

pub mod store;

use crate::domain::candle::{Candle, CandleSeries};
use crate::error::{CacheError, SyncError};
use crate::shared::{now_millis, SeriesKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use store::{FileStore, KeyValueStore, MemoryStore};

/// Default freshness window: one hour.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Cache contract used by the sync controller.
pub trait CacheLayer: Send {
    /// Fresh snapshot for `key`, or `None` on miss, staleness or corruption.
    fn get(&mut self, key: &SeriesKey) -> Option<CandleSeries>;

    /// Store a fresh snapshot, replacing any prior entry for `key`.
    fn put(&mut self, key: &SeriesKey, candles: &CandleSeries);
}

/// A decoded cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: SeriesKey,
    pub candles: CandleSeries,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now_ms: i64, ttl: Duration) -> bool {
        now_ms - self.fetched_at.timestamp_millis() <= ttl.as_millis() as i64
    }
}

/// On-disk representation.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    candles: Vec<Candle>,
    /// Unix millis when the snapshot was written.
    timestamp: i64,
}

/// [`CacheLayer`] over any [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct CandleCache<S> {
    store: S,
    ttl: Duration,
}

impl<S: KeyValueStore> CandleCache<S> {
    pub fn new(store: S) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Look up `key` as of `now_ms`.
    pub fn get_at(&mut self, key: &SeriesKey, now_ms: i64) -> Option<CandleSeries> {
        let entry = self.load(key)?;
        if !entry.is_fresh(now_ms, self.ttl) {
            tracing::debug!(
                key = %key,
                age_ms = now_ms - entry.fetched_at.timestamp_millis(),
                "Cache entry expired"
            );
            self.evict(key);
            return None;
        }
        Some(entry.candles)
    }

    /// Store `candles` for `key` stamped with `fetched_at_ms`.
    pub fn put_at(&mut self, key: &SeriesKey, candles: &CandleSeries, fetched_at_ms: i64) {
        let stored = StoredEntry {
            candles: candles.as_slice().to_vec(),
            timestamp: fetched_at_ms,
        };
        let result = serde_json::to_string(&stored)
            .map_err(CacheError::from)
            .and_then(|json| self.store.set(&key.cache_key(), json));
        if let Err(e) = result {
            tracing::warn!(key = %key, "Cache write failed: {}", e);
        }
    }

    fn load(&mut self, key: &SeriesKey) -> Option<CacheEntry> {
        let raw = match self.store.get(&key.cache_key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, "Cache read failed: {}", e);
                return None;
            }
        };

        match decode(key, &raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("{}", e);
                self.evict(key);
                None
            }
        }
    }

    fn evict(&mut self, key: &SeriesKey) {
        if let Err(e) = self.store.remove(&key.cache_key()) {
            tracing::warn!(key = %key, "Cache eviction failed: {}", e);
        }
    }
}

fn decode(key: &SeriesKey, raw: &str) -> Result<CacheEntry, SyncError> {
    let corrupt = |reason: String| SyncError::CacheCorrupt {
        key: key.cache_key(),
        reason,
    };

    let stored: StoredEntry = serde_json::from_str(raw).map_err(|e| corrupt(e.to_string()))?;
    if let Some(bad) = stored.candles.iter().find(|c| !c.is_valid()) {
        return Err(corrupt(format!("invalid candle at time {}", bad.time)));
    }
    let fetched_at = DateTime::<Utc>::from_timestamp_millis(stored.timestamp)
        .ok_or_else(|| corrupt(format!("invalid timestamp {}", stored.timestamp)))?;

    Ok(CacheEntry {
        key: key.clone(),
        candles: CandleSeries::from_unsorted(stored.candles),
        fetched_at,
    })
}

impl<S: KeyValueStore> CacheLayer for CandleCache<S> {
    fn get(&mut self, key: &SeriesKey) -> Option<CandleSeries> {
        self.get_at(key, now_millis())
    }

    fn put(&mut self, key: &SeriesKey, candles: &CandleSeries) {
        self.put_at(key, candles, now_millis());
    }
}

/// A cache that never hits. Useful when persistence is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CacheLayer for NoCache {
    fn get(&mut self, _key: &SeriesKey) -> Option<CandleSeries> {
        None
    }

    fn put(&mut self, _key: &SeriesKey, _candles: &CandleSeries) {}
}
