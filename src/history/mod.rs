//! History provider — pull-based fetch of a closed time range.
//!
//! A provider never fails loudly. Network errors, timeouts and malformed
//! payloads all resolve to an empty series plus a `FetchFailed` marker; the
//! caller must read an empty result as "no data available now", not as "no
//! data exists".

#[cfg(feature = "http")]
mod http_provider;

#[cfg(feature = "http")]
pub use http_provider::{HttpHistoryProvider, DEFAULT_MAX_PAGES};

use crate::domain::candle::CandleSeries;
use crate::error::SyncError;
use crate::shared::SeriesKey;
use futures_util::future::BoxFuture;

/// Upper bound on records returned per backend call.
pub const DEFAULT_MAX_RECORDS_PER_CALL: usize = 1000;

/// A closed range `[from, to]` of bucket times (unix seconds) for one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub key: SeriesKey,
    pub from: i64,
    pub to: i64,
}

impl FetchRequest {
    pub fn new(key: SeriesKey, from: i64, to: i64) -> Self {
        Self { key, from, to }
    }

    pub fn start_time_ms(&self) -> i64 {
        self.from.saturating_mul(1000)
    }

    pub fn end_time_ms(&self) -> i64 {
        self.to.saturating_mul(1000)
    }

    /// Number of buckets the range spans (inclusive of both ends).
    pub fn bucket_count(&self) -> i64 {
        if self.to < self.from {
            return 0;
        }
        let step = self.key.granularity.seconds();
        (self.key.granularity.align(self.to) - self.key.granularity.align(self.from)) / step + 1
    }
}

/// Result of a fetch: always a valid series, possibly empty.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub candles: CandleSeries,
    /// Records dropped by the candle invariant filter.
    pub dropped: usize,
    /// Set when the fetch failed and `candles` is empty for that reason.
    pub error: Option<SyncError>,
}

impl FetchOutcome {
    pub fn ok(candles: CandleSeries, dropped: usize) -> Self {
        Self {
            candles,
            dropped,
            error: None,
        }
    }

    pub fn failed(key: &SeriesKey, reason: impl Into<String>) -> Self {
        Self {
            candles: CandleSeries::new(),
            dropped: 0,
            error: Some(SyncError::FetchFailed {
                key: key.to_string(),
                reason: reason.into(),
            }),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Source of historical candles.
pub trait HistoryProvider: Send + Sync {
    /// Fetch every candle in `request`'s range. Must resolve (never hang) and
    /// must never return partially-applied data on failure.
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, FetchOutcome>;
}
