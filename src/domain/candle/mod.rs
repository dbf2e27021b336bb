//! Candle domain — OHLC records, ordered series, live updates.

mod convert;
pub mod state;
pub mod wire;

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use convert::normalize_records;
pub use state::CandleStore;

/// A single time-bucketed OHLC price summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, unix seconds.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
        }
    }

    /// Check the candle invariants: positive `time`, finite prices and
    /// `low <= open, close <= high`.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.time <= 0 {
            return Err(invalid(format!("non-positive time {}", self.time)));
        }
        let fields = [self.open, self.high, self.low, self.close];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(invalid(format!("non-finite price at time {}", self.time)));
        }
        if self.low > self.high
            || self.open < self.low
            || self.open > self.high
            || self.close < self.low
            || self.close > self.high
        {
            return Err(invalid(format!(
                "inconsistent range at time {}: o={} h={} l={} c={}",
                self.time, self.open, self.high, self.low, self.close
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

fn invalid(reason: String) -> SyncError {
    SyncError::InvalidRecord { reason }
}

/// Drop every candle that violates the invariants.
///
/// Returns the surviving candles and how many were dropped.
pub fn filter_valid(candles: impl IntoIterator<Item = Candle>) -> (Vec<Candle>, usize) {
    let mut dropped = 0;
    let kept = candles
        .into_iter()
        .filter(|c| match c.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!("Dropping candle: {}", e);
                dropped += 1;
                false
            }
        })
        .collect();
    (kept, dropped)
}

// ─── CandleSeries ────────────────────────────────────────────────────────────

/// Candles strictly increasing by `time`, unique per `time`.
///
/// Every constructor enforces the ordering; there is no way to build an
/// unordered series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Candle>", into = "Vec<Candle>")]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from candles in any order. Later duplicates of the same
    /// `time` win.
    pub fn from_unsorted(candles: impl IntoIterator<Item = Candle>) -> Self {
        let by_time: BTreeMap<i64, Candle> = candles.into_iter().map(|c| (c.time, c)).collect();
        Self {
            candles: by_time.into_values().collect(),
        }
    }

    /// Wrap candles already strictly ascending by `time`.
    pub(crate) fn from_sorted_unchecked(candles: Vec<Candle>) -> Self {
        debug_assert!(candles.windows(2).all(|w| w[0].time < w[1].time));
        Self { candles }
    }

    pub fn single(candle: Candle) -> Self {
        Self {
            candles: vec![candle],
        }
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// `(oldest, newest)` times, or `None` when empty.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        match (self.candles.first(), self.candles.last()) {
            (Some(a), Some(b)) => Some((a.time, b.time)),
            _ => None,
        }
    }

    pub fn get(&self, time: i64) -> Option<&Candle> {
        self.candles
            .binary_search_by_key(&time, |c| c.time)
            .ok()
            .map(|i| &self.candles[i])
    }

    /// Candles with `from <= time <= to`.
    pub fn range(&self, from: i64, to: i64) -> &[Candle] {
        let start = self.candles.partition_point(|c| c.time < from);
        let end = self.candles.partition_point(|c| c.time <= to);
        if start >= end {
            return &[];
        }
        &self.candles[start..end]
    }

    /// Number of candles strictly older than `time`.
    pub fn count_before(&self, time: i64) -> usize {
        self.candles.partition_point(|c| c.time < time)
    }

    /// Number of candles strictly newer than `time`.
    pub fn count_after(&self, time: i64) -> usize {
        self.candles.len() - self.candles.partition_point(|c| c.time <= time)
    }

    pub fn into_vec(self) -> Vec<Candle> {
        self.candles
    }
}

impl From<Vec<Candle>> for CandleSeries {
    fn from(candles: Vec<Candle>) -> Self {
        Self::from_unsorted(candles)
    }
}

impl From<CandleSeries> for Vec<Candle> {
    fn from(series: CandleSeries) -> Self {
        series.candles
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

// ─── CandleUpdate ────────────────────────────────────────────────────────────

/// One incremental candle from the live stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandleUpdate {
    pub candle: Candle,
    /// `false` while the bucket is still forming; `true` once it has closed.
    pub is_final: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time: i64, close: f64) -> Candle {
        Candle::new(time, close, close + 1.0, close - 1.0, close)
    }

    #[test]
    fn test_validate_accepts_consistent_candle() {
        assert!(Candle::new(100, 10.0, 12.0, 9.0, 11.0).is_valid());
        assert!(Candle::new(100, 10.0, 10.0, 10.0, 10.0).is_valid());
    }

    #[test]
    fn test_validate_rejects_bad_time() {
        assert!(!Candle::new(0, 1.0, 1.0, 1.0, 1.0).is_valid());
        assert!(!Candle::new(-60, 1.0, 1.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        assert!(!Candle::new(60, 1.0, f64::NAN, 1.0, 1.0).is_valid());
        assert!(!Candle::new(60, 1.0, f64::INFINITY, 1.0, 1.0).is_valid());
        assert!(!Candle::new(60, f64::NEG_INFINITY, 1.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        assert!(!Candle::new(60, 10.0, 9.0, 11.0, 10.0).is_valid());
        assert!(!Candle::new(60, 13.0, 12.0, 9.0, 11.0).is_valid());
        assert!(!Candle::new(60, 10.0, 12.0, 9.0, 8.0).is_valid());
    }

    #[test]
    fn test_filter_valid_counts_drops() {
        let (kept, dropped) = filter_valid(vec![
            candle(60, 10.0),
            Candle::new(120, 1.0, f64::NAN, 1.0, 1.0),
            Candle::new(0, 1.0, 1.0, 1.0, 1.0),
            candle(180, 11.0),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_from_unsorted_sorts_and_dedupes_last_wins() {
        let series = CandleSeries::from_unsorted(vec![
            candle(300, 3.0),
            candle(100, 1.0),
            candle(200, 2.0),
            candle(100, 1.5),
        ]);
        let times: Vec<_> = series.iter().map(|c| c.time).collect();
        assert_eq!(times, [100, 200, 300]);
        assert_eq!(series.get(100).unwrap().close, 1.5);
    }

    #[test]
    fn test_range_and_counts() {
        let series = CandleSeries::from_unsorted((1..=5).map(|i| candle(i * 60, i as f64)));
        assert_eq!(series.range(120, 240).len(), 3);
        assert!(series.range(400, 500).is_empty());
        assert_eq!(series.count_before(180), 2);
        assert_eq!(series.count_after(180), 2);
        assert_eq!(series.bounds(), Some((60, 300)));
    }

    #[test]
    fn test_series_serde_is_plain_array() {
        let series = CandleSeries::single(candle(60, 1.0));
        let json = serde_json::to_value(&series).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["time"], 60);
        let back: CandleSeries = serde_json::from_value(json).unwrap();
        assert_eq!(back, series);
    }
}
