//! Candle state container — the authoritative series for one key.

use super::{Candle, CandleSeries};
use std::cmp::Ordering;

/// Ordered, deduplicated candles for one `(symbol, granularity)` pair.
///
/// The sync controller owns the only instance for the active key. All
/// mutation goes through [`CandleStore::merge`] and [`CandleStore::reset`];
/// no I/O happens here.
#[derive(Debug, Clone, Default)]
pub struct CandleStore {
    series: CandleSeries,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge-insert `incoming` and return the new authoritative series.
    ///
    /// Union keyed by `time`; on a collision the incoming candle wins. The
    /// result stays strictly ascending, so merging the same update twice is a
    /// no-op the second time.
    pub fn merge(&mut self, incoming: &CandleSeries) -> &CandleSeries {
        if incoming.is_empty() {
            return &self.series;
        }
        if incoming.len() == 1 {
            if let Some(candle) = incoming.first() {
                self.upsert(*candle);
            }
            return &self.series;
        }

        let existing = self.series.as_slice();
        let incoming = incoming.as_slice();
        let mut merged = Vec::with_capacity(existing.len() + incoming.len());
        let (mut i, mut j) = (0, 0);

        while i < existing.len() && j < incoming.len() {
            match existing[i].time.cmp(&incoming[j].time) {
                Ordering::Less => {
                    merged.push(existing[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    merged.push(incoming[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    merged.push(incoming[j]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&existing[i..]);
        merged.extend_from_slice(&incoming[j..]);

        self.series = CandleSeries::from_sorted_unchecked(merged);
        &self.series
    }

    /// Insert or replace a single candle by `time`.
    ///
    /// Live updates almost always land on the newest bucket, so the tail is
    /// checked before falling back to a binary search.
    fn upsert(&mut self, candle: Candle) {
        let mut candles = std::mem::take(&mut self.series).into_vec();
        let tail = candles.last().map(|c| c.time);
        match tail {
            Some(t) if t > candle.time => {
                match candles.binary_search_by_key(&candle.time, |c| c.time) {
                    Ok(idx) => candles[idx] = candle,
                    Err(idx) => candles.insert(idx, candle),
                }
            }
            Some(t) if t == candle.time => {
                let idx = candles.len() - 1;
                candles[idx] = candle;
            }
            _ => candles.push(candle),
        }
        self.series = CandleSeries::from_sorted_unchecked(candles);
    }

    /// `(oldest, newest)` times, or `None` when empty.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        self.series.bounds()
    }

    pub fn series(&self) -> &CandleSeries {
        &self.series
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.series.last()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Drop every candle (used on symbol/granularity switch).
    pub fn reset(&mut self) {
        self.series = CandleSeries::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time: i64, close: f64) -> Candle {
        Candle::new(time, close, close + 1.0, close - 1.0, close)
    }

    fn series(points: &[(i64, f64)]) -> CandleSeries {
        CandleSeries::from_unsorted(points.iter().map(|&(t, c)| candle(t, c)))
    }

    fn assert_strictly_increasing(s: &CandleSeries) {
        assert!(s.as_slice().windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn test_merge_into_empty() {
        let mut store = CandleStore::new();
        store.merge(&series(&[(60, 1.0), (120, 2.0)]));
        assert_eq!(store.len(), 2);
        assert_eq!(store.bounds(), Some((60, 120)));
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = CandleStore::new();
        store.merge(&series(&[(100, 10.0)]));
        store.merge(&series(&[(100, 20.0)]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.series().get(100).unwrap().close, 20.0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut store = CandleStore::new();
        store.merge(&series(&[(60, 1.0), (180, 3.0), (300, 5.0)]));
        let update = series(&[(120, 2.0), (180, 3.5), (360, 6.0)]);
        let once = store.merge(&update).clone();
        let twice = store.merge(&update).clone();
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 5);
    }

    #[test]
    fn test_overlapping_backfills_stay_ordered() {
        let mut store = CandleStore::new();
        store.merge(&series(&[(600, 6.0), (660, 6.6)]));
        store.merge(&series(&[(300, 3.0), (420, 4.2), (600, 6.1)]));
        store.merge(&series(&[(120, 1.2), (300, 3.1), (360, 3.6)]));
        store.merge(&series(&[(720, 7.2)]));
        store.merge(&series(&[(480, 4.8)]));
        let s = store.series();
        assert_strictly_increasing(s);
        let times: Vec<_> = s.iter().map(|c| c.time).collect();
        assert_eq!(times, [120, 300, 360, 420, 480, 600, 660, 720]);
        assert_eq!(s.get(600).unwrap().close, 6.1);
        assert_eq!(s.get(300).unwrap().close, 3.1);
    }

    #[test]
    fn test_single_candle_upsert_paths() {
        let mut store = CandleStore::new();
        store.merge(&series(&[(60, 1.0), (180, 3.0)]));
        // replace tail
        store.merge(&CandleSeries::single(candle(180, 3.3)));
        // append
        store.merge(&CandleSeries::single(candle(240, 4.0)));
        // insert in the middle
        store.merge(&CandleSeries::single(candle(120, 2.0)));
        // replace in the middle
        store.merge(&CandleSeries::single(candle(60, 1.1)));
        let times: Vec<_> = store.series().iter().map(|c| c.time).collect();
        assert_eq!(times, [60, 120, 180, 240]);
        assert_eq!(store.series().get(180).unwrap().close, 3.3);
        assert_eq!(store.series().get(60).unwrap().close, 1.1);
        assert_eq!(store.latest().unwrap().time, 240);
    }

    #[test]
    fn test_reset_clears() {
        let mut store = CandleStore::new();
        store.merge(&series(&[(60, 1.0)]));
        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.bounds(), None);
    }
}
