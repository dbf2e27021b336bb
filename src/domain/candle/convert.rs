//! Conversions from wire types to domain types for candles.

use super::wire::{CandleRecord, WireCandle, WsCandle};
use super::{Candle, CandleSeries, CandleUpdate};
use crate::error::SyncError;
use crate::shared::{Granularity, SeriesKey};

/// Timestamps at or above this are taken to be milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

fn to_seconds(time: i64) -> i64 {
    if time >= MILLIS_THRESHOLD {
        time / 1000
    } else {
        time
    }
}

impl From<CandleRecord> for Candle {
    fn from(r: CandleRecord) -> Self {
        Candle::new(to_seconds(r.time), r.open, r.high, r.low, r.close)
    }
}

impl TryFrom<WireCandle> for Candle {
    type Error = SyncError;

    fn try_from(w: WireCandle) -> Result<Self, Self::Error> {
        match w {
            WireCandle::Object(r) => Ok(r.into()),
            WireCandle::Tuple(v) if v.len() >= 5 => {
                let time = v[0].0;
                if !time.is_finite() {
                    return Err(SyncError::InvalidRecord {
                        reason: "non-finite time".into(),
                    });
                }
                Ok(Candle::new(to_seconds(time as i64), v[1].0, v[2].0, v[3].0, v[4].0))
            }
            WireCandle::Tuple(v) => Err(SyncError::InvalidRecord {
                reason: format!("tuple record has {} fields, expected at least 5", v.len()),
            }),
        }
    }
}

impl WsCandle {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.symbol.clone(), self.granularity)
    }

    /// Validate and bucket-align a live payload.
    pub fn to_update(&self) -> Result<CandleUpdate, SyncError> {
        let time = self.granularity.align(to_seconds(self.time));
        let candle = Candle::new(time, self.open, self.high, self.low, self.close);
        candle.validate()?;
        Ok(CandleUpdate {
            candle,
            is_final: self.closed,
        })
    }
}

/// Turn raw history records into a series for `granularity`.
///
/// Each record is parsed, converted to seconds, floored to its bucket and
/// checked against the candle invariants; anything that fails is dropped and
/// counted. Duplicates resolve last-write-wins. At most `cap` candles are kept
/// (the oldest ones, matching how a paged backend fills a window).
pub fn normalize_records(
    records: Vec<serde_json::Value>,
    granularity: Granularity,
    cap: usize,
) -> (CandleSeries, usize) {
    let mut dropped = 0;
    let mut candles = Vec::with_capacity(records.len());

    for value in records {
        let parsed = serde_json::from_value::<WireCandle>(value)
            .map_err(|e| SyncError::InvalidRecord {
                reason: e.to_string(),
            })
            .and_then(Candle::try_from);

        match parsed {
            Ok(mut candle) => {
                candle.time = granularity.align(candle.time);
                match candle.validate() {
                    Ok(()) => candles.push(candle),
                    Err(e) => {
                        tracing::trace!("Dropping history record: {}", e);
                        dropped += 1;
                    }
                }
            }
            Err(e) => {
                tracing::trace!("Dropping history record: {}", e);
                dropped += 1;
            }
        }
    }

    let series = CandleSeries::from_unsorted(candles);
    if series.len() > cap {
        let mut kept = series.into_vec();
        kept.truncate(cap);
        return (CandleSeries::from_sorted_unchecked(kept), dropped);
    }
    (series, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: i64 = 1_699_999_200;

    #[test]
    fn test_normalize_mixed_records() {
        let records = vec![
            json!({"time": BASE + 3600, "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5}),
            json!([BASE * 1000, "1", "2", "0.5", "1.5", "10"]),
            json!({"time": 0, "open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0}),
            json!({"time": 10_800, "open": 1.0, "high": 0.5, "low": 0.1, "close": 0.2}),
            json!("garbage"),
            json!([60, 1]),
        ];
        let (series, dropped) = normalize_records(records, Granularity::Hour1, 1000);
        let times: Vec<_> = series.iter().map(|c| c.time).collect();
        assert_eq!(times, [BASE, BASE + 3600]);
        assert_eq!(dropped, 4);
    }

    #[test]
    fn test_normalize_converts_millis_and_aligns() {
        let records = vec![json!({"t": 1_700_000_123_456i64, "o": 1, "h": 1, "l": 1, "c": 1})];
        let (series, dropped) = normalize_records(records, Granularity::Minute1, 1000);
        assert_eq!(dropped, 0);
        assert_eq!(series.first().unwrap().time, 1_700_000_100);
    }

    #[test]
    fn test_normalize_duplicates_last_wins() {
        let records = vec![
            json!({"t": 60, "o": 1, "h": 2, "l": 1, "c": 1}),
            json!({"t": 60, "o": 1, "h": 2, "l": 1, "c": 2}),
        ];
        let (series, _) = normalize_records(records, Granularity::Minute1, 1000);
        assert_eq!(series.len(), 1);
        assert_eq!(series.first().unwrap().close, 2.0);
    }

    #[test]
    fn test_normalize_truncates_to_cap() {
        let records = (1..=10)
            .map(|i| json!({"t": i * 60, "o": 1, "h": 1, "l": 1, "c": 1}))
            .collect();
        let (series, _) = normalize_records(records, Granularity::Minute1, 4);
        assert_eq!(series.len(), 4);
        assert_eq!(series.bounds(), Some((60, 240)));
    }

    #[test]
    fn test_ws_candle_to_update_aligns() {
        let ws = WsCandle {
            symbol: "BTC".into(),
            granularity: Granularity::Hour1,
            time: 3_700,
            open: 1.0,
            high: 2.0,
            low: 1.0,
            close: 1.5,
            closed: true,
        };
        let update = ws.to_update().unwrap();
        assert_eq!(update.candle.time, 3_600);
        assert!(update.is_final);
        assert_eq!(ws.key(), SeriesKey::new("BTC", Granularity::Hour1));
    }

    #[test]
    fn test_ws_candle_invalid_rejected() {
        let ws = WsCandle {
            symbol: "BTC".into(),
            granularity: Granularity::Hour1,
            time: 3_600,
            open: 1.0,
            high: f64::NAN,
            low: 1.0,
            close: 1.5,
            closed: false,
        };
        assert!(matches!(ws.to_update(), Err(SyncError::InvalidRecord { .. })));
    }
}
