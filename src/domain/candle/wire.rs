//! Wire types for candles (REST history + WS live updates).

use crate::shared::serde_util::{number_or_string, timestamp};
use crate::shared::{Granularity, Symbol};
use serde::{Deserialize, Serialize};

/// A history record in object form: `{time, open, high, low, close}`.
///
/// Short keys (`t`, `o`, `h`, `l`, `c`) are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    #[serde(alias = "t", deserialize_with = "timestamp::deserialize")]
    pub time: i64,
    #[serde(alias = "o", deserialize_with = "number_or_string::deserialize")]
    pub open: f64,
    #[serde(alias = "h", deserialize_with = "number_or_string::deserialize")]
    pub high: f64,
    #[serde(alias = "l", deserialize_with = "number_or_string::deserialize")]
    pub low: f64,
    #[serde(alias = "c", deserialize_with = "number_or_string::deserialize")]
    pub close: f64,
}

/// A numeric field that may arrive as a number or a numeric string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireNumber(pub f64);

impl<'de> Deserialize<'de> for WireNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        number_or_string::deserialize(deserializer).map(WireNumber)
    }
}

/// A history record as sent by the backend, in either supported shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireCandle {
    Object(CandleRecord),
    /// `[time, open, high, low, close, ...]`. Trailing fields (volume etc.) are ignored.
    Tuple(Vec<WireNumber>),
}

/// REST history response: a bare array, or an object wrapping one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryResponse {
    Bare(Vec<serde_json::Value>),
    Wrapped {
        #[serde(alias = "data")]
        candles: Vec<serde_json::Value>,
    },
}

impl HistoryResponse {
    pub fn into_records(self) -> Vec<serde_json::Value> {
        match self {
            HistoryResponse::Bare(records) => records,
            HistoryResponse::Wrapped { candles } => candles,
        }
    }
}

/// WS live candle payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsCandle {
    pub symbol: Symbol,
    pub granularity: Granularity,
    #[serde(alias = "t", deserialize_with = "timestamp::deserialize")]
    pub time: i64,
    #[serde(alias = "o", deserialize_with = "number_or_string::deserialize")]
    pub open: f64,
    #[serde(alias = "h", deserialize_with = "number_or_string::deserialize")]
    pub high: f64,
    #[serde(alias = "l", deserialize_with = "number_or_string::deserialize")]
    pub low: f64,
    #[serde(alias = "c", deserialize_with = "number_or_string::deserialize")]
    pub close: f64,
    /// Whether the bucket has closed.
    #[serde(alias = "is_final", alias = "x", default)]
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_candle_object_and_aliases() {
        let full: WireCandle =
            serde_json::from_str(r#"{"time": 60, "open": 1, "high": 2, "low": 0.5, "close": 1.5}"#)
                .unwrap();
        let short: WireCandle =
            serde_json::from_str(r#"{"t": 60, "o": "1", "h": "2", "l": "0.5", "c": "1.5"}"#).unwrap();
        match (full, short) {
            (WireCandle::Object(a), WireCandle::Object(b)) => assert_eq!(a, b),
            other => panic!("expected objects, got {other:?}"),
        }
    }

    #[test]
    fn test_wire_candle_tuple() {
        let w: WireCandle = serde_json::from_str(r#"[60000, "1", "2", "0.5", "1.5", "999"]"#).unwrap();
        match w {
            WireCandle::Tuple(values) => {
                assert_eq!(values.len(), 6);
                assert_eq!(values[0].0, 60000.0);
            }
            other => panic!("expected tuple, got {other:?}"),
        }
    }

    #[test]
    fn test_history_response_shapes() {
        let bare: HistoryResponse = serde_json::from_str(r#"[{"t": 1}]"#).unwrap();
        assert_eq!(bare.into_records().len(), 1);
        let wrapped: HistoryResponse = serde_json::from_str(r#"{"data": [{"t": 1}, {"t": 2}]}"#).unwrap();
        assert_eq!(wrapped.into_records().len(), 2);
        assert!(serde_json::from_str::<HistoryResponse>(r#"{"error": "nope"}"#).is_err());
    }

    #[test]
    fn test_ws_candle_closed_flag() {
        let open: WsCandle = serde_json::from_str(
            r#"{"symbol":"BTC","granularity":"1h","t":3600,"o":1,"h":2,"l":1,"c":2}"#,
        )
        .unwrap();
        assert!(!open.closed);
        let closed: WsCandle = serde_json::from_str(
            r#"{"symbol":"BTC","granularity":"1h","t":3600,"o":1,"h":2,"l":1,"c":2,"is_final":true}"#,
        )
        .unwrap();
        assert!(closed.closed);
    }
}
