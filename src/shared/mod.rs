//! Shared newtypes and utilities used across all modules.
//!
//! These types are serialization-transparent: they serialize/deserialize identically
//! to the raw format the backend sends, so they can be used directly in wire types
//! without conversion overhead.

pub mod backoff;
pub mod serde_util;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

// ─── Symbol ──────────────────────────────────────────────────────────────────

/// Newtype for instrument symbols (e.g. `"BTC"`, `"SOL-PERP"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Symbol(s.to_string()))
    }
}

impl Serialize for Symbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Symbol(s))
    }
}

// ─── Granularity ─────────────────────────────────────────────────────────────

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Candle bucket duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[default]
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Granularity {
    pub const ALL: [Granularity; 7] = [
        Self::Minute1,
        Self::Minute5,
        Self::Minute15,
        Self::Minute30,
        Self::Hour1,
        Self::Hour4,
        Self::Day1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute1 => "1m",
            Self::Minute5 => "5m",
            Self::Minute15 => "15m",
            Self::Minute30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
        }
    }

    /// Duration of one candle in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Minute1 => MINUTE,
            Self::Minute5 => 5 * MINUTE,
            Self::Minute15 => 15 * MINUTE,
            Self::Minute30 => 30 * MINUTE,
            Self::Hour1 => HOUR,
            Self::Hour4 => 4 * HOUR,
            Self::Day1 => DAY,
        }
    }

    /// How far back one history request reaches, both for the initial load
    /// and for each older-edge backfill.
    pub fn lookback_step(&self) -> i64 {
        match self {
            Self::Minute1 => 12 * HOUR,
            Self::Minute5 => 3 * DAY,
            Self::Minute15 | Self::Minute30 | Self::Hour1 => 7 * DAY,
            Self::Hour4 | Self::Day1 => 30 * DAY,
        }
    }

    /// Floor a unix-seconds timestamp to the start of its bucket.
    pub fn align(&self, time: i64) -> i64 {
        time - time.rem_euclid(self.seconds())
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| format!("Unknown granularity: {}", s))
    }
}

// ─── SeriesKey ───────────────────────────────────────────────────────────────

/// Identifies one working series: `(symbol, granularity)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: Symbol,
    pub granularity: Granularity,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<Symbol>, granularity: Granularity) -> Self {
        Self {
            symbol: symbol.into(),
            granularity,
        }
    }

    /// Persistence key: `cache:{symbol}:{granularity}`.
    pub fn cache_key(&self) -> String {
        format!("cache:{}:{}", self.symbol, self.granularity)
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.granularity)
    }
}

// ─── Time ────────────────────────────────────────────────────────────────────

/// Current wall-clock time in unix seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_serde() {
        let sym = Symbol::from("BTC");
        let json = serde_json::to_string(&sym).unwrap();
        assert_eq!(json, "\"BTC\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(sym, back);
    }

    #[test]
    fn test_granularity_serde() {
        let g: Granularity = serde_json::from_str("\"1h\"").unwrap();
        assert_eq!(g, Granularity::Hour1);
        assert_eq!(g.seconds(), 3600);
        assert_eq!(serde_json::to_string(&Granularity::Minute30).unwrap(), "\"30m\"");
    }

    #[test]
    fn test_granularity_from_str_matches_as_str() {
        for g in Granularity::ALL {
            assert_eq!(g.as_str().parse::<Granularity>().unwrap(), g);
        }
        assert!("2h".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_align_floors_to_bucket() {
        assert_eq!(Granularity::Hour1.align(7_250), 7_200);
        assert_eq!(Granularity::Hour1.align(7_200), 7_200);
        assert_eq!(Granularity::Minute5.align(901), 900);
    }

    #[test]
    fn test_lookback_step_hour_is_one_week() {
        assert_eq!(Granularity::Hour1.lookback_step(), 7 * 86_400);
    }

    #[test]
    fn test_cache_key_layout() {
        let key = SeriesKey::new("BTC", Granularity::Hour1);
        assert_eq!(key.cache_key(), "cache:BTC:1h");
        assert_eq!(key.to_string(), "BTC@1h");
    }
}
