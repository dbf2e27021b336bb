//! Custom serde helpers for backend wire formats.

/// Deserializes an `f64` sent either as a JSON number or as a numeric string.
///
/// Many candle feeds quote prices as strings (`"64210.5"`) to avoid float
/// rounding on the wire.
pub mod number_or_string {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(NumberOrString)
    }

    pub(crate) struct NumberOrString;

    impl<'de> Visitor<'de> for NumberOrString {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number or a numeric string")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            v.trim()
                .parse::<f64>()
                .map_err(|_| E::custom(format!("Invalid number: {}", v)))
        }
    }
}

/// Deserializes a unix timestamp sent as a number or numeric string into `i64`.
///
/// Fractional values are truncated; unit normalization (seconds vs millis)
/// happens later, in the conversion to domain types.
pub mod timestamp {
    use serde::Deserializer;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = deserializer.deserialize_any(super::number_or_string::NumberOrString)?;
        if !v.is_finite() {
            return Err(serde::de::Error::custom("Non-finite timestamp"));
        }
        Ok(v as i64)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "super::number_or_string::deserialize")]
        price: f64,
        #[serde(deserialize_with = "super::timestamp::deserialize")]
        t: i64,
    }

    #[test]
    fn test_accepts_numbers_and_strings() {
        let a: Sample = serde_json::from_str(r#"{"price": 1.5, "t": 100}"#).unwrap();
        let b: Sample = serde_json::from_str(r#"{"price": "1.5", "t": "100"}"#).unwrap();
        assert_eq!(a.price, b.price);
        assert_eq!(a.t, b.t);
    }

    #[test]
    fn test_rejects_garbage_strings() {
        let r = serde_json::from_str::<Sample>(r#"{"price": "abc", "t": 100}"#);
        assert!(r.is_err());
    }
}
