//! Subscription params and tracking.

use crate::shared::{Granularity, SeriesKey, Symbol};
use crate::ws::MessageOut;
use serde::{Deserialize, Serialize};

/// Parameters for a candle channel. Subscribe and unsubscribe share the shape.
#[derive(Debug, Clone, Serialize, Deserialize, Hash, Eq, PartialEq)]
pub struct SubscribeParams {
    pub symbol: Symbol,
    pub granularity: Granularity,
}

impl SubscribeParams {
    pub fn new(symbol: impl Into<Symbol>, granularity: Granularity) -> Self {
        Self {
            symbol: symbol.into(),
            granularity,
        }
    }

    pub fn key(&self) -> SeriesKey {
        SeriesKey {
            symbol: self.symbol.clone(),
            granularity: self.granularity,
        }
    }

    pub fn subscription_key(&self) -> String {
        format!("candles:{}:{}", self.symbol, self.granularity)
    }
}

impl From<&SeriesKey> for SubscribeParams {
    fn from(key: &SeriesKey) -> Self {
        Self {
            symbol: key.symbol.clone(),
            granularity: key.granularity,
        }
    }
}

/// Active subscriptions, replayed after every reconnect.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    subs: Vec<SubscribeParams>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update tracking from an outbound message. Returns `true` when the
    /// message was a subscribe or unsubscribe.
    pub fn track(&mut self, msg: &MessageOut) -> bool {
        match msg {
            MessageOut::Subscribe { params } => {
                if !self.subs.contains(params) {
                    tracing::debug!(sub = %params.subscription_key(), "Tracking subscription");
                    self.subs.push(params.clone());
                }
                true
            }
            MessageOut::Unsubscribe { params } => {
                let before = self.subs.len();
                self.subs.retain(|s| s != params);
                let removed = before - self.subs.len();
                if removed > 0 {
                    tracing::debug!("Removed {} subscription(s) from tracking", removed);
                }
                true
            }
            MessageOut::Ping => false,
        }
    }

    pub fn contains(&self, params: &SubscribeParams) -> bool {
        self.subs.contains(params)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscribeParams> {
        self.subs.iter()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> SubscribeParams {
        SubscribeParams::new("BTC", Granularity::Hour1)
    }

    #[test]
    fn test_track_subscribe_dedupes() {
        let mut set = SubscriptionSet::new();
        assert!(set.track(&MessageOut::subscribe(btc())));
        assert!(set.track(&MessageOut::subscribe(btc())));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_track_unsubscribe_matches_exact_params() {
        let mut set = SubscriptionSet::new();
        set.track(&MessageOut::subscribe(btc()));
        set.track(&MessageOut::subscribe(SubscribeParams::new("ETH", Granularity::Hour1)));

        set.track(&MessageOut::unsubscribe(SubscribeParams::new("BTC", Granularity::Minute1)));
        assert_eq!(set.len(), 2);

        set.track(&MessageOut::unsubscribe(btc()));
        assert_eq!(set.len(), 1);
        assert!(!set.contains(&btc()));
    }

    #[test]
    fn test_track_ping_noop() {
        let mut set = SubscriptionSet::new();
        assert!(!set.track(&MessageOut::Ping));
        assert!(set.is_empty());
    }

    #[test]
    fn test_params_from_key() {
        let key = SeriesKey::new("SOL", Granularity::Minute5);
        let params = SubscribeParams::from(&key);
        assert_eq!(params.key(), key);
        assert_eq!(params.subscription_key(), "candles:SOL:5m");
    }
}
