//! Live stream — push-based candle updates for one series at a time.
//!
//! A [`LiveStream`] delivers [`LiveEvent`]s over a channel owned by the sync
//! loop. Every event carries the [`RequestTag`] it was subscribed under, so the
//! controller can drop anything that arrives after a key switch.

use crate::domain::candle::CandleUpdate;
use crate::error::SyncError;
use crate::sync::RequestTag;
use crate::ws::ConnectionState;

#[cfg(feature = "ws-native")]
mod ws_stream;

#[cfg(feature = "ws-native")]
pub use ws_stream::WsLiveStream;

/// Event delivered from a live stream to the controller.
#[derive(Debug)]
pub enum LiveEvent {
    /// A validated candle for the subscribed series.
    Update { tag: RequestTag, update: CandleUpdate },
    /// A payload that failed the candle invariants.
    Rejected { tag: RequestTag, error: SyncError },
    /// Connection state transition.
    State { tag: RequestTag, state: ConnectionState },
    /// Transport closed or errored; a reconnect is scheduled.
    Disconnected { tag: RequestTag, error: SyncError },
}

impl LiveEvent {
    pub fn tag(&self) -> &RequestTag {
        match self {
            LiveEvent::Update { tag, .. }
            | LiveEvent::Rejected { tag, .. }
            | LiveEvent::State { tag, .. }
            | LiveEvent::Disconnected { tag, .. } => tag,
        }
    }
}

/// Subscription handle over a push transport.
///
/// Only one subscription is active at a time. `subscribe` replaces any
/// previous one; `unsubscribe` stops delivery immediately and cancels a
/// pending reconnect.
pub trait LiveStream: Send {
    fn subscribe(&mut self, tag: RequestTag) -> Result<(), SyncError>;

    fn unsubscribe(&mut self);

    fn connection_state(&self) -> ConnectionState;
}

/// A live stream that never delivers anything.
#[derive(Debug, Default)]
pub struct NoLiveStream;

impl LiveStream for NoLiveStream {
    fn subscribe(&mut self, _tag: RequestTag) -> Result<(), SyncError> {
        Ok(())
    }

    fn unsubscribe(&mut self) {}

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::shared::{Granularity, SeriesKey};

    #[test]
    fn test_event_tag_accessor() {
        let tag = RequestTag::new(SeriesKey::new("BTC", Granularity::Hour1), 3);
        let event = LiveEvent::Update {
            tag: tag.clone(),
            update: CandleUpdate {
                candle: Candle::new(3600, 1.0, 2.0, 0.5, 1.5),
                is_final: false,
            },
        };
        assert_eq!(event.tag(), &tag);
        let state = LiveEvent::State {
            tag: tag.clone(),
            state: ConnectionState::Backoff,
        };
        assert_eq!(state.tag().generation, 3);
    }
}
