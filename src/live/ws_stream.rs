//! [`LiveStream`] over the native WebSocket client.

use super::{LiveEvent, LiveStream};
use crate::error::SyncError;
use crate::sync::RequestTag;
use crate::ws::native::WsClient;
use crate::ws::{ConnectionState, Kind, SubscribeParams, WsConfig, WsEvent};

use futures_util::StreamExt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct ActiveStream {
    tag: RequestTag,
    state: Arc<AtomicU8>,
    forwarder: JoinHandle<()>,
}

/// One [`WsClient`] per subscription, owned by a forwarding task that turns
/// transport events into [`LiveEvent`]s.
///
/// Unsubscribing aborts the forwarder, which drops the client and with it the
/// connection task and any pending backoff timer.
pub struct WsLiveStream {
    config: WsConfig,
    events: mpsc::Sender<LiveEvent>,
    active: Option<ActiveStream>,
}

impl WsLiveStream {
    pub fn new(config: WsConfig, events: mpsc::Sender<LiveEvent>) -> Self {
        Self {
            config,
            events,
            active: None,
        }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Tag of the active subscription, if any.
    pub fn active_tag(&self) -> Option<&RequestTag> {
        self.active.as_ref().map(|a| &a.tag)
    }
}

impl LiveStream for WsLiveStream {
    fn subscribe(&mut self, tag: RequestTag) -> Result<(), SyncError> {
        self.unsubscribe();

        let mut client = WsClient::new(self.config.clone());
        client.connect()?;
        client.subscribe(SubscribeParams::from(&tag.key))?;

        tracing::info!(key = %tag.key, generation = tag.generation, "Live stream subscribed");

        let state = client.state_handle();
        let forwarder = tokio::spawn(forward(client, tag.clone(), self.events.clone()));
        self.active = Some(ActiveStream {
            tag,
            state,
            forwarder,
        });
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(active) = self.active.take() {
            active.forwarder.abort();
            tracing::info!(
                key = %active.tag.key,
                generation = active.tag.generation,
                "Live stream unsubscribed"
            );
        }
    }

    fn connection_state(&self) -> ConnectionState {
        match &self.active {
            Some(active) => ConnectionState::from(active.state.load(Ordering::SeqCst)),
            None => ConnectionState::Disconnected,
        }
    }
}

impl Drop for WsLiveStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn forward(client: WsClient, tag: RequestTag, tx: mpsc::Sender<LiveEvent>) {
    let mut events = client.events();
    while let Some(event) = events.next().await {
        let Some(live) = translate(&tag, event) else {
            continue;
        };
        if tx.send(live).await.is_err() {
            tracing::debug!(key = %tag.key, "Live event receiver gone, stopping forwarder");
            break;
        }
    }
}

/// Map a transport event to a controller event. Events for other series and
/// protocol chatter map to `None`.
fn translate(tag: &RequestTag, event: WsEvent) -> Option<LiveEvent> {
    let tag = tag.clone();
    match event {
        WsEvent::Message(Kind::Candle(payload)) => {
            if payload.data.key() != tag.key {
                tracing::debug!(
                    expected = %tag.key,
                    got = %payload.data.key(),
                    "Ignoring candle for another series"
                );
                return None;
            }
            Some(match payload.data.to_update() {
                Ok(update) => LiveEvent::Update { tag, update },
                Err(error) => LiveEvent::Rejected { tag, error },
            })
        }
        WsEvent::Message(_) => None,
        WsEvent::Connecting => Some(LiveEvent::State {
            tag,
            state: ConnectionState::Connecting,
        }),
        WsEvent::Connected => Some(LiveEvent::State {
            tag,
            state: ConnectionState::Connected,
        }),
        WsEvent::Reconnecting { .. } => Some(LiveEvent::State {
            tag,
            state: ConnectionState::Backoff,
        }),
        WsEvent::MaxReconnectReached => Some(LiveEvent::State {
            tag,
            state: ConnectionState::Disconnected,
        }),
        WsEvent::Disconnected { code, reason } => Some(LiveEvent::Disconnected {
            tag,
            error: SyncError::StreamDisconnected { code, reason },
        }),
        WsEvent::Error(message) => {
            tracing::debug!(key = %tag.key, "Live stream error: {}", message);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::wire::WsCandle;
    use crate::shared::{Granularity, SeriesKey};
    use crate::ws::CandlePayload;

    fn tag() -> RequestTag {
        RequestTag::new(SeriesKey::new("BTC", Granularity::Hour1), 1)
    }

    fn payload(symbol: &str, high: f64) -> WsEvent {
        WsEvent::Message(Kind::Candle(CandlePayload {
            data: WsCandle {
                symbol: symbol.into(),
                granularity: Granularity::Hour1,
                time: 7_260,
                open: 1.0,
                high,
                low: 0.5,
                close: 1.5,
                closed: true,
            },
        }))
    }

    #[test]
    fn test_translate_candle_aligns_and_validates() {
        match translate(&tag(), payload("BTC", 2.0)) {
            Some(LiveEvent::Update { update, .. }) => {
                assert_eq!(update.candle.time, 7_200);
                assert!(update.is_final);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            translate(&tag(), payload("BTC", f64::NAN)),
            Some(LiveEvent::Rejected { .. })
        ));
    }

    #[test]
    fn test_translate_ignores_other_series() {
        assert!(translate(&tag(), payload("ETH", 2.0)).is_none());
    }

    #[test]
    fn test_translate_state_events() {
        assert!(matches!(
            translate(&tag(), WsEvent::Connecting),
            Some(LiveEvent::State { state: ConnectionState::Connecting, .. })
        ));
        assert!(matches!(
            translate(&tag(), WsEvent::Reconnecting { attempt: 1, delay_ms: 500 }),
            Some(LiveEvent::State { state: ConnectionState::Backoff, .. })
        ));
        assert!(matches!(
            translate(&tag(), WsEvent::Disconnected { code: Some(1006), reason: "gone".into() }),
            Some(LiveEvent::Disconnected { error: SyncError::StreamDisconnected { code: Some(1006), .. }, .. })
        ));
        assert!(translate(&tag(), WsEvent::Message(Kind::Pong)).is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_without_subscription_is_noop() {
        let (tx, _rx) = mpsc::channel(4);
        let mut stream = WsLiveStream::new(WsConfig::default(), tx);
        stream.unsubscribe();
        assert_eq!(stream.connection_state(), ConnectionState::Disconnected);
        assert!(stream.active_tag().is_none());
    }
}
