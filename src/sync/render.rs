//! Renderer interface. The engine pushes; it never reads rendering state.

use crate::domain::candle::{Candle, CandleSeries};
use tokio::sync::mpsc;

/// Why the full series was handed to the renderer.
///
/// Backfill variants carry how many candles landed on the affected side, so a
/// renderer can shift its visible window by that amount and keep the consumer's
/// viewing position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceReason {
    InitialLoad,
    KeySwitch,
    BackfillOlder { prepended: usize },
    BackfillNewer { appended: usize },
}

/// Sink for series changes, implemented by the chart/UI collaborator.
pub trait RendererSink: Send {
    fn on_series_replaced(&mut self, series: &CandleSeries, reason: ReplaceReason);

    fn on_candle_upserted(&mut self, candle: &Candle);

    fn on_latest_price(&mut self, price: f64);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl RendererSink for NullRenderer {
    fn on_series_replaced(&mut self, _series: &CandleSeries, _reason: ReplaceReason) {}
    fn on_candle_upserted(&mut self, _candle: &Candle) {}
    fn on_latest_price(&mut self, _price: f64) {}
}

/// A renderer call captured as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    SeriesReplaced {
        series: CandleSeries,
        reason: ReplaceReason,
    },
    CandleUpserted(Candle),
    LatestPrice(f64),
}

/// Forwards renderer calls over a channel, for consumers on another task.
#[derive(Debug, Clone)]
pub struct ChannelRenderer {
    tx: mpsc::UnboundedSender<RenderEvent>,
}

impl ChannelRenderer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RenderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: RenderEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Render receiver dropped");
        }
    }
}

impl RendererSink for ChannelRenderer {
    fn on_series_replaced(&mut self, series: &CandleSeries, reason: ReplaceReason) {
        self.emit(RenderEvent::SeriesReplaced {
            series: series.clone(),
            reason,
        });
    }

    fn on_candle_upserted(&mut self, candle: &Candle) {
        self.emit(RenderEvent::CandleUpserted(*candle));
    }

    fn on_latest_price(&mut self, price: f64) {
        self.emit(RenderEvent::LatestPrice(price));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_renderer_forwards_in_order() {
        let (mut renderer, mut rx) = ChannelRenderer::new();
        let candle = Candle::new(3600, 1.0, 2.0, 0.5, 1.5);
        renderer.on_series_replaced(&CandleSeries::single(candle), ReplaceReason::InitialLoad);
        renderer.on_candle_upserted(&candle);
        renderer.on_latest_price(1.5);

        assert!(matches!(
            rx.try_recv(),
            Ok(RenderEvent::SeriesReplaced { reason: ReplaceReason::InitialLoad, .. })
        ));
        assert_eq!(rx.try_recv().unwrap(), RenderEvent::CandleUpserted(candle));
        assert_eq!(rx.try_recv().unwrap(), RenderEvent::LatestPrice(1.5));
    }

    #[test]
    fn test_channel_renderer_survives_dropped_receiver() {
        let (mut renderer, rx) = ChannelRenderer::new();
        drop(rx);
        renderer.on_latest_price(1.0);
    }
}
