//! [`HistoryProvider`] over the REST API, with paging.

use super::{FetchOutcome, FetchRequest, HistoryProvider, DEFAULT_MAX_RECORDS_PER_CALL};
use crate::domain::candle::{normalize_records, Candle, CandleSeries};
use crate::error::HttpError;
use crate::http::CandleHttp;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::time::Duration;

/// Default limit on pages issued for one fetch.
pub const DEFAULT_MAX_PAGES: usize = 10;

/// Default deadline for a whole fetch, across pages and retries.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// History provider backed by [`CandleHttp`].
///
/// A range wider than `max_records_per_call` buckets is split into
/// consecutive windows. Any failing window fails the whole fetch.
#[derive(Debug, Clone)]
pub struct HttpHistoryProvider {
    http: CandleHttp,
    max_records_per_call: usize,
    max_pages: usize,
    fetch_timeout: Duration,
}

impl HttpHistoryProvider {
    pub fn new(http: CandleHttp) -> Self {
        Self {
            http,
            max_records_per_call: DEFAULT_MAX_RECORDS_PER_CALL,
            max_pages: DEFAULT_MAX_PAGES,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn max_records_per_call(mut self, cap: usize) -> Self {
        self.max_records_per_call = cap.max(1);
        self
    }

    pub fn max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages.max(1);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Split `[from, to]` into windows of at most `max_records_per_call` buckets.
    pub(crate) fn pages(&self, request: &FetchRequest) -> Vec<(i64, i64)> {
        let step = request.key.granularity.seconds();
        let span = step * self.max_records_per_call as i64;
        let mut pages = Vec::new();
        let mut page_from = request.key.granularity.align(request.from);

        while page_from <= request.to && pages.len() < self.max_pages {
            let page_to = (page_from + span - step).min(request.to);
            pages.push((page_from, page_to));
            page_from = page_to + step;
        }
        if page_from <= request.to {
            tracing::debug!(
                key = %request.key,
                max_pages = self.max_pages,
                "Fetch range truncated at page limit"
            );
        }
        pages
    }

    async fn fetch_pages(&self, request: &FetchRequest) -> Result<(Vec<Candle>, usize), HttpError> {
        let mut candles = Vec::new();
        let mut dropped = 0;

        for (page_from, page_to) in self.pages(request) {
            let records = self
                .http
                .get_candles(
                    &request.key,
                    page_from.saturating_mul(1000),
                    page_to.saturating_mul(1000),
                    self.max_records_per_call,
                )
                .await?;
            let (page, page_dropped) =
                normalize_records(records, request.key.granularity, self.max_records_per_call);
            dropped += page_dropped;
            candles.extend(
                page.into_vec()
                    .into_iter()
                    .filter(|c| c.time >= page_from && c.time <= page_to),
            );
        }
        Ok((candles, dropped))
    }

    async fn fetch_inner(&self, request: FetchRequest) -> FetchOutcome {
        if request.from > request.to {
            return FetchOutcome::default();
        }

        match tokio::time::timeout(self.fetch_timeout, self.fetch_pages(&request)).await {
            Ok(Ok((candles, dropped))) => {
                if dropped > 0 {
                    tracing::debug!(key = %request.key, dropped, "Dropped invalid history records");
                }
                FetchOutcome::ok(CandleSeries::from_unsorted(candles), dropped)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    key = %request.key,
                    from = request.from,
                    to = request.to,
                    "History fetch failed: {}",
                    e
                );
                FetchOutcome::failed(&request.key, e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    key = %request.key,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "History fetch timed out"
                );
                FetchOutcome::failed(&request.key, HttpError::Timeout.to_string())
            }
        }
    }
}

impl HistoryProvider for HttpHistoryProvider {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, FetchOutcome> {
        self.fetch_inner(request).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{Granularity, SeriesKey};

    fn provider(cap: usize, max_pages: usize) -> HttpHistoryProvider {
        HttpHistoryProvider::new(CandleHttp::new("http://localhost:1").unwrap())
            .max_records_per_call(cap)
            .max_pages(max_pages)
    }

    fn request(from: i64, to: i64) -> FetchRequest {
        FetchRequest::new(SeriesKey::new("BTC", Granularity::Hour1), from, to)
    }

    #[test]
    fn test_single_page_when_under_cap() {
        let pages = provider(1000, 10).pages(&request(3600, 100 * 3600));
        assert_eq!(pages, vec![(3600, 100 * 3600)]);
    }

    #[test]
    fn test_pages_cover_range_without_overlap() {
        let pages = provider(10, 10).pages(&request(3600, 25 * 3600));
        assert_eq!(
            pages,
            vec![(3600, 10 * 3600), (11 * 3600, 20 * 3600), (21 * 3600, 25 * 3600)]
        );
    }

    #[test]
    fn test_pages_stop_at_limit() {
        let pages = provider(10, 2).pages(&request(3600, 100 * 3600));
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty_not_failed() {
        let outcome = provider(10, 2).fetch(request(7200, 3600)).await;
        assert!(outcome.candles.is_empty());
        assert!(!outcome.is_failed());
    }
}
