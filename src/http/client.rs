//! Low-level HTTP client — `CandleHttp`.
//!
//! Returns raw wire records; validation and normalization happen in the
//! history provider, which is also where failures are absorbed.

use crate::domain::candle::wire::HistoryResponse;
use crate::error::HttpError;
use crate::http::retry::RetryPolicy;
use crate::shared::SeriesKey;

use reqwest::Client;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Low-level HTTP client for the candle history REST API.
#[derive(Debug, Clone)]
pub struct CandleHttp {
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl CandleHttp {
    pub fn new(base_url: &str) -> Result<Self, HttpError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry: RetryPolicy::Idempotent,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── Candles ──────────────────────────────────────────────────────────

    /// `GET /api/candles?symbol=..&granularity=..&startTimeMs=..&endTimeMs=..&limit=..`
    pub async fn get_candles(
        &self,
        key: &SeriesKey,
        start_time_ms: i64,
        end_time_ms: i64,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, HttpError> {
        let url = format!(
            "{}/api/candles?symbol={}&granularity={}&startTimeMs={}&endTimeMs={}&limit={}",
            self.base_url,
            urlencoding::encode(key.symbol.as_str()),
            key.granularity.as_str(),
            start_time_ms,
            end_time_ms,
            limit
        );
        let response: HistoryResponse = self.get(&url).await?;
        Ok(response.into_records())
    }

    // ── Internal HTTP methods ────────────────────────────────────────────

    async fn get(&self, url: &str) -> Result<HistoryResponse, HttpError> {
        let Some(config) = self.retry.config() else {
            return self.do_get(url).await;
        };

        let mut last_error = None;

        for attempt in 0..=config.max_retries {
            match self.do_get(url).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    let should_retry = match &e {
                        HttpError::ServerError { status, .. } => config.is_retryable_status(*status),
                        HttpError::RateLimited { retry_after_ms } => {
                            if let Some(ms) = retry_after_ms {
                                futures_timer::Delay::new(Duration::from_millis(*ms)).await;
                            }
                            true
                        }
                        HttpError::Timeout => true,
                        HttpError::Reqwest(re) => re.is_connect() || re.is_timeout() || re.is_request(),
                        _ => false,
                    };

                    if should_retry && attempt < config.max_retries {
                        let delay = config.delay_for_attempt(attempt);
                        tracing::debug!(
                            attempt = attempt + 1,
                            max = config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying request to {}",
                            url
                        );
                        futures_timer::Delay::new(delay).await;
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(HttpError::MaxRetriesExceeded {
            attempts: config.max_retries + 1,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn do_get(&self, url: &str) -> Result<HistoryResponse, HttpError> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout
            } else {
                HttpError::Reqwest(e)
            }
        })?;
        let status = resp.status();

        if status.is_success() {
            let body = resp.text().await?;
            return serde_json::from_str::<HistoryResponse>(&body)
                .map_err(|e| HttpError::Malformed(e.to_string()));
        }

        let status_code = status.as_u16();
        let retry_after_ms = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let body_text = resp.text().await.unwrap_or_default();

        match status_code {
            404 => Err(HttpError::NotFound(body_text)),
            429 => Err(HttpError::RateLimited { retry_after_ms }),
            400..=499 => Err(HttpError::BadRequest(body_text)),
            _ => Err(HttpError::ServerError {
                status: status_code,
                body: body_text,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let http = CandleHttp::new("http://localhost:9000/").unwrap();
        assert_eq!(http.base_url(), "http://localhost:9000");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_error_not_panic() {
        let http = CandleHttp::with_timeout("http://127.0.0.1:1", Duration::from_millis(200))
            .unwrap()
            .with_retry(RetryPolicy::None);
        let key = SeriesKey::new("BTC", crate::shared::Granularity::Hour1);
        let result = http.get_candles(&key, 0, 3_600_000, 10).await;
        assert!(result.is_err());
    }
}
