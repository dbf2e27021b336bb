//! HTTP client layer — `CandleHttp` with retry policies.

pub mod client;
pub mod retry;

pub use client::CandleHttp;
pub use retry::{RetryConfig, RetryPolicy};
