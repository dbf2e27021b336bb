//! Capped exponential backoff shared by HTTP retries and WS reconnects.

use std::time::Duration;

/// `min(cap, initial * factor^attempt)`, optionally jittered by ±25%.
///
/// `attempt` is 0-indexed. Jitter never pushes the result above `cap`.
pub fn capped_exponential(
    initial: Duration,
    factor: f64,
    attempt: u32,
    cap: Duration,
    jitter: bool,
) -> Duration {
    let cap_ms = cap.as_millis() as f64;
    let exp = attempt.min(i32::MAX as u32) as i32;
    let base = initial.as_millis() as f64 * factor.powi(exp);
    let capped = if base.is_finite() { base.min(cap_ms) } else { cap_ms };

    let final_ms = if jitter {
        let jitter_range = capped * 0.25;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        (capped + jitter).clamp(0.0, cap_ms)
    } else {
        capped
    };

    Duration::from_millis(final_ms as u64)
}
