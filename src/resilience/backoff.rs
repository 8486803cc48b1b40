//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Calculate the delay before retry number `attempt` (1-based).
///
/// `base_ms * 2^(attempt-1)`, capped at `max_ms`, plus up to 10% jitter so
/// retries of many requests do not line up.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
