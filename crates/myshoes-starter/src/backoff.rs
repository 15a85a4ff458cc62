//! Retry schedule shared by the starter and the reaper.

use std::time::Duration;

use rand::Rng;

/// Attempts a worker makes before leaving the job for the next tick.
pub const MAX_ATTEMPTS: u32 = 10;

pub const MAX_BACKOFF: Duration = Duration::from_secs(512);

/// Delay after the `attempt`-th failure (1-based): `2^attempt` seconds plus
/// up to a second of jitter, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..1000);
    backoff_delay_with_jitter(attempt, jitter)
}

pub fn backoff_delay_with_jitter(attempt: u32, jitter_ms: u64) -> Duration {
    let base = Duration::from_secs(1u64 << attempt.min(9));
    (base + Duration::from_millis(jitter_ms)).min(MAX_BACKOFF)
}
