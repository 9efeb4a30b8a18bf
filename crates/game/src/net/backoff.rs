use std::time::Duration;

const FIRST_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_millis(500);

/// Delay before retrying a socket receive after `failures` consecutive
/// errors. Doubles per failure and stays under `MAX_DELAY`.
pub(crate) fn receive_backoff(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    FIRST_DELAY.saturating_mul(1 << shift).min(MAX_DELAY)
}
