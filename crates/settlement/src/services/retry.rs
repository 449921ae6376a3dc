//! Backoff between attempts of a version-checked read-modify-write.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;

/// Attempts before a contended write gives up.
pub(crate) const MAX_ATTEMPTS: usize = 12;

const INITIAL_INTERVAL: Duration = Duration::from_millis(2);
const MAX_INTERVAL: Duration = Duration::from_millis(100);

/// Jittered, growing pause used after losing a version check.
pub(crate) struct Contention {
    backoff: ExponentialBackoff,
}

impl Contention {
    pub(crate) fn new() -> Self {
        Self {
            backoff: ExponentialBackoff {
                current_interval: INITIAL_INTERVAL,
                initial_interval: INITIAL_INTERVAL,
                max_interval: MAX_INTERVAL,
                multiplier: 2.0,
                randomization_factor: 0.5,
                max_elapsed_time: None,
                ..Default::default()
            },
        }
    }

    /// Sleeps before the next attempt.
    pub(crate) async fn wait(&mut self) {
        if let Some(pause) = self.backoff.next_backoff() {
            tokio::time::sleep(pause).await;
        }
    }
}
