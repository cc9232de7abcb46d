//! Minimum spacing between successive batches.
//!
//! External services rate-limit us, so batches run through a gate. A batch
//! holds a [`PacingPermit`] while it is in flight, and the next permit is
//! granted no sooner than `interval` after the previous one was dropped.
//! The first permit is immediate.

use std::time::Duration;
use tokio::{
    sync::{Mutex, MutexGuard},
    time::Instant,
};

pub struct PacingGate {
    interval: Duration,
    last_finish: Mutex<Option<Instant>>,
}

/// Held for the duration of one batch. Dropping it starts the interval.
pub struct PacingPermit<'a> {
    last_finish: MutexGuard<'a, Option<Instant>>,
}

impl Drop for PacingPermit<'_> {
    fn drop(&mut self) {
        *self.last_finish = Some(Instant::now());
    }
}

impl PacingGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_finish: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the previous batch to finish plus `interval`.
    ///
    /// Concurrent callers queue on the gate, so only one permit is out at a
    /// time.
    pub async fn acquire(&self) -> PacingPermit<'_> {
        let last_finish = self.last_finish.lock().await;

        if let Some(prev) = *last_finish {
            let ready_at = prev + self.interval;
            if Instant::now() < ready_at {
                log::debug!("pacing gate holding for {:?}", ready_at - Instant::now());
                tokio::time::sleep_until(ready_at).await;
            }
        }

        PacingPermit { last_finish }
    }
}
