//! Background polling loop with adaptive interval and exponential backoff.
//!
//! Every tick queues a pull-to-refresh on the sync actor and waits for it, so
//! polls never pile up behind a slow request. The interval is read from a
//! `watch::Receiver<u64>` that the event loop updates as activity changes
//! (3s while builds run, 10s shortly after, 30s idle); a change wakes the
//! poller early.
//!
//! Consecutive failures stretch the delay to `base × 2^failures`, capped at
//! `MAX_BACKOFF_SECS`. The next successful poll resets it.

use crate::sync::actor::{SyncCommand, SyncHandle};
use crate::sync::SyncError;
use tokio::sync::watch;
use tokio::time;

/// 5 minutes. The passive error toast has been showing for a while by then.
const MAX_BACKOFF_SECS: u64 = 300;

/// Compute backoff delay: `min(base_interval * 2^failures, MAX_BACKOFF_SECS)`.
pub fn backoff_delay(base_interval: u64, failures: u32) -> u64 {
    let multiplier = 1u64.checked_shl(failures).unwrap_or(u64::MAX);
    base_interval
        .saturating_mul(multiplier)
        .clamp(1, MAX_BACKOFF_SECS)
}

pub struct Poller {
    handle: SyncHandle,
    interval_rx: watch::Receiver<u64>,
}

impl Poller {
    pub fn new(handle: SyncHandle, interval_rx: watch::Receiver<u64>) -> Self {
        Self {
            handle,
            interval_rx,
        }
    }

    /// Runs until the sync actor goes away. The initial load is the caller's job.
    pub async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            let base_interval = *self.interval_rx.borrow();
            let delay = if failures > 0 {
                backoff_delay(base_interval, failures)
            } else {
                base_interval
            };
            // Wake early if the polling interval changes (e.g. idle -> active)
            tokio::select! {
                () = time::sleep(time::Duration::from_secs(delay)) => {},
                changed = self.interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                },
            }

            match self.handle.run(SyncCommand::PullToRefresh).await {
                Ok(_) => failures = 0,
                Err(SyncError::Closed) => {
                    tracing::debug!("poller: sync task gone");
                    return;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::debug!(
                        failures,
                        next_delay = backoff_delay(base_interval, failures),
                        "poll failed: {e}"
                    );
                }
            }
        }
    }
}
