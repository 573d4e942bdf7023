//! Liveness monitoring
//!
//! A periodic sweep over open connections. A connection that has been silent
//! longer than the liveness threshold gets a probe; a probe still unanswered at
//! the next sweep fails the connection. Any inbound frame counts as activity
//! and clears the outstanding probe.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What a sweep should do with one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// Recently active; nothing to do
    Healthy,
    /// Silent past the threshold; send a probe
    Probe,
    /// Probe from the previous sweep went unanswered
    Fail,
}

/// Decide the sweep action for one connection
#[must_use]
pub fn plan_sweep(
    now: Instant,
    last_activity: Instant,
    probe_outstanding: bool,
    threshold: Duration,
) -> SweepAction {
    if probe_outstanding {
        SweepAction::Fail
    } else if now.saturating_duration_since(last_activity) > threshold {
        SweepAction::Probe
    } else {
        SweepAction::Healthy
    }
}

/// Background task ticking the sweep
///
/// Stops when it is dropped or when the tick callback returns `false`.
#[derive(Debug)]
pub struct HealthMonitor {
    token: CancellationToken,
}

impl HealthMonitor {
    /// Start ticking every `period`; the first tick is one period out
    pub fn spawn(period: Duration, mut on_tick: impl FnMut() -> bool + Send + 'static) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if !on_tick() {
                            break;
                        }
                    }
                }
            }
            log::debug!("Health monitor stopped");
        });
        Self { token }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
