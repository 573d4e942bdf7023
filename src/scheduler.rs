//! Reconnection scheduling
//!
//! Backoff math plus the per-key reconnect timers. At most one timer is
//! pending per key: scheduling replaces (and aborts) any earlier one.
//!
//! Formula: `min(base * multiplier^attempts, max) + uniform(0..=jitter)`, where
//! `attempts` is the number of consecutive failures before this one.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;

use crate::types::options::ReconnectPolicy;

/// Capped exponential delay, without jitter
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn base_backoff(policy: &ReconnectPolicy, attempts: u32) -> Duration {
    let factor = policy.multiplier.powi(attempts.min(i32::MAX as u32) as i32);
    let raw = policy.base_delay_ms as f64 * factor;
    let capped = if raw.is_finite() {
        raw.min(policy.max_delay_ms as f64)
    } else {
        policy.max_delay_ms as f64
    };
    Duration::from_millis(capped.round() as u64)
}

/// Backoff with an explicit jitter amount
///
/// `jitter` is clamped to the policy's jitter bound.
#[must_use]
pub fn backoff_delay(policy: &ReconnectPolicy, attempts: u32, jitter: Duration) -> Duration {
    base_backoff(policy, attempts) + jitter.min(Duration::from_millis(policy.jitter_ms))
}

/// Backoff with a random jitter in `[0, jitter_ms]`
#[must_use]
pub fn random_backoff(policy: &ReconnectPolicy, attempts: u32) -> Duration {
    let jitter = if policy.jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=policy.jitter_ms)
    };
    backoff_delay(policy, attempts, Duration::from_millis(jitter))
}

/// Result of asking for a reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A timer is pending
    Scheduled {
        /// 1-based number of this reconnect attempt
        attempt: u32,
        /// Delay before the attempt fires
        delay: Duration,
    },
    /// The attempt cap was reached; nothing is pending
    Exhausted {
        /// Consecutive failures counted
        attempts: u32,
    },
}

/// Identifies one scheduled timer so stale firings can be told apart
pub type TimerTicket = u64;

type FireFn<K> = Arc<dyn Fn(K, TimerTicket) + Send + Sync>;

struct PendingTimer {
    ticket: TimerTicket,
    attempt: u32,
    handle: JoinHandle<()>,
}

/// Per-key reconnect timers
///
/// When a timer elapses, the `fire` callback given at construction is called
/// with the key and ticket; the owner then calls [`ReconnectScheduler::take_due`]
/// to confirm the firing is still current.
pub struct ReconnectScheduler<K> {
    policy: ReconnectPolicy,
    capped: bool,
    fire: FireFn<K>,
    pending: HashMap<K, PendingTimer>,
    next_ticket: TimerTicket,
}

impl<K> ReconnectScheduler<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    /// Scheduler that gives up after `policy.max_attempts` failures
    pub fn new(
        policy: ReconnectPolicy,
        fire: impl Fn(K, TimerTicket) + Send + Sync + 'static,
    ) -> Self {
        Self::build(policy, true, Arc::new(fire))
    }

    /// Scheduler that never gives up
    pub fn uncapped(
        policy: ReconnectPolicy,
        fire: impl Fn(K, TimerTicket) + Send + Sync + 'static,
    ) -> Self {
        Self::build(policy, false, Arc::new(fire))
    }

    fn build(policy: ReconnectPolicy, capped: bool, fire: FireFn<K>) -> Self {
        Self {
            policy,
            capped,
            fire,
            pending: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Backoff policy in use
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Schedule a reconnect after `failures` consecutive failures
    ///
    /// Any pending timer for `key` is cancelled first.
    pub fn schedule(&mut self, key: K, failures: u32) -> ScheduleOutcome {
        self.cancel(&key);

        let failures = failures.max(1);
        if self.capped && failures >= self.policy.max_attempts {
            return ScheduleOutcome::Exhausted { attempts: failures };
        }

        let delay = random_backoff(&self.policy, failures - 1);
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);

        let fire = Arc::clone(&self.fire);
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(fired_key, ticket);
        });

        self.pending.insert(
            key,
            PendingTimer {
                ticket,
                attempt: failures,
                handle,
            },
        );
        ScheduleOutcome::Scheduled {
            attempt: failures,
            delay,
        }
    }

    /// Claim a fired timer
    ///
    /// Returns the attempt number if `ticket` is the timer currently pending
    /// for `key`, and forgets it.
    pub fn take_due(&mut self, key: &K, ticket: TimerTicket) -> Option<u32> {
        match self.pending.get(key) {
            Some(timer) if timer.ticket == ticket => {
                self.pending.remove(key).map(|timer| timer.attempt)
            }
            _ => None,
        }
    }

    /// Cancel the pending timer for `key`
    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some_and(|timer| {
            timer.handle.abort();
            true
        })
    }

    /// Cancel every pending timer
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.pending.drain() {
            timer.handle.abort();
        }
    }

    /// Whether a timer is pending for `key`
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Attempt number of the pending timer for `key`
    pub fn pending_attempt(&self, key: &K) -> Option<u32> {
        self.pending.get(key).map(|timer| timer.attempt)
    }

    /// Number of pending timers
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl<K> Drop for ReconnectScheduler<K> {
    fn drop(&mut self) {
        for timer in self.pending.values() {
            timer.handle.abort();
        }
    }
}
