//! Tests for the reconnect scheduler

use std::time::Duration;

use kodegen_agent_link::ReconnectPolicy;
use kodegen_agent_link::scheduler::{
    ReconnectScheduler, ScheduleOutcome, TimerTicket, base_backoff, random_backoff,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay_ms: 1_000,
        multiplier: 2.0,
        max_delay_ms: 30_000,
        max_attempts: 5,
        jitter_ms: 0,
    }
}

fn scheduler(
    capped: bool,
) -> (
    ReconnectScheduler<String>,
    mpsc::UnboundedReceiver<(String, TimerTicket)>,
) {
    let (tx, rx) = mpsc::unbounded_channel::<(String, TimerTicket)>();
    let fire = move |key: String, ticket: TimerTicket| {
        let _ = tx.send((key, ticket));
    };
    let scheduler = if capped {
        ReconnectScheduler::new(policy(), fire)
    } else {
        ReconnectScheduler::uncapped(policy(), fire)
    };
    (scheduler, rx)
}

#[test]
fn test_backoff_is_monotonic_and_bounded() {
    let policy = ReconnectPolicy {
        jitter_ms: 1_000,
        ..policy()
    };
    let mut previous = Duration::ZERO;
    for attempts in 0..40 {
        let base = base_backoff(&policy, attempts);
        assert!(base >= previous);
        assert!(base <= Duration::from_millis(policy.max_delay_ms));
        assert!(random_backoff(&policy, attempts) <= policy.ceiling());
        previous = base;
    }
}

#[test]
fn test_huge_multiplier_saturates_at_max() {
    let policy = ReconnectPolicy {
        multiplier: 1e300,
        ..policy()
    };
    assert_eq!(base_backoff(&policy, 10), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_timer_fires_after_backoff() {
    let (mut scheduler, mut rx) = scheduler(true);
    let start = Instant::now();

    let outcome = scheduler.schedule("chloe".to_string(), 3);
    assert_eq!(
        outcome,
        ScheduleOutcome::Scheduled {
            attempt: 3,
            delay: Duration::from_secs(4)
        }
    );
    assert_eq!(scheduler.pending_attempt(&"chloe".to_string()), Some(3));

    let (key, ticket) = rx.recv().await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert_eq!(key, "chloe");
    assert_eq!(scheduler.take_due(&key, ticket), Some(3));
    assert!(!scheduler.is_pending(&key));
    assert_eq!(scheduler.take_due(&key, ticket), None);
}

#[tokio::test(start_paused = true)]
async fn test_rescheduling_replaces_pending_timer() {
    let (mut scheduler, mut rx) = scheduler(true);
    let key = "chloe".to_string();

    scheduler.schedule(key.clone(), 1);
    scheduler.schedule(key.clone(), 2);
    assert_eq!(scheduler.pending_count(), 1);

    let (_, ticket) = rx.recv().await.unwrap();
    assert_eq!(scheduler.take_due(&key, ticket), Some(2));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stale_ticket_is_rejected() {
    let (mut scheduler, _rx) = scheduler(true);
    let key = "chloe".to_string();

    scheduler.schedule(key.clone(), 1);
    let stale_ticket: TimerTicket = 0;
    scheduler.schedule(key.clone(), 1);

    assert_eq!(scheduler.take_due(&key, stale_ticket), None);
    assert!(scheduler.is_pending(&key));
}

#[tokio::test(start_paused = true)]
async fn test_capped_scheduler_exhausts() {
    let (mut scheduler, _rx) = scheduler(true);
    let key = "chloe".to_string();

    for failures in 1..5 {
        assert!(matches!(
            scheduler.schedule(key.clone(), failures),
            ScheduleOutcome::Scheduled { .. }
        ));
    }
    assert_eq!(
        scheduler.schedule(key.clone(), 5),
        ScheduleOutcome::Exhausted { attempts: 5 }
    );
    assert!(!scheduler.is_pending(&key));
}

#[tokio::test(start_paused = true)]
async fn test_uncapped_scheduler_never_exhausts() {
    let (mut scheduler, _rx) = scheduler(false);
    let outcome = scheduler.schedule("a2a/chloe".to_string(), 50);
    assert_eq!(
        outcome,
        ScheduleOutcome::Scheduled {
            attempt: 50,
            delay: Duration::from_secs(30)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_timer() {
    let (mut scheduler, mut rx) = scheduler(true);
    let key = "chloe".to_string();

    scheduler.schedule(key.clone(), 1);
    assert!(scheduler.cancel(&key));
    assert!(!scheduler.cancel(&key));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_drop_aborts_timers() {
    let (mut scheduler, mut rx) = scheduler(false);
    scheduler.schedule("a".to_string(), 1);
    scheduler.schedule("b".to_string(), 1);
    scheduler.cancel_all();
    scheduler.schedule("c".to_string(), 1);
    drop(scheduler);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(rx.try_recv().is_err());
}
