//! Integration tests for the liveness sweep
//!
//! Sweeps run every 15s with a 30s silence threshold; the connection opens
//! right after the 100ms settle delay.

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use common::{Harness, options_with_health};
use kodegen_agent_link::message::PROBE_FRAME;
use kodegen_agent_link::transport::CLOSE_LIVENESS_TIMEOUT;
use kodegen_agent_link::{
    ActivityState, AgentId, ConnectionState, ErrorKind, HealthOptions, LinkEvent,
};
use tokio::time::{Instant, sleep_until};

fn harness() -> Harness {
    Harness::with_options(options_with_health(HealthOptions {
        liveness_threshold_ms: 30_000,
        probe_interval_ms: 15_000,
    }))
}

fn secs(start: Instant, secs: f64) -> Instant {
    start + Duration::from_secs_f64(secs)
}

#[tokio::test(start_paused = true)]
async fn test_silent_connection_is_probed_then_failed() {
    let start = Instant::now();
    let mut h = harness();
    let conn = h.connect_open("s1", "chloe").await;

    sleep_until(secs(start, 44.0)).await;
    assert!(conn.sent().is_empty());

    sleep_until(secs(start, 46.0)).await;
    assert_eq!(conn.sent(), vec![PROBE_FRAME.to_string()]);
    assert!(conn.close_request().is_none());

    sleep_until(secs(start, 60.5)).await;
    assert_eq!(
        conn.close_request(),
        Some((CLOSE_LIVENESS_TIMEOUT, "liveness timeout".to_string()))
    );

    let error = h.wait_for(|e| matches!(e, LinkEvent::Error(_))).await;
    match error {
        LinkEvent::Error(err) => {
            assert_eq!(err.kind, ErrorKind::LivenessTimeout);
            assert!(err.message.ends_with("within 15000ms"), "{}", err.message);
        }
        other => panic!("unexpected event {other:?}"),
    }
    h.wait_for(|e| matches!(e, LinkEvent::Disconnect(agent) if agent.as_str() == "chloe"))
        .await;
    h.wait_for_state("chloe", ConnectionState::Reconnecting).await;

    let next = h.next_connection().await;
    assert_eq!(next.url(), conn.url());
}

#[tokio::test(start_paused = true)]
async fn test_probe_response_keeps_connection() {
    let start = Instant::now();
    let h = harness();
    let conn = h_connect(&h).await;

    sleep_until(secs(start, 46.0)).await;
    assert_eq!(conn.take_sent().as_deref(), Some(PROBE_FRAME));
    conn.message(r#"{"type":"pong"}"#);

    sleep_until(secs(start, 80.0)).await;
    assert!(conn.close_request().is_none());
    assert!(conn.sent().is_empty());
    assert_eq!(h.factory.open_count(), 1);
    assert!(h.manager.status(&AgentId::new("chloe")).is_connected());

    let info = h.manager.inspect("chloe").await.unwrap().connection.unwrap();
    assert!(!info.probe_outstanding);
}

#[tokio::test(start_paused = true)]
async fn test_regular_traffic_prevents_probes() {
    let start = Instant::now();
    let h = harness();
    let conn = h_connect(&h).await;

    for tick in 1..=12 {
        sleep_until(secs(start, f64::from(tick) * 10.0)).await;
        conn.message(r#"{"message":"still here"}"#);
    }

    assert!(conn.sent().is_empty());
    assert!(conn.close_request().is_none());
    assert!(h.manager.status(&AgentId::new("chloe")).is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_unopened_connection_is_not_probed() {
    let h = harness();
    h.manager.connect("s1", "chloe").await.unwrap();
    let conn = h.next_connection().await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(conn.sent().is_empty());
    assert!(conn.close_request().is_none());
    assert_eq!(
        h.manager.status(&AgentId::new("chloe")).connection_state,
        ConnectionState::Connecting
    );
}

#[tokio::test(start_paused = true)]
async fn test_probe_response_clears_error_activity() {
    let mut h = harness();
    let conn = h.connect_open("s1", "chloe").await;

    conn.message(r#"{"error":"overloaded"}"#);
    let status = h.next_status("chloe").await;
    assert_eq!(status.activity_state, ActivityState::Error);

    conn.message(r#"{"type":"pong"}"#);
    let status = h.next_status("chloe").await;
    assert_eq!(status.connection_state, ConnectionState::Connected);
    assert_eq!(status.activity_state, ActivityState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_only_silent_agent_fails() {
    let start = Instant::now();
    let mut h = harness();
    let quiet = h.connect_open("s1", "quiet").await;
    let chatty = h.connect_open("s1", "chatty").await;

    for tick in 1..=6 {
        sleep_until(secs(start, f64::from(tick) * 10.0 + 0.5)).await;
        chatty.message(r#"{"message":"tick"}"#);
    }

    assert!(quiet.close_request().is_some());
    assert!(chatty.close_request().is_none());
    assert!(h.manager.status(&AgentId::new("chatty")).is_connected());
    h.wait_for_state("quiet", ConnectionState::Reconnecting).await;
}

async fn h_connect(h: &Harness) -> kodegen_agent_link::MemoryConnection {
    h.manager.connect("s1", "chloe").await.unwrap();
    let conn = h.next_connection().await;
    conn.open();
    conn
}
