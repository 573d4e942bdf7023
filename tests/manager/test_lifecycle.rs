//! Integration tests for the connection lifecycle
//!
//! Drives `ConnectionManager` through open, close, reconnect and disconnect
//! using the in-memory transport on paused time.

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use common::{Harness, settle_tasks};
use kodegen_agent_link::transport::{CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL};
use kodegen_agent_link::{
    ActivityState, AgentId, AgentStatus, ConnectionState, ErrorKind, LinkEvent, ReadyState,
};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_connect_then_open_reports_connected_idle() {
    let mut h = Harness::new();

    h.manager.connect("s1", "chloe").await.unwrap();
    assert_eq!(
        h.manager.status(&AgentId::new("chloe")).connection_state,
        ConnectionState::Connecting
    );

    let conn = h.next_connection().await;
    assert_eq!(conn.url().as_str(), "ws://agents.test/ws/s1/chloe");
    assert_eq!(conn.target(), "chloe");

    conn.open();
    let status = h.wait_for_state("chloe", ConnectionState::Connected).await;
    assert_eq!(status, AgentStatus::connected());
    assert_eq!(status.activity_state, ActivityState::Idle);

    h.wait_for(|e| matches!(e, LinkEvent::Open(agent) if agent.as_str() == "chloe"))
        .await;
    assert_eq!(
        h.manager.connected_agents().await.unwrap(),
        vec![AgentId::new("chloe")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_settle_delay_precedes_transport_open() {
    let h = Harness::new();
    let started = Instant::now();

    h.manager.connect("s1", "chloe").await.unwrap();
    let snapshot = h.manager.inspect("chloe").await.unwrap();
    let info = snapshot.connection.unwrap();
    assert_eq!(info.ready_state, None);

    let _conn = h.next_connection().await;
    assert!(started.elapsed() >= common::SETTLE);
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent_for_same_pair() {
    let mut h = Harness::new();
    let _conn = h.connect_open("s1", "chloe").await;
    let before = h.manager.inspect("chloe").await.unwrap();

    h.manager.connect("s1", "chloe").await.unwrap();
    settle_tasks().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let after = h.manager.inspect("chloe").await.unwrap();
    assert_eq!(h.factory.open_count(), 1);
    assert_eq!(
        before.connection.unwrap().connection_id,
        after.connection.unwrap().connection_id
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_with_new_session_replaces_connection() {
    let mut h = Harness::new();
    let old = h.connect_open("s1", "chloe").await;

    h.manager.connect("s2", "chloe").await.unwrap();
    let new = h.next_connection().await;

    assert_eq!(old.close_request().map(|(code, _)| code), Some(CLOSE_NORMAL));
    assert_eq!(new.url().as_str(), "ws://agents.test/ws/s2/chloe");

    let snapshot = h.manager.inspect("chloe").await.unwrap();
    assert_eq!(snapshot.session_id.unwrap().as_str(), "s2");

    // The old transport's close was detached: no reconnect is scheduled
    settle_tasks().await;
    assert_eq!(snapshot.pending_reconnect, None);
    assert_eq!(
        h.manager.status(&AgentId::new("chloe")).connection_state,
        ConnectionState::Connecting
    );
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_schedules_first_reconnect() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    assert!(conn.drop_link());
    let error = h.wait_for(|e| matches!(e, LinkEvent::Error(_))).await;
    match error {
        LinkEvent::Error(error) => {
            assert_eq!(error.kind, ErrorKind::AbnormalClose);
            assert_eq!(error.agent_id.as_str(), "chloe");
        }
        _ => unreachable!(),
    }
    h.wait_for_state("chloe", ConnectionState::Reconnecting).await;
    let waiting_since = Instant::now();

    let snapshot = h.manager.inspect("chloe").await.unwrap();
    assert!(!snapshot.is_registered());
    assert_eq!(snapshot.pending_reconnect, Some(1));

    let next = h.next_connection().await;
    assert!(waiting_since.elapsed() >= Duration::from_secs(1));
    assert_eq!(next.url(), conn.url());
    assert_eq!(
        h.manager.status(&AgentId::new("chloe")).connection_state,
        ConnectionState::Connecting
    );

    next.open();
    h.wait_for(|e| matches!(e, LinkEvent::Reconnect(agent) if agent.as_str() == "chloe"))
        .await;
    let info = h.manager.inspect("chloe").await.unwrap().connection.unwrap();
    assert_eq!(info.reconnect_attempts, 0);
    assert_eq!(info.ready_state, Some(ReadyState::Open));
}

#[tokio::test(start_paused = true)]
async fn test_going_away_close_also_reconnects() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    conn.close(CLOSE_GOING_AWAY, "server restart");
    h.wait_for_state("chloe", ConnectionState::Reconnecting).await;
    let _next = h.next_connection().await;
}

#[tokio::test(start_paused = true)]
async fn test_five_failures_end_in_error_without_sixth_attempt() {
    let mut h = Harness::new();
    h.manager.connect("s1", "chloe").await.unwrap();

    for attempt in 1..=5u32 {
        let conn = h.next_connection().await;
        conn.close(CLOSE_ABNORMAL, "refused");
        if attempt < 5 {
            h.wait_for_state("chloe", ConnectionState::Reconnecting).await;
            let snapshot = h.manager.inspect("chloe").await.unwrap();
            assert_eq!(snapshot.pending_reconnect, Some(attempt));
        }
    }

    let status = h.wait_for_state("chloe", ConnectionState::Error).await;
    assert_eq!(status.connection_state, ConnectionState::Error);
    h.wait_for(|e| matches!(e, LinkEvent::Error(err) if err.kind == ErrorKind::ExhaustedRetries))
        .await;

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.factory.open_count(), 5);
    assert!(h.factory.try_next_connection().is_none());
    let snapshot = h.manager.inspect("chloe").await.unwrap();
    assert_eq!(snapshot.pending_reconnect, None);
    assert!(!snapshot.is_registered());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_between_attempts() {
    let mut h = Harness::new();
    h.manager.connect("s1", "chloe").await.unwrap();
    let conn = h.next_connection().await;

    let mut gaps = Vec::new();
    let mut current = conn;
    for _ in 0..3 {
        current.drop_link();
        h.wait_for_state("chloe", ConnectionState::Reconnecting).await;
        let since = Instant::now();
        current = h.next_connection().await;
        gaps.push(since.elapsed());
    }

    let expected = [1, 2, 4].map(Duration::from_secs);
    for (gap, expected) in gaps.iter().zip(expected) {
        assert!(*gap >= expected, "{gap:?} < {expected:?}");
        assert!(*gap < expected + Duration::from_millis(50), "{gap:?} >> {expected:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_exhaustion_resets_counter() {
    let mut h = Harness::new();
    h.manager.connect("s1", "chloe").await.unwrap();
    for _ in 0..5 {
        h.next_connection().await.drop_link();
    }
    h.wait_for_state("chloe", ConnectionState::Error).await;

    h.manager.retry_connection("chloe").await.unwrap();
    assert_eq!(
        h.manager.status(&AgentId::new("chloe")).connection_state,
        ConnectionState::Connecting
    );
    let conn = h.next_connection().await;
    assert_eq!(conn.url().as_str(), "ws://agents.test/ws/s1/chloe");
    let info = h.manager.inspect("chloe").await.unwrap().connection.unwrap();
    assert_eq!(info.reconnect_attempts, 0);

    conn.open();
    h.wait_for_state("chloe", ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_unknown_agent_fails() {
    let h = Harness::new();
    let err = h.manager.retry_connection("nobody").await.unwrap_err();
    assert!(err.to_string().contains("nobody"));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_leaves_no_entry_and_no_timer() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    h.manager.disconnect("chloe", false).await.unwrap();
    assert_eq!(conn.close_request().map(|(code, _)| code), Some(CLOSE_NORMAL));

    // The close event the transport reports afterwards must not revive the entry
    settle_tasks().await;
    let snapshot = h.manager.inspect("chloe").await.unwrap();
    assert!(!snapshot.is_registered());
    assert_eq!(snapshot.pending_reconnect, None);
    assert_eq!(snapshot.status.connection_state, ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.factory.open_count(), 1);
    let reconnecting = h.drain().into_iter().any(|e| {
        matches!(e, LinkEvent::StatusChange { status, .. }
            if status.connection_state == ConnectionState::Reconnecting)
    });
    assert!(!reconnecting);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;
    conn.drop_link();
    h.wait_for_state("chloe", ConnectionState::Reconnecting).await;

    h.manager.disconnect("chloe", false).await.unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.factory.open_count(), 1);
    assert_eq!(
        h.manager.status(&AgentId::new("chloe")).connection_state,
        ConnectionState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_with_reconnect_starts_from_first_attempt() {
    let mut h = Harness::new();
    let _conn = h.connect_open("s1", "chloe").await;

    h.manager.disconnect("chloe", true).await.unwrap();
    let snapshot = h.manager.inspect("chloe").await.unwrap();
    assert_eq!(snapshot.status.connection_state, ConnectionState::Reconnecting);
    assert_eq!(snapshot.pending_reconnect, Some(1));

    let next = h.next_connection().await;
    assert_eq!(next.target(), "chloe");
}

#[tokio::test(start_paused = true)]
async fn test_normal_close_from_peer_reconnects() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    conn.close(CLOSE_NORMAL, "server restart");
    let error = h.wait_for(|e| matches!(e, LinkEvent::Error(_))).await;
    assert!(matches!(error, LinkEvent::Error(err) if err.kind == ErrorKind::AbnormalClose));
    h.wait_for(|e| matches!(e, LinkEvent::Disconnect(_))).await;
    h.wait_for_state("chloe", ConnectionState::Reconnecting).await;

    let next = h.next_connection().await;
    assert_eq!(next.url(), conn.url());
    next.open();
    h.wait_for(|e| matches!(e, LinkEvent::Reconnect(agent) if agent.as_str() == "chloe"))
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_open_failure_enters_reconnecting() {
    let mut h = Harness::new();
    h.factory.fail_next_opens(1);

    h.manager.connect("s1", "chloe").await.unwrap();
    h.wait_for(|e| matches!(e, LinkEvent::Error(err) if err.kind == ErrorKind::TransportOpenFailure))
        .await;
    h.wait_for_state("chloe", ConnectionState::Reconnecting).await;

    let conn = h.next_connection().await;
    conn.open();
    h.wait_for_state("chloe", ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_one_agent_failing_leaves_others_connected() {
    let mut h = Harness::new();
    let chloe = h.connect_open("s1", "chloe").await;
    let _max = h.connect_open("s1", "max").await;

    chloe.drop_link();
    h.wait_for_state("chloe", ConnectionState::Reconnecting).await;

    assert!(h.manager.status(&AgentId::new("max")).is_connected());
    assert_eq!(
        h.manager.connected_agents().await.unwrap(),
        vec![AgentId::new("max")]
    );
    assert_eq!(
        h.manager.agents_in(ConnectionState::Reconnecting),
        vec![AgentId::new("chloe")]
    );
    assert_eq!(
        h.manager.agents_in(ConnectionState::Connected),
        vec![AgentId::new("max")]
    );
    assert!(h.manager.agents_in(ConnectionState::Error).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_entry_per_agent() {
    let mut h = Harness::new();
    let _first = h.connect_open("s1", "chloe").await;

    // The s2 attempt is replaced while still settling, so it never opens
    h.manager.connect("s2", "chloe").await.unwrap();
    h.manager.connect("s3", "chloe").await.unwrap();
    let latest = h.next_connection().await;
    assert_eq!(latest.url().as_str(), "ws://agents.test/ws/s3/chloe");

    let snapshot = h.manager.inspect("chloe").await.unwrap();
    assert_eq!(snapshot.session_id.unwrap().as_str(), "s3");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.factory.try_next_connection().is_none());
    assert_eq!(h.factory.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_disconnects_everything() {
    let mut h = Harness::new();
    let chloe = h.connect_open("s1", "chloe").await;
    let _max = h.connect_open("s1", "max").await;
    chloe.drop_link();
    h.wait_for_state("chloe", ConnectionState::Reconnecting).await;

    h.manager.cleanup().await.unwrap();

    let statuses = h.manager.statuses();
    assert!(
        statuses
            .values()
            .all(|status| status.connection_state == ConnectionState::Disconnected)
    );
    assert!(h.manager.connected_agents().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.factory.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_manager() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    h.manager.shutdown().await.unwrap();
    assert_eq!(conn.close_request().map(|(code, _)| code), Some(CLOSE_NORMAL));

    settle_tasks().await;
    assert!(h.manager.is_closed());
    assert!(h.manager.connect("s1", "chloe").await.is_err());
}
