//! Integration tests for sending and receiving on primary connections

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use common::{Harness, settle_tasks};
use kodegen_agent_link::{
    ActivityState, AgentId, ConnectionState, InboundFrame, LinkError, LinkEvent,
};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn test_send_to_unknown_agent_fails() {
    let h = Harness::new();
    let err = h.manager.send("chloe", "hello").await.unwrap_err();
    assert!(matches!(err, LinkError::NotConnected(ref agent) if agent == "chloe"));
}

#[tokio::test(start_paused = true)]
async fn test_send_while_connecting_is_delivered_once_on_open() {
    let mut h = Harness::new();
    h.manager.connect("s1", "chloe").await.unwrap();

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.send("chloe", r#"{"message":"hi"}"#).await });
    settle_tasks().await;
    assert!(!pending.is_finished());

    let conn = h.next_connection().await;
    assert!(conn.sent().is_empty());
    conn.open();

    pending.await.unwrap().unwrap();
    assert_eq!(conn.sent(), vec![r#"{"message":"hi"}"#.to_string()]);

    h.wait_for_state("chloe", ConnectionState::Connected).await;
    let status = h.next_status("chloe").await;
    assert_eq!(status.activity_state, ActivityState::Thinking);

    settle_tasks().await;
    assert_eq!(conn.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parked_send_times_out() {
    let h = Harness::new();
    h.manager.connect("s1", "chloe").await.unwrap();

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.send("chloe", "hello").await });

    let conn = h.next_connection().await;
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        LinkError::ConnectTimeout { ref agent_id, timeout_ms: 5_000 } if agent_id == "chloe"
    ));

    // A late open must not deliver the timed-out payload
    conn.open();
    settle_tasks().await;
    assert!(conn.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_parked_send_fails_when_connection_drops() {
    let h = Harness::new();
    h.manager.connect("s1", "chloe").await.unwrap();
    let conn = h.next_connection().await;

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.send("chloe", "hello").await });
    settle_tasks().await;

    conn.drop_link();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::NotConnected(_)));
}

#[tokio::test(start_paused = true)]
async fn test_send_on_open_connection_sets_thinking() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    h.manager.send("chloe", "hello").await.unwrap();
    assert_eq!(conn.take_sent().as_deref(), Some("hello"));

    let status = h.next_status("chloe").await;
    assert_eq!(status.connection_state, ConnectionState::Connected);
    assert_eq!(status.activity_state, ActivityState::Thinking);
}

#[tokio::test(start_paused = true)]
async fn test_send_json_serializes_payload() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    h.manager
        .send_json("chloe", &json!({ "message": "hello" }))
        .await
        .unwrap();

    let sent = conn.take_sent().unwrap();
    let value: serde_json::Value = serde_json::from_str(&sent).unwrap();
    assert_eq!(value, json!({ "message": "hello" }));
}

#[tokio::test(start_paused = true)]
async fn test_send_while_reconnecting_fails() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;
    conn.drop_link();
    h.wait_for_state("chloe", ConnectionState::Reconnecting).await;

    let err = h.manager.send("chloe", "hello").await.unwrap_err();
    assert!(matches!(err, LinkError::NotConnected(_)));
}

#[tokio::test(start_paused = true)]
async fn test_inbound_frames_drive_activity_and_reach_listeners() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    conn.message(r#"{"message":"Hel"}"#);
    let packet = h.wait_for(|e| matches!(e, LinkEvent::Packet(_))).await;
    match packet {
        LinkEvent::Packet(packet) => {
            assert_eq!(packet.agent_id, AgentId::new("chloe"));
            assert!(matches!(
                packet.frame,
                InboundFrame::Content { text: Some(ref text), .. } if text == "Hel"
            ));
        }
        _ => unreachable!(),
    }
    assert_eq!(
        h.manager.status(&AgentId::new("chloe")).activity_state,
        ActivityState::Responding
    );

    conn.message(r#"{"message":"lo","turn_complete":true}"#);
    h.wait_for(|e| {
        matches!(e, LinkEvent::Packet(packet) if matches!(packet.frame, InboundFrame::TurnComplete { .. }))
    })
    .await;
    assert_eq!(
        h.manager.status(&AgentId::new("chloe")).activity_state,
        ActivityState::Idle
    );
}

#[tokio::test(start_paused = true)]
async fn test_error_frame_sets_error_activity() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    conn.message(r#"{"error":"model overloaded"}"#);
    let status = h.next_status("chloe").await;
    assert_eq!(status.connection_state, ConnectionState::Connected);
    assert_eq!(status.activity_state, ActivityState::Error);
}

#[tokio::test(start_paused = true)]
async fn test_unparsable_frame_is_content() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    conn.message("plain text, not json");
    let packet = h.wait_for(|e| matches!(e, LinkEvent::Packet(_))).await;
    assert!(matches!(
        packet,
        LinkEvent::Packet(packet)
            if matches!(packet.frame, InboundFrame::Content { text: Some(ref t), .. } if t == "plain text, not json")
    ));
    assert!(h.manager.status(&AgentId::new("chloe")).is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_probe_response_is_not_forwarded() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;
    h.drain();

    conn.message(r#"{"type":"pong"}"#);
    conn.message(r#"{"message":"after"}"#);

    let packet = h.wait_for(|e| matches!(e, LinkEvent::Packet(_))).await;
    assert!(matches!(
        packet,
        LinkEvent::Packet(packet)
            if matches!(packet.frame, InboundFrame::Content { text: Some(ref t), .. } if t == "after")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_event_reaches_listeners() {
    let mut h = Harness::new();
    let conn = h.connect_open("s1", "chloe").await;

    conn.error("tls hiccup");
    let event = h.wait_for(|e| matches!(e, LinkEvent::Error(_))).await;
    assert!(matches!(
        event,
        LinkEvent::Error(error) if error.agent_id.as_str() == "chloe" && error.message.contains("tls hiccup")
    ));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.manager.status(&AgentId::new("chloe")).is_connected());
}
