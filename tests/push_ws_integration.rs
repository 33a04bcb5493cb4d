//! Integration tests for the reminder push WebSocket.
//!
//! Each test spins up an Axum server on a random port, connects via
//! tokio-tungstenite, and exercises the real WS contract.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use grow_reminder::error::NotificationError;
use grow_reminder::notify::{
    FanoutSink, NoopChannelRegistry, NotificationSink, PushChannel, ReminderPayload, TracingSink,
};
use grow_reminder::reminders::{DispatchOutcome, ReminderDispatcher};
use grow_reminder::store::LibSqlBackend;
use grow_reminder::tasks::{Plant, Task, TaskType};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Start an Axum server on a random port, return (port, channel).
async fn start_server() -> (u16, PushChannel) {
    let push = PushChannel::new();
    let app = push.router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, push)
}

/// Wait until the server side of `n` sockets has subscribed.
async fn wait_for_subscribers(push: &PushChannel, n: usize) {
    while push.subscriber_count() < n {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

fn payload(target: &str) -> ReminderPayload {
    ReminderPayload {
        title: "Watering due".into(),
        body: "Time to water Blue Dream (Batch B12).".into(),
        target_id: target.into(),
    }
}

#[tokio::test]
async fn deliver_without_clients_reports_no_subscribers() {
    let (_port, push) = start_server().await;

    let err = push.deliver(&payload("t1")).unwrap_err();
    assert!(matches!(err, NotificationError::NoSubscribers { .. }));
}

#[tokio::test]
async fn connected_client_receives_reminder_frame() {
    timeout(TEST_TIMEOUT, async {
        let (port, push) = start_server().await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws/reminders"))
            .await
            .expect("WS connect failed");
        wait_for_subscribers(&push, 1).await;

        push.deliver(&payload("t1")).unwrap();

        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);
        assert_eq!(json["type"], "reminder");
        assert_eq!(json["title"], "Watering due");
        assert_eq!(json["body"], "Time to water Blue Dream (Batch B12).");
        assert_eq!(json["target_id"], "t1");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn every_client_receives_the_broadcast() {
    timeout(TEST_TIMEOUT, async {
        let (port, push) = start_server().await;
        let url = format!("ws://127.0.0.1:{port}/ws/reminders");

        let (mut phone, _) = connect_async(url.as_str()).await.unwrap();
        let (mut tablet, _) = connect_async(url.as_str()).await.unwrap();
        wait_for_subscribers(&push, 2).await;

        push.deliver(&payload("t9")).unwrap();

        for ws in [&mut phone, &mut tablet] {
            let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
            assert_eq!(json["target_id"], "t9");
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ping_gets_pong() {
    timeout(TEST_TIMEOUT, async {
        let (port, _push) = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/reminders"))
            .await
            .unwrap();

        ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "pong");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn garbage_from_client_keeps_socket_open() {
    timeout(TEST_TIMEOUT, async {
        let (port, _push) = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/reminders"))
            .await
            .unwrap();

        ws.send(Message::Text("not json".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "pong");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn dispatch_reaches_connected_client() {
    timeout(TEST_TIMEOUT, async {
        let (port, push) = start_server().await;

        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.insert_plant(&Plant::new("p1", "Blue Dream", "B12"))
            .await
            .unwrap();
        let due = Utc.with_ymd_and_hms(2026, 5, 10, 8, 0, 0).unwrap();
        db.insert_task(
            &Task::new(TaskType::Feeding, due)
                .with_id("t1")
                .with_plant("p1"),
        )
        .await
        .unwrap();

        let sinks: Vec<Arc<dyn NotificationSink>> =
            vec![Arc::new(push.clone()), Arc::new(TracingSink)];
        let dispatcher = ReminderDispatcher::new(
            db,
            Arc::new(NoopChannelRegistry),
            Arc::new(FanoutSink::new(sinks)),
        );

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/reminders"))
            .await
            .unwrap();
        wait_for_subscribers(&push, 1).await;

        assert_eq!(
            dispatcher.dispatch(Some("t1")).await,
            DispatchOutcome::Success
        );

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "reminder");
        assert_eq!(json["title"], "Feeding due");
        assert_eq!(json["target_id"], "t1");
        assert!(json["body"].as_str().unwrap().contains("Blue Dream"));
    })
    .await
    .expect("test timed out");
}
