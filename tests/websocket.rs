#![cfg(feature = "web")]

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use chatwatch::prelude::*;
use chatwatch::web::PROCESSING_ERROR_TEXT;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Serve a fresh engine on an ephemeral port; returns the socket URL and the engine
async fn spawn_server(config: MonitorConfig) -> (String, Arc<ChatMonitor>) {
    let monitor = Arc::new(ChatMonitor::from_config(&config).unwrap());
    let app = WebServer::new(Arc::clone(&monitor), &config).router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{}/ws/alarm", addr), monitor)
}

async fn connect(url: &str) -> Client {
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn send_frame(client: &mut Client, frame: serde_json::Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn next_text(client: &mut Client) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .unwrap();
    match msg {
        Message::Text(text) => text,
        other => panic!("unexpected frame: {:?}", other),
    }
}

fn frame(user_id: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "userId": user_id,
        "username": "alice",
        "message": message,
        "location": "Lisbon",
        "time": "2024-05-01T10:00:00Z"
    })
}

#[tokio::test]
async fn test_alerts_arrive_as_separate_frames() {
    let started = chrono::Utc::now();
    let (url, monitor) = spawn_server(MonitorConfig::with_default_categories()).await;
    let mut client = connect(&url).await;

    send_frame(&mut client, frame("u1", "you are worthless")).await;
    assert_eq!(next_text(&mut client).await, "⚠️ Warning 1/3: your message was flagged for harassment.");

    send_frame(&mut client, frame("u1", "loser")).await;
    assert!(next_text(&mut client).await.starts_with("⚠️ Warning 2/3"));

    send_frame(&mut client, frame("u1", "idiot")).await;
    assert!(next_text(&mut client).await.starts_with("⚠️ Warning 3/3"));
    assert_eq!(
        next_text(&mut client).await,
        "🚫 You have reached 3 warnings and are now blocked."
    );
    assert!(monitor.is_blocked("u1"));

    send_frame(&mut client, frame("u1", "hello?")).await;
    assert_eq!(
        next_text(&mut client).await,
        "🚫 You are blocked. Type '/reset' to clear warnings."
    );

    send_frame(&mut client, frame("u1", "/reset")).await;
    assert_eq!(next_text(&mut client).await, "Warnings reset for u1 (previous count: 3).");
    assert!(!monitor.is_blocked("u1"));

    // The frames carry a 2024 client time; records use the receive time
    let records = monitor.list_flagged();
    assert_eq!(records.len(), 1);
    assert!(records[0].timestamp >= started);
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let (url, _monitor) = spawn_server(MonitorConfig::with_default_categories()).await;
    let mut client = connect(&url).await;

    client.send(Message::Text("{oops".to_string())).await.unwrap();
    assert_eq!(next_text(&mut client).await, PROCESSING_ERROR_TEXT);

    send_frame(&mut client, frame("u2", "free money, click here")).await;
    assert_eq!(
        next_text(&mut client).await,
        "⚠️ Warning 1/3: your message was flagged for spam."
    );
}

#[tokio::test]
async fn test_both_transports_share_one_engine() {
    let (url, monitor) = spawn_server(MonitorConfig::with_default_categories()).await;
    let mut first = connect(&url).await;
    let mut second = connect(&url).await;

    send_frame(&mut first, frame("shared", "worthless")).await;
    assert!(next_text(&mut first).await.starts_with("⚠️ Warning 1/3"));

    send_frame(&mut second, frame("shared", "worthless")).await;
    assert!(next_text(&mut second).await.starts_with("⚠️ Warning 2/3"));

    // Direct engine calls see the same state as the sockets
    let alerts = monitor.screen("shared", "alice", "worthless", "Lisbon").unwrap();
    assert_eq!(alerts.len(), 2);

    send_frame(&mut first, frame("shared", "hi")).await;
    assert!(next_text(&mut first).await.starts_with("🚫 You are blocked"));
}

#[tokio::test]
async fn test_self_reset_disabled() {
    let mut config = MonitorConfig::with_default_categories();
    config.escalation.block_threshold = 1;
    config.escalation.allow_self_reset = false;
    let (url, monitor) = spawn_server(config).await;
    let mut client = connect(&url).await;

    send_frame(&mut client, frame("u1", "loser")).await;
    next_text(&mut client).await;
    next_text(&mut client).await;

    send_frame(&mut client, frame("u1", "/reset")).await;
    assert_eq!(
        next_text(&mut client).await,
        "🚫 You are blocked. Please contact an admin for assistance."
    );
    assert!(monitor.is_blocked("u1"));
}
