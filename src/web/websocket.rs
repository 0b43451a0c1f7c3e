use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;

use super::{or_unknown, AppState, PROCESSING_ERROR_TEXT};
use crate::types::MessageEvent;

/// One chat frame as sent by the alarm socket clients
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

impl ChatFrame {
    /// Events are stamped with the receive time; the client `time` is only logged
    pub fn into_event(self) -> MessageEvent {
        if let Some(time) = &self.time {
            debug!("Frame from {} carries client time {}", self.user_id, time);
        }

        MessageEvent::new(
            self.user_id,
            or_unknown(self.username),
            self.message,
            or_unknown(self.location),
        )
    }
}

/// WebSocket handler for live chat screening
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    info!("Alarm socket connected");

    while let Some(Ok(msg)) = receiver.next().await {
        let replies = match msg {
            Message::Text(text) => screen_frame(&state, &text),
            Message::Close(_) => break,
            Message::Ping(data) => {
                // Pong is handled automatically by axum
                debug!("Received ping: {:?}", data);
                continue;
            }
            _ => continue,
        };

        for reply in replies {
            if sender.send(Message::Text(reply)).await.is_err() {
                info!("Alarm socket closed while sending");
                return;
            }
        }
    }

    info!("Alarm socket disconnected");
}

/// Alerts to send back for one text frame, each as its own frame
fn screen_frame(state: &AppState, text: &str) -> Vec<String> {
    let frame: ChatFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Malformed alarm socket frame: {}", e);
            return vec![PROCESSING_ERROR_TEXT.to_string()];
        }
    };

    let event = frame.into_event();
    match state.handle_message(&event) {
        Ok(alerts) => alerts,
        Err(e) => {
            warn!("Rejected socket message from {}: {}", event.user_id, e);
            vec![PROCESSING_ERROR_TEXT.to_string()]
        }
    }
}
