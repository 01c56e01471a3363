//! WebSocket event streaming for live dashboards and agent consoles

use super::state::AppState;
use crate::application::DialerEngine;
use crate::domain::agent::AgentStatus;
use crate::domain::shared::AgentId;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// Messages a client may push over the socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    AgentStatus { agent_id: AgentId, status: AgentStatus },
}

/// WebSocket handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state.engine))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, engine: Arc<DialerEngine>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = engine.subscribe();

    info!("WebSocket client connected");

    let welcome = serde_json::json!({
        "type": "welcome",
        "message": "Connected to dialer event stream",
        "timestamp": chrono::Utc::now().timestamp(),
    });

    if let Ok(msg) = serde_json::to_string(&welcome) {
        if sender.send(Message::Text(msg)).await.is_err() {
            error!("Failed to send welcome message");
            return;
        }
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Client disconnected");
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagging, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => {
                    info!("WebSocket client requested close");
                    break;
                }
                Message::Text(text) => handle_client_message(&engine, &text).await,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket client disconnected");
}

async fn handle_client_message(engine: &DialerEngine, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::AgentStatus { agent_id, status }) => {
            // the resulting AgentStatusChanged event reaches every subscriber
            if let Err(e) = engine.set_agent_status(agent_id, status).await {
                warn!("Agent status update for {} failed: {}", agent_id, e);
            }
        }
        Err(e) => debug!("Ignoring client message {}: {}", text, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_status_message() {
        let agent_id = AgentId::new();
        let text = format!(
            r#"{{"type":"agent_status","agent_id":"{}","status":"available"}}"#,
            agent_id
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(&text).unwrap(),
            ClientMessage::AgentStatus {
                agent_id,
                status: AgentStatus::Available
            }
        );
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dial"}"#).is_err());
    }
}
