//! Live monitoring WebSocket — attaches observers to the call monitor.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tracing::{debug, info, warn};

use super::AppState;
use crate::monitor::MonitorEvent;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("Monitor client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // Connection-opened acknowledgment, then live events only — no replay.
    let ack = MonitorEvent::Connected {
        message: "Connected to call monitoring".into(),
    };
    if let Ok(json) = serde_json::to_string(&ack) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            warn!("Monitor client disconnected before ack");
            return;
        }
    }

    let mut rx = state.monitor.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Monitor client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Slow observers lose the gap; publishers never wait.
                        warn!(missed = n, "Monitor client lagged behind broadcast");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Monitor broadcast closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Monitor client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Monitor WebSocket error");
                        break;
                    }
                    // Observers are read-only; inbound text is ignored.
                    _ => {}
                }
            }
        }
    }

    info!("Monitor connection closed");
}
