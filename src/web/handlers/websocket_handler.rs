use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::web::AppState;
use crate::web::models::websocket_models::{ClientEvent, ServerEvent};
use crate::web::session::Session;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn send_event(
    socket: &mut WebSocket,
    connection_id: Uuid,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json_data) => socket.send(Message::Text(Utf8Bytes::from(json_data))).await,
        Err(e) => {
            error!(connection_id = %connection_id, error = %e, "Failed to serialize push.");
            Ok(())
        }
    }
}

async fn handle_socket(mut socket: WebSocket, app_state: Arc<AppState>) {
    let (connection_id, mut outbound_rx) = app_state.connections.register();
    let mut session = Session::new(app_state.gateway.clone());
    info!(connection_id = %connection_id, "WebSocket connection established.");

    'connection: loop {
        tokio::select! {
            // Broadcast pushes from the scheduler
            Some(event) = outbound_rx.recv() => {
                if send_event(&mut socket, connection_id, &event).await.is_err() {
                    warn!(connection_id = %connection_id, "Error sending push. Closing connection.");
                    break;
                }
            }
            // Events from the client
            incoming = socket.recv() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "WebSocket receive error.");
                        break;
                    }
                    None => {
                        debug!(connection_id = %connection_id, "Client disconnected.");
                        break;
                    }
                };

                match msg {
                    Message::Text(t) if t.as_str() == "ping" => {
                        if socket.send(Message::Text(Utf8Bytes::from_static("pong"))).await.is_err() {
                            break;
                        }
                    }
                    Message::Text(t) => {
                        let event = match ClientEvent::parse(t.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                debug!(connection_id = %connection_id, error = %e, "Ignoring unparseable client frame.");
                                continue;
                            }
                        };
                        for push in session.handle(event).await {
                            if send_event(&mut socket, connection_id, &push).await.is_err() {
                                warn!(connection_id = %connection_id, "Error sending reply. Closing connection.");
                                break 'connection;
                            }
                        }
                    }
                    Message::Ping(p) => {
                        if socket.send(Message::Pong(p)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        debug!(connection_id = %connection_id, "Received close message.");
                        break;
                    }
                    Message::Binary(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    app_state.connections.unregister(connection_id);
    info!(connection_id = %connection_id, "WebSocket connection closed.");
}
