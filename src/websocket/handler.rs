use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;

use crate::error::AppError;
use crate::hub::{Client, UserId};
use crate::server::AppState;

use super::pump::spawn_pumps;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub uid: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, query), fields(uid = ?query.uid))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let user_id = match parse_user_id(query.uid.as_deref()) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    let max_message_size = state.settings.websocket.max_message_size;

    tracing::info!(user_id = user_id, "WebSocket upgrade requested");

    ws.max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// The identifier is caller-supplied and unauthenticated
fn parse_user_id(raw: Option<&str>) -> Result<UserId, AppError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("missing uid query parameter".to_string()))?;

    raw.parse::<UserId>()
        .map_err(|_| AppError::Validation(format!("uid must be an integer, got {:?}", raw)))
}

/// Register an accepted connection and run its pumps until both stop
async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let websocket = &state.settings.websocket;
    let connection_start = std::time::Instant::now();

    let (client, queues) = Client::new(user_id, websocket.send_buffer);
    let connection_id = client.id;

    if let Err(e) = state.hub.register(client).await {
        tracing::error!(user_id = user_id, error = %e, "Failed to register connection");
        return;
    }

    tracing::info!(
        user_id = user_id,
        connection_id = %connection_id,
        "WebSocket connection established"
    );

    let (ws_sender, ws_receiver) = socket.split();
    let pumps = spawn_pumps(
        ws_sender,
        ws_receiver,
        queues,
        state.hub.clone(),
        state.handler.clone(),
        websocket.max_message_size,
    );
    pumps.join().await;

    tracing::info!(
        user_id = user_id,
        connection_id = %connection_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_id() {
        assert_eq!(parse_user_id(Some("42")).unwrap(), 42);
        assert_eq!(parse_user_id(Some(" -7 ")).unwrap(), -7);
    }

    #[test]
    fn test_parse_user_id_rejects_invalid() {
        assert!(matches!(parse_user_id(None), Err(AppError::Validation(_))));
        assert!(matches!(parse_user_id(Some("")), Err(AppError::Validation(_))));
        assert!(matches!(parse_user_id(Some("abc")), Err(AppError::Validation(_))));
    }
}
