//! HTTP triggers for broadcast and point-to-point delivery.
//!
//! Request bodies are forwarded to clients as-is; the hub never inspects them.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::hub::UserId;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub delivered_to: usize,
    pub evicted: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub user_id: UserId,
    pub delivered: bool,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast the request body to all connected users
#[tracing::instrument(name = "http.broadcast", skip(state, body), fields(bytes = body.len()))]
pub async fn broadcast_message(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BroadcastResponse>> {
    if body.is_empty() {
        return Err(AppError::Validation("message body is empty".to_string()));
    }

    let report = state.hub.broadcast(body).await?;

    Ok(Json(BroadcastResponse {
        delivered_to: report.delivered,
        evicted: report.evicted,
        timestamp: Utc::now(),
    }))
}

/// Send the request body to a single user
#[tracing::instrument(name = "http.send_message", skip(state, body), fields(bytes = body.len()))]
pub async fn send_message(
    State(state): State<AppState>,
    Path(uid): Path<UserId>,
    body: Bytes,
) -> Result<Json<SendMessageResponse>> {
    if body.is_empty() {
        return Err(AppError::Validation("message body is empty".to_string()));
    }

    state.hub.send_message(uid, body).await?;

    Ok(Json(SendMessageResponse {
        user_id: uid,
        delivered: true,
        timestamp: Utc::now(),
    }))
}
