//! Health check endpoint.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::server::state::SharedState;

pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.lock().await;
    let body = serde_json::json!({
        "status": "ok",
        "users": state.storage.count_users().unwrap_or(0),
        "resources": state.storage.count_resources().unwrap_or(0),
        "studyGroups": state.storage.count_groups().unwrap_or(0),
        "feedTopics": state.feed.topic_count(),
        "feedSequence": state.feed.last_sequence(),
        "realtimeConnections": state.ws_connection_count.load(Ordering::Relaxed),
    });
    (StatusCode::OK, axum::Json(body))
}
