//! Notification handlers.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::server::config::{DEFAULT_NOTIFICATION_LIMIT, MAX_NOTIFICATION_LIMIT};
use crate::server::service::social;
use crate::server::state::SharedState;
use crate::server::utils::{respond, Actor};

#[derive(Deserialize)]
pub struct ListNotificationsQuery {
    unread: Option<bool>,
    limit: Option<u32>,
}

/// GET /api/notifications - List the caller's notifications, newest first.
pub async fn list_notifications_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Query(params): Query<ListNotificationsQuery>,
) -> Response {
    let st = state.lock().await;
    let unread_only = params.unread.unwrap_or(false);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_NOTIFICATION_LIMIT)
        .min(MAX_NOTIFICATION_LIMIT);
    respond(social::list_notifications(&st, &actor, unread_only, limit))
}

/// GET /api/notifications/count - Unread notification count.
pub async fn count_notifications_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
) -> Response {
    let st = state.lock().await;
    respond(social::count_unread(&st, &actor).map(|unread| serde_json::json!({ "unread": unread })))
}

/// POST /api/notifications/:id/read
pub async fn mark_read_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Response {
    let st = state.lock().await;
    respond(
        social::mark_read(&st, &actor, id)
            .map(|()| serde_json::json!({ "status": "ok", "id": id })),
    )
}

/// POST /api/notifications/read-all
pub async fn mark_all_read_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
) -> Response {
    let st = state.lock().await;
    respond(
        social::mark_all_read(&st, &actor)
            .map(|count| serde_json::json!({ "status": "ok", "markedRead": count })),
    )
}
