//! Like handlers.

use axum::extract::{Path, State};
use axum::response::Response;

use crate::server::service::social;
use crate::server::state::SharedState;
use crate::server::utils::{now_secs, respond, Actor};

/// GET /api/resources/:id/like - `{hasLiked, likeCount}`.
pub async fn like_status_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(social::like_status(&st, &actor, &resource_id))
}

/// POST /api/resources/:id/like - `{likeCount}`. Liking twice is a success.
pub async fn like_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(social::like_resource(&st, &actor, &resource_id, now_secs()))
}
