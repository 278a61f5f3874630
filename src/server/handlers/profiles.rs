//! Profile and follow handlers.

use axum::extract::{Path, State};
use axum::response::Response;

use crate::api::{FollowRequest, ProfileRequest};
use crate::server::service::social;
use crate::server::state::SharedState;
use crate::server::utils::{now_secs, respond, Actor};

/// PUT /api/profile - Create or update the caller's profile.
pub async fn update_profile_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    axum::Json(req): axum::Json<ProfileRequest>,
) -> Response {
    let st = state.lock().await;
    respond(social::upsert_profile(&st, &actor, req, now_secs()))
}

/// GET /api/users/:user_id
pub async fn get_profile_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(user_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(social::get_profile(&st, &actor, &user_id))
}

/// POST /api/users/:user_id/follow - `{"action": "follow" | "unfollow"}`.
pub async fn follow_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(user_id): Path<String>,
    axum::Json(req): axum::Json<FollowRequest>,
) -> Response {
    let st = state.lock().await;
    respond(social::follow(&st, &actor, &user_id, req.action, now_secs()))
}
