//! Comment handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;

use crate::api::PostCommentRequest;
use crate::server::service::social;
use crate::server::state::SharedState;
use crate::server::utils::{api_error, json_response, now_secs, respond, service_error, Actor};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCommentQuery {
    comment_id: Option<String>,
}

/// GET /api/resources/:id/comments - `{comments, count}`, newest first.
pub async fn list_comments_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(social::list_comments(&st, &actor, &resource_id))
}

pub async fn post_comment_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
    axum::Json(req): axum::Json<PostCommentRequest>,
) -> Response {
    let st = state.lock().await;
    match social::post_comment(&st, &actor, &resource_id, &req.content, now_secs()) {
        Ok(body) => json_response(StatusCode::CREATED, body),
        Err(e) => service_error(e),
    }
}

/// DELETE /api/resources/:id/comments?commentId=...
pub async fn delete_comment_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
    Query(params): Query<DeleteCommentQuery>,
) -> Response {
    let Some(comment_id) = params.comment_id.filter(|c| !c.is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "Comment ID is required");
    };
    let st = state.lock().await;
    respond(social::delete_comment(&st, &actor, &resource_id, &comment_id))
}
