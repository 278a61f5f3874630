//! Study group handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;

use crate::api::{CreateGroupRequest, UpdateMemberRequest};
use crate::server::config::{DEFAULT_GROUP_PAGE_SIZE, MAX_GROUP_PAGE_SIZE};
use crate::server::service::groups;
use crate::server::state::SharedState;
use crate::server::utils::{json_response, now_secs, respond, service_error, Actor};

#[derive(Deserialize)]
pub struct ListGroupsQuery {
    limit: Option<u32>,
    offset: Option<u32>,
    search: Option<String>,
}

pub async fn create_group_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    axum::Json(req): axum::Json<CreateGroupRequest>,
) -> Response {
    let st = state.lock().await;
    match groups::create_group(&st, &actor, req, now_secs()) {
        Ok(body) => json_response(StatusCode::CREATED, body),
        Err(e) => service_error(e),
    }
}

/// GET /api/study-groups/list?limit=&offset=&search=
pub async fn list_groups_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Query(params): Query<ListGroupsQuery>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_GROUP_PAGE_SIZE)
        .clamp(1, MAX_GROUP_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);
    let st = state.lock().await;
    respond(groups::list_groups(
        &st,
        &actor,
        params.search.as_deref(),
        limit,
        offset,
    ))
}

pub async fn get_group_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(group_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(groups::group_status(&st, &actor, &group_id))
}

pub async fn join_group_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(group_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(groups::join_group(&st, &actor, &group_id, now_secs()))
}

pub async fn leave_group_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(group_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(groups::leave_group(&st, &actor, &group_id))
}

/// PATCH /api/study-groups/:id/members/:user_id - Promote or demote.
pub async fn update_member_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path((group_id, member)): Path<(String, String)>,
    axum::Json(req): axum::Json<UpdateMemberRequest>,
) -> Response {
    let st = state.lock().await;
    respond(
        groups::update_member_role(&st, &actor, &group_id, &member, req.role)
            .map(|()| serde_json::json!({ "success": true, "role": req.role })),
    )
}

pub async fn remove_member_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path((group_id, member)): Path<(String, String)>,
) -> Response {
    let st = state.lock().await;
    respond(groups::remove_member(&st, &actor, &group_id, &member))
}

pub async fn delete_group_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(group_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(
        groups::delete_group(&st, &actor, &group_id)
            .map(|()| serde_json::json!({ "success": true })),
    )
}
