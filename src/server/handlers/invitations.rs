//! Study group invitation handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;

use crate::api::{CreateInvitationRequest, InvitationList, RedeemRequest};
use crate::server::service::groups;
use crate::server::state::SharedState;
use crate::server::utils::{api_error, json_response, now_secs, respond, service_error, Actor};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInvitationsQuery {
    study_group_id: Option<String>,
}

/// GET /api/study-groups/invitations?studyGroupId=...
pub async fn list_invitations_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Query(params): Query<ListInvitationsQuery>,
) -> Response {
    let Some(group_id) = params.study_group_id.filter(|g| !g.is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "Study group ID is required");
    };
    let st = state.lock().await;
    respond(
        groups::list_invitations(&st, &actor, &group_id)
            .map(|invitations| InvitationList { invitations }),
    )
}

pub async fn create_invitation_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    axum::Json(req): axum::Json<CreateInvitationRequest>,
) -> Response {
    let st = state.lock().await;
    match groups::create_invitation(&st, &actor, req, now_secs()) {
        Ok(invitation) => json_response(StatusCode::CREATED, invitation),
        Err(e) => service_error(e),
    }
}

/// POST /api/study-groups/invitations/use - Redeem a code. Failures carry a
/// `reason` of `not_found`, `expired` or `exhausted`.
pub async fn redeem_invitation_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    axum::Json(req): axum::Json<RedeemRequest>,
) -> Response {
    let st = state.lock().await;
    respond(groups::redeem_invitation(&st, &actor, &req.code, now_secs()))
}

pub async fn revoke_invitation_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(invitation_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(
        groups::revoke_invitation(&st, &actor, &invitation_id)
            .map(|()| serde_json::json!({ "success": true })),
    )
}
