//! Resource create, read, edit, delete and file upload handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum_extra::extract::Multipart;

use crate::api::{CreateResourceRequest, EditResourceRequest, EditResourceResponse};
use crate::logging::item_id;
use crate::server::config::MAX_UPLOAD_SIZE;
use crate::server::service::resources::{self, ThumbnailJob};
use crate::server::state::SharedState;
use crate::server::utils::{api_error, json_response, now_secs, respond, service_error, Actor};

/// Fire the thumbnail webhook on the blocking pool. Failures are logged
/// only; the edit has already been committed.
fn spawn_thumbnail(job: ThumbnailJob) {
    tokio::task::spawn_blocking(move || {
        match resources::fire_thumbnail_webhook(&job) {
            Ok(()) => crate::ulog!("thumbnails: requested for {}", item_id(&job.resource_id)),
            Err(e) => crate::ulog!("thumbnails: {} for {}", e, item_id(&job.resource_id)),
        }
    });
}

pub async fn create_resource_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    axum::Json(req): axum::Json<CreateResourceRequest>,
) -> Response {
    let result = {
        let st = state.lock().await;
        resources::create_resource(&st, &actor, req, now_secs())
    };
    match result {
        Ok((view, job)) => {
            if let Some(job) = job {
                spawn_thumbnail(job);
            }
            json_response(StatusCode::CREATED, view)
        }
        Err(e) => service_error(e),
    }
}

pub async fn get_resource_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(resources::get_resource(&st, &actor, &resource_id))
}

/// POST /api/resources/:id/edit - Owner-only edit with length limits and
/// the content filter.
pub async fn edit_resource_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
    axum::Json(req): axum::Json<EditResourceRequest>,
) -> Response {
    let result = {
        let st = state.lock().await;
        resources::edit_resource(&st, &actor, &resource_id, req, now_secs())
    };
    match result {
        Ok(job) => {
            let thumbnail_regenerating = job.is_some();
            if let Some(job) = job {
                spawn_thumbnail(job);
            }
            json_response(
                StatusCode::OK,
                EditResourceResponse {
                    success: true,
                    thumbnail_regenerating,
                },
            )
        }
        Err(e) => service_error(e),
    }
}

pub async fn delete_resource_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    respond(
        resources::delete_resource(&st, &actor, &resource_id)
            .map(|()| serde_json::json!({ "success": true })),
    )
}

/// POST /api/resources/:id/file - Multipart upload, field name `file`.
pub async fn upload_file_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let mut file_data: Option<Vec<u8>> = None;
    let mut content_type = "application/octet-stream".to_string();
    let mut filename: Option<String> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name().unwrap_or("") != "file" {
            continue;
        }
        if let Some(ct) = field.content_type() {
            content_type = ct.to_string();
        }
        filename = field.file_name().map(|f| f.to_string());
        match field.bytes().await {
            Ok(bytes) => {
                if bytes.len() as u64 > MAX_UPLOAD_SIZE {
                    return api_error(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        format!("file exceeds maximum size of {} bytes", MAX_UPLOAD_SIZE),
                    );
                }
                file_data = Some(bytes.to_vec());
            }
            Err(e) => {
                return api_error(StatusCode::BAD_REQUEST, format!("failed to read file: {e}"))
            }
        }
    }

    let Some(data) = file_data.filter(|d| !d.is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "no file provided");
    };

    let st = state.lock().await;
    match resources::upload_file(
        &st,
        &actor,
        &resource_id,
        &content_type,
        filename.as_deref(),
        &data,
    ) {
        Ok(body) => json_response(StatusCode::CREATED, body),
        Err(e) => service_error(e),
    }
}
