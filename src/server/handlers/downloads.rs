//! Resource file download.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::server::service::resources;
use crate::server::state::SharedState;
use crate::server::utils::{service_error, Actor};

/// GET /api/resources/:id/download - File bytes as an attachment. Counts
/// the download.
pub async fn download_handler(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(resource_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    match resources::download(&st, &actor, &resource_id) {
        Ok(file) => {
            let headers = [
                (header::CONTENT_TYPE, file.content_type),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file.file_name),
                ),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ];
            (StatusCode::OK, headers, file.data).into_response()
        }
        Err(e) => service_error(e),
    }
}
