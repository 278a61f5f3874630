//! Shared helpers for the HTTP handlers: error responses, the actor
//! extractor and time.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::api::{ErrorBody, ACTOR_HEADER};
use crate::server::service::ServiceError;

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: message.into(),
        reason: None,
    };
    (status, axum::Json(body)).into_response()
}

/// Serialize `body` with the given status.
pub fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, axum::Json(body)).into_response()
}

/// Map a service error onto its HTTP status. Storage failures are logged and
/// reported without internals.
pub fn service_error(error: ServiceError) -> Response {
    match error {
        ServiceError::Unauthenticated => {
            api_error(StatusCode::UNAUTHORIZED, "Authentication required")
        }
        ServiceError::Forbidden(msg) => api_error(StatusCode::FORBIDDEN, msg),
        ServiceError::NotFound(msg) => api_error(StatusCode::NOT_FOUND, msg),
        ServiceError::BadRequest(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        ServiceError::Validation(e) => api_error(StatusCode::BAD_REQUEST, e.message),
        ServiceError::Invitation(reason) => {
            let status = match reason {
                crate::model::RedeemFailure::NotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            };
            let body = ErrorBody {
                error: reason.message().to_string(),
                reason: Some(reason.reason().to_string()),
            };
            (status, axum::Json(body)).into_response()
        }
        ServiceError::Storage(e) => {
            crate::ulog!("storage error: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred",
            )
        }
    }
}

/// Convert a service result into a 200 JSON response or an error response.
pub fn respond<T: Serialize>(result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => service_error(e),
    }
}

/// The authenticated actor, forwarded by the auth gateway in the
/// `x-unishare-user` header. Requests without it are rejected with 401.
#[derive(Debug, Clone)]
pub struct Actor(pub String);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Actor(v.to_string()))
            .ok_or_else(|| service_error(ServiceError::Unauthenticated))
    }
}

/// Current time as seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
