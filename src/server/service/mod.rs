//! Request semantics independent of HTTP.
//!
//! Each operation takes the locked [`AppState`], the authenticated actor and
//! the current time, performs its storage work synchronously, publishes the
//! resulting change events and returns a typed response body. Handlers and
//! the in-process client backend both call into this layer.

pub mod groups;
pub mod resources;
pub mod social;

use rand::Rng;

use crate::model::{ChangeEvent, RedeemFailure};
use crate::server::state::AppState;
use crate::storage::StorageError;
use crate::validation::ValidationError;

/// Characters used for invitation codes: upper-case letters and digits
/// without the easily confused `0 O 1 I L`.
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const INVITE_CODE_LEN: usize = 8;

#[derive(Debug)]
pub enum ServiceError {
    Unauthenticated,
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Validation(ValidationError),
    Invitation(RedeemFailure),
    Storage(StorageError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Unauthenticated => write!(f, "Authentication required"),
            ServiceError::Forbidden(msg) => write!(f, "{msg}"),
            ServiceError::NotFound(msg) => write!(f, "{msg}"),
            ServiceError::BadRequest(msg) => write!(f, "{msg}"),
            ServiceError::Validation(e) => write!(f, "{e}"),
            ServiceError::Invitation(reason) => write!(f, "{reason}"),
            ServiceError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        ServiceError::Storage(e)
    }
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        ServiceError::Validation(e)
    }
}

/// Random 128-bit identifier, hex encoded.
pub fn new_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub fn new_invitation_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

pub(crate) fn publish(state: &AppState, event: ChangeEvent) {
    state.feed.publish(event);
}

/// Treat blank optional text as absent and trim the rest.
pub(crate) fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
