//! Seams between the engagement protocol and the outside world: the
//! request/response backend and the realtime change source. Both are
//! constructed explicitly and passed in as `Arc<dyn ...>`.

use async_trait::async_trait;

use crate::api::{
    CommentMutation, CommentPage, FollowAction, FollowResponse, GroupStatus, LikeCount,
    LikeStatus, MembershipResponse, ProfileView, RedeemResponse, ResourceView,
};
use crate::client::subscription::Subscription;
use crate::model::{ChangeFilter, RedeemFailure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport failure. Never retried automatically.
    Network(String),
    /// Rejected input; nothing was applied.
    Validation(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    /// The edge or row already exists. Treated as success by the protocol.
    Conflict(String),
    Invitation(RedeemFailure),
    Server(String),
    Protocol(String),
}

impl ClientError {
    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Network(_) => {
                "Network error. Please check your connection and try again.".to_string()
            }
            ClientError::Validation(msg)
            | ClientError::Unauthorized(msg)
            | ClientError::Forbidden(msg)
            | ClientError::NotFound(msg)
            | ClientError::Conflict(msg)
            | ClientError::Server(msg) => msg.clone(),
            ClientError::Invitation(reason) => reason.message().to_string(),
            ClientError::Protocol(_) => "An unexpected error occurred".to_string(),
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Network(e) => write!(f, "network error: {e}"),
            ClientError::Validation(e) => write!(f, "validation error: {e}"),
            ClientError::Unauthorized(e) => write!(f, "unauthorized: {e}"),
            ClientError::Forbidden(e) => write!(f, "forbidden: {e}"),
            ClientError::NotFound(e) => write!(f, "not found: {e}"),
            ClientError::Conflict(e) => write!(f, "conflict: {e}"),
            ClientError::Invitation(reason) => write!(f, "invitation {}", reason.reason()),
            ClientError::Server(e) => write!(f, "server error: {e}"),
            ClientError::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Authoritative request/response operations, performed as one actor.
#[async_trait]
pub trait EngagementBackend: Send + Sync {
    async fn like_status(&self, resource_id: &str) -> Result<LikeStatus, ClientError>;
    async fn like_resource(&self, resource_id: &str) -> Result<LikeCount, ClientError>;
    async fn resource(&self, resource_id: &str) -> Result<ResourceView, ClientError>;

    async fn list_comments(&self, resource_id: &str) -> Result<CommentPage, ClientError>;
    async fn post_comment(
        &self,
        resource_id: &str,
        content: &str,
    ) -> Result<CommentMutation, ClientError>;
    async fn delete_comment(
        &self,
        resource_id: &str,
        comment_id: &str,
    ) -> Result<CommentMutation, ClientError>;

    async fn profile(&self, user_id: &str) -> Result<ProfileView, ClientError>;
    async fn follow(
        &self,
        user_id: &str,
        action: FollowAction,
    ) -> Result<FollowResponse, ClientError>;

    async fn group_status(&self, group_id: &str) -> Result<GroupStatus, ClientError>;
    async fn join_group(&self, group_id: &str) -> Result<MembershipResponse, ClientError>;
    async fn leave_group(&self, group_id: &str) -> Result<MembershipResponse, ClientError>;
    async fn redeem_invitation(&self, code: &str) -> Result<RedeemResponse, ClientError>;

    /// Bytes of a resource's file. Counts as a download.
    async fn fetch_download(&self, resource_id: &str) -> Result<Vec<u8>, ClientError>;
    /// Address of the file-serving endpoint, for navigation-based delivery.
    fn download_url(&self, resource_id: &str) -> String;
}

/// Realtime change notifications.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Open a subscription. When this returns, every change committed later
    /// that matches `filter` will be delivered.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, ClientError>;
}
