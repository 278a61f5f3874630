//! In-process backend: drives the service layer directly against a shared
//! [`AppState`](crate::server::state::AppState), and subscribes straight to
//! its [`FeedHub`]. Used when the engine is embedded next to the server and
//! in tests.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::api::{
    CommentMutation, CommentPage, FollowAction, FollowResponse, GroupStatus, LikeCount,
    LikeStatus, MembershipResponse, ProfileView, RedeemResponse, ResourceView,
};
use crate::client::backend::{ChangeSource, ClientError, EngagementBackend};
use crate::client::subscription::{missed_changes, Subscription, SubscriptionHandle};
use crate::feed::FeedHub;
use crate::model::ChangeFilter;
use crate::server::service::{groups, resources, social, ServiceError};
use crate::server::state::SharedState;
use crate::server::utils::now_secs;

impl From<ServiceError> for ClientError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Unauthenticated => {
                ClientError::Unauthorized("Authentication required".to_string())
            }
            ServiceError::Forbidden(msg) => ClientError::Forbidden(msg),
            ServiceError::NotFound(msg) => ClientError::NotFound(msg),
            ServiceError::BadRequest(msg) => ClientError::Validation(msg),
            ServiceError::Validation(e) => ClientError::Validation(e.message),
            ServiceError::Invitation(reason) => ClientError::Invitation(reason),
            ServiceError::Storage(e) => {
                crate::ulog!("local backend: storage error: {}", e);
                ClientError::Server("An unexpected error occurred".to_string())
            }
        }
    }
}

/// Acts as one actor against shared server state.
#[derive(Clone)]
pub struct LocalBackend {
    state: SharedState,
    actor: String,
}

impl LocalBackend {
    pub fn new(state: SharedState, actor: impl Into<String>) -> Self {
        Self {
            state,
            actor: actor.into(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

#[async_trait]
impl EngagementBackend for LocalBackend {
    async fn like_status(&self, resource_id: &str) -> Result<LikeStatus, ClientError> {
        let st = self.state.lock().await;
        Ok(social::like_status(&st, &self.actor, resource_id)?)
    }

    async fn like_resource(&self, resource_id: &str) -> Result<LikeCount, ClientError> {
        let st = self.state.lock().await;
        Ok(social::like_resource(&st, &self.actor, resource_id, now_secs())?)
    }

    async fn resource(&self, resource_id: &str) -> Result<ResourceView, ClientError> {
        let st = self.state.lock().await;
        Ok(resources::get_resource(&st, &self.actor, resource_id)?)
    }

    async fn list_comments(&self, resource_id: &str) -> Result<CommentPage, ClientError> {
        let st = self.state.lock().await;
        Ok(social::list_comments(&st, &self.actor, resource_id)?)
    }

    async fn post_comment(
        &self,
        resource_id: &str,
        content: &str,
    ) -> Result<CommentMutation, ClientError> {
        let st = self.state.lock().await;
        Ok(social::post_comment(&st, &self.actor, resource_id, content, now_secs())?)
    }

    async fn delete_comment(
        &self,
        resource_id: &str,
        comment_id: &str,
    ) -> Result<CommentMutation, ClientError> {
        let st = self.state.lock().await;
        Ok(social::delete_comment(&st, &self.actor, resource_id, comment_id)?)
    }

    async fn profile(&self, user_id: &str) -> Result<ProfileView, ClientError> {
        let st = self.state.lock().await;
        Ok(social::get_profile(&st, &self.actor, user_id)?)
    }

    async fn follow(
        &self,
        user_id: &str,
        action: FollowAction,
    ) -> Result<FollowResponse, ClientError> {
        let st = self.state.lock().await;
        Ok(social::follow(&st, &self.actor, user_id, action, now_secs())?)
    }

    async fn group_status(&self, group_id: &str) -> Result<GroupStatus, ClientError> {
        let st = self.state.lock().await;
        Ok(groups::group_status(&st, &self.actor, group_id)?)
    }

    async fn join_group(&self, group_id: &str) -> Result<MembershipResponse, ClientError> {
        let st = self.state.lock().await;
        Ok(groups::join_group(&st, &self.actor, group_id, now_secs())?)
    }

    async fn leave_group(&self, group_id: &str) -> Result<MembershipResponse, ClientError> {
        let st = self.state.lock().await;
        Ok(groups::leave_group(&st, &self.actor, group_id)?)
    }

    async fn redeem_invitation(&self, code: &str) -> Result<RedeemResponse, ClientError> {
        let st = self.state.lock().await;
        Ok(groups::redeem_invitation(&st, &self.actor, code, now_secs())?)
    }

    async fn fetch_download(&self, resource_id: &str) -> Result<Vec<u8>, ClientError> {
        let st = self.state.lock().await;
        Ok(resources::download(&st, &self.actor, resource_id)?.data)
    }

    fn download_url(&self, resource_id: &str) -> String {
        format!("/api/resources/{resource_id}/download")
    }
}

/// Change source reading the in-process feed.
#[derive(Clone)]
pub struct LocalChangeSource {
    feed: FeedHub,
}

impl LocalChangeSource {
    pub fn new(feed: FeedHub) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl ChangeSource for LocalChangeSource {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, ClientError> {
        let mut rx = self.feed.subscribe(&filter);
        let (tx, events) = mpsc::unbounded_channel();
        let task_filter = filter.clone();
        let task = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) if task_filter.matches(&event) => event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        crate::ulog!("local feed: {} lagged by {}", task_filter.topic(), n);
                        missed_changes(&task_filter)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        let abort = task.abort_handle();
        Ok(Subscription::new(
            filter,
            events,
            SubscriptionHandle::new(move || abort.abort()),
        ))
    }
}
