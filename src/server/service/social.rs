//! Likes, comments, follows, profiles and notifications.

use crate::api::{
    CommentMutation, CommentPage, FollowAction, FollowResponse, LikeCount, LikeStatus,
    NotificationView, ProfileRequest, ProfileView,
};
use crate::logging::{item_id, user_id};
use crate::model::{tables, ChangeEvent, ChangeKind, Comment};
use crate::server::service::{clean_optional, new_id, publish, ServiceError};
use crate::server::state::AppState;
use crate::storage::{NotificationRow, ResourceRow, StorageError, UserRow};
use crate::validation::{check_length, require_non_empty, validate_comment, USERNAME_MAX_CHARS};

/// A resource the actor is allowed to see. Private resources are visible to
/// their author only; anyone else gets a 404 rather than a hint that the id
/// exists.
pub(crate) fn visible_resource(
    state: &AppState,
    actor: &str,
    resource_id: &str,
) -> Result<ResourceRow, ServiceError> {
    match state.storage.get_resource(resource_id)? {
        Some(row) if row.is_public || row.author_id == actor => Ok(row),
        _ => Err(ServiceError::NotFound("Resource not found".to_string())),
    }
}

fn notify(state: &AppState, row: NotificationRow) {
    match state.storage.insert_notification(&row) {
        Ok(_) => publish(
            state,
            ChangeEvent::new(tables::NOTIFICATIONS, ChangeKind::Insert).key("user_id", &row.user_id),
        ),
        Err(e) => crate::ulog!(
            "notifications: failed to notify {}: {}",
            user_id(&row.user_id),
            e
        ),
    }
}

// ---------------------------------------------------------------------------
// Likes
// ---------------------------------------------------------------------------

/// Like a resource. Liking twice is not an error; the count is recomputed
/// either way.
pub fn like_resource(
    state: &AppState,
    actor: &str,
    resource_id: &str,
    now: u64,
) -> Result<LikeCount, ServiceError> {
    visible_resource(state, actor, resource_id)?;
    let inserted = state.storage.insert_like(resource_id, actor, now)?;
    if inserted {
        publish(
            state,
            ChangeEvent::new(tables::RESOURCE_LIKES, ChangeKind::Insert)
                .key("resource_id", resource_id)
                .key("user_id", actor),
        );
        crate::ulog!("likes: {} liked {}", user_id(actor), item_id(resource_id));
    }
    Ok(LikeCount {
        like_count: state.storage.count_likes(resource_id)?,
    })
}

pub fn like_status(
    state: &AppState,
    actor: &str,
    resource_id: &str,
) -> Result<LikeStatus, ServiceError> {
    visible_resource(state, actor, resource_id)?;
    Ok(LikeStatus {
        has_liked: state.storage.has_liked(resource_id, actor)?,
        like_count: state.storage.count_likes(resource_id)?,
    })
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

pub fn list_comments(
    state: &AppState,
    actor: &str,
    resource_id: &str,
) -> Result<CommentPage, ServiceError> {
    let resource = visible_resource(state, actor, resource_id)?;
    let comments = state.storage.list_comments(resource_id)?;
    Ok(CommentPage {
        comments,
        count: resource.comment_count,
    })
}

pub fn post_comment(
    state: &AppState,
    actor: &str,
    resource_id: &str,
    content: &str,
    now: u64,
) -> Result<CommentMutation, ServiceError> {
    let resource = visible_resource(state, actor, resource_id)?;
    let content = validate_comment(&state.filter, content)?;

    let mut comment = Comment {
        id: new_id(),
        resource_id: resource_id.to_string(),
        user_id: actor.to_string(),
        author_name: None,
        content,
        created_at: now,
    };
    let count = state.storage.insert_comment(&comment)?;
    comment.author_name = state.storage.get_user(actor)?.map(|u| u.username);

    publish(
        state,
        ChangeEvent::new(tables::RESOURCE_COMMENTS, ChangeKind::Insert)
            .key("resource_id", resource_id)
            .key("id", &comment.id),
    );
    publish(
        state,
        ChangeEvent::new(tables::RESOURCES, ChangeKind::Update).key("id", resource_id),
    );
    crate::ulog!(
        "comments: {} commented on {} (count {})",
        user_id(actor),
        item_id(resource_id),
        count
    );

    if resource.author_id != actor {
        let who = comment.author_name.as_deref().unwrap_or("someone");
        notify(
            state,
            NotificationRow {
                id: 0,
                user_id: resource.author_id.clone(),
                actor_id: Some(actor.to_string()),
                notification_type: "comment".to_string(),
                title: "New Comment".to_string(),
                message: format!("@{who} commented on \"{}\"", resource.title),
                link: Some(format!("/dashboard/resources?view={resource_id}")),
                is_read: false,
                created_at: now,
            },
        );
    }

    Ok(CommentMutation {
        comment: Some(comment),
        count,
    })
}

/// Delete a comment. Allowed for the comment's author and for the author of
/// the resource it belongs to.
pub fn delete_comment(
    state: &AppState,
    actor: &str,
    resource_id: &str,
    comment_id: &str,
) -> Result<CommentMutation, ServiceError> {
    let resource = visible_resource(state, actor, resource_id)?;
    let comment = match state.storage.get_comment(comment_id)? {
        Some(c) if c.resource_id == resource_id => c,
        _ => return Err(ServiceError::NotFound("Comment not found".to_string())),
    };
    if comment.user_id != actor && resource.author_id != actor {
        return Err(ServiceError::Forbidden(
            "You are not authorized to delete this comment".to_string(),
        ));
    }

    let count = state
        .storage
        .delete_comment(comment_id)?
        .ok_or_else(|| ServiceError::NotFound("Comment not found".to_string()))?;
    publish(
        state,
        ChangeEvent::new(tables::RESOURCE_COMMENTS, ChangeKind::Delete)
            .key("resource_id", resource_id)
            .key("id", comment_id),
    );
    publish(
        state,
        ChangeEvent::new(tables::RESOURCES, ChangeKind::Update).key("id", resource_id),
    );
    crate::ulog!(
        "comments: {} deleted a comment on {} (count {})",
        user_id(actor),
        item_id(resource_id),
        count
    );
    Ok(CommentMutation {
        comment: None,
        count,
    })
}

// ---------------------------------------------------------------------------
// Profiles and follows
// ---------------------------------------------------------------------------

pub fn upsert_profile(
    state: &AppState,
    actor: &str,
    req: ProfileRequest,
    now: u64,
) -> Result<ProfileView, ServiceError> {
    let username = req.username.trim().to_string();
    require_non_empty("username", "Username", &username)?;
    check_length("username", "Username", &username, USERNAME_MAX_CHARS)?;
    state.filter.check("username", "Username", &username)?;

    let existing = state.storage.get_user(actor)?;
    let row = UserRow {
        id: actor.to_string(),
        username,
        full_name: clean_optional(req.full_name),
        university_id: clean_optional(req.university_id),
        follower_count: 0,
        following_count: 0,
        created_at: existing.map(|u| u.created_at).unwrap_or(now),
    };
    match state.storage.upsert_user(&row) {
        Ok(()) => {}
        Err(StorageError::AlreadyExists(_)) => {
            return Err(ServiceError::BadRequest(
                "That username is already taken".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    }
    get_profile(state, actor, actor)
}

pub fn get_profile(
    state: &AppState,
    actor: &str,
    target: &str,
) -> Result<ProfileView, ServiceError> {
    let user = state
        .storage
        .get_user(target)?
        .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;
    let is_following = actor != target && state.storage.is_following(target, actor)?;
    Ok(ProfileView {
        id: user.id,
        username: user.username,
        full_name: user.full_name,
        university_id: user.university_id,
        follower_count: user.follower_count,
        following_count: user.following_count,
        is_following,
    })
}

fn display_name(user: &UserRow) -> &str {
    if !user.username.is_empty() {
        &user.username
    } else {
        user.full_name.as_deref().unwrap_or("this user")
    }
}

/// Follow or unfollow `target`. Repeating either action is a success that
/// changes nothing. At most one "New Follower" notification is ever created
/// per (follower, followed) pair.
pub fn follow(
    state: &AppState,
    actor: &str,
    target: &str,
    action: FollowAction,
    now: u64,
) -> Result<FollowResponse, ServiceError> {
    if actor == target {
        return Err(ServiceError::BadRequest(
            "You cannot follow yourself".to_string(),
        ));
    }
    let target_user = state
        .storage
        .get_user(target)?
        .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;
    let name = display_name(&target_user).to_string();

    let message = match action {
        FollowAction::Follow => {
            if state.storage.insert_follow(target, actor, now)? {
                publish(
                    state,
                    ChangeEvent::new(tables::USER_FOLLOWERS, ChangeKind::Insert)
                        .key("user_id", target)
                        .key("follower_id", actor),
                );
                crate::ulog!("follows: {} followed {}", user_id(actor), user_id(target));
                if !state.storage.has_notification(target, actor, "follow")? {
                    let follower = state
                        .storage
                        .get_user(actor)?
                        .map(|u| u.username)
                        .unwrap_or_else(|| "someone".to_string());
                    notify(
                        state,
                        NotificationRow {
                            id: 0,
                            user_id: target.to_string(),
                            actor_id: Some(actor.to_string()),
                            notification_type: "follow".to_string(),
                            title: "New Follower".to_string(),
                            message: format!("User @{follower} started following you"),
                            link: Some(format!("/u/{follower}")),
                            is_read: false,
                            created_at: now,
                        },
                    );
                }
                format!("You are now following {name}")
            } else {
                "Already following this user".to_string()
            }
        }
        FollowAction::Unfollow => {
            if state.storage.delete_follow(target, actor)? {
                publish(
                    state,
                    ChangeEvent::new(tables::USER_FOLLOWERS, ChangeKind::Delete)
                        .key("user_id", target)
                        .key("follower_id", actor),
                );
                crate::ulog!("follows: {} unfollowed {}", user_id(actor), user_id(target));
            }
            format!("You have unfollowed {name}")
        }
    };

    let follower_count = state
        .storage
        .get_user(target)?
        .map(|u| u.follower_count)
        .unwrap_or(0);
    Ok(FollowResponse {
        success: true,
        action: Some(action),
        message,
        follower_count,
    })
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub fn list_notifications(
    state: &AppState,
    actor: &str,
    unread_only: bool,
    limit: u32,
) -> Result<Vec<NotificationView>, ServiceError> {
    let rows = state.storage.list_notifications(actor, unread_only, limit)?;
    Ok(rows.into_iter().map(NotificationView::from).collect())
}

pub fn count_unread(state: &AppState, actor: &str) -> Result<u64, ServiceError> {
    Ok(state.storage.count_unread_notifications(actor)?)
}

pub fn mark_read(state: &AppState, actor: &str, id: i64) -> Result<(), ServiceError> {
    if state.storage.mark_notification_read(actor, id)? {
        publish(
            state,
            ChangeEvent::new(tables::NOTIFICATIONS, ChangeKind::Update).key("user_id", actor),
        );
        Ok(())
    } else {
        Err(ServiceError::NotFound("Notification not found".to_string()))
    }
}

pub fn mark_all_read(state: &AppState, actor: &str) -> Result<u64, ServiceError> {
    let count = state.storage.mark_all_notifications_read(actor)?;
    if count > 0 {
        publish(
            state,
            ChangeEvent::new(tables::NOTIFICATIONS, ChangeKind::Update).key("user_id", actor),
        );
    }
    Ok(count)
}
