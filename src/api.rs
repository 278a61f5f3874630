//! Request and response bodies of the `/api` routes, shared by the server
//! handlers and the HTTP client. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::model::{Comment, Invitation, MemberRole};
use crate::storage::{NotificationRow, ResourceRow, StudyGroupRow};

/// Header carrying the authenticated actor id, set by the auth gateway.
pub const ACTOR_HEADER: &str = "x-unishare-user";

/// Navigation target after joining a group through an invitation.
pub fn group_view_path(study_group_id: &str) -> String {
    format!("/dashboard/study-groups?view={study_group_id}")
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Likes and comments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeCount {
    pub like_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeStatus {
    pub has_liked: bool,
    pub like_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPage {
    pub comments: Vec<Comment>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCommentRequest {
    pub content: String,
}

/// Response to posting or deleting a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentMutation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<Comment>,
    pub count: u64,
}

// ---------------------------------------------------------------------------
// Profiles and follows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowAction {
    Follow,
    Unfollow,
}

impl FollowAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FollowAction::Follow => "follow",
            FollowAction::Unfollow => "unfollow",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowRequest {
    pub action: FollowAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<FollowAction>,
    pub message: String,
    pub follower_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub university_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub university_id: Option<String>,
    pub follower_count: u64,
    pub following_count: u64,
    pub is_following: bool,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub resource_type: String,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub external_link: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResourceRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub resource_type: String,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub external_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub description: Option<String>,
    pub resource_type: String,
    pub course_code: Option<String>,
    pub external_link: Option<String>,
    pub has_file: bool,
    pub is_public: bool,
    pub thumbnail_url: Option<String>,
    pub like_count: u64,
    pub comment_count: u64,
    pub download_count: u64,
    pub has_liked: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ResourceView {
    pub fn from_row(row: &ResourceRow, like_count: u64, has_liked: bool) -> Self {
        Self {
            id: row.id.clone(),
            author_id: row.author_id.clone(),
            title: row.title.clone(),
            description: row.description.clone(),
            resource_type: row.resource_type.clone(),
            course_code: row.course_code.clone(),
            external_link: row.external_link.clone(),
            has_file: row.file_name.is_some(),
            is_public: row.is_public,
            thumbnail_url: row.thumbnail_url.clone(),
            like_count,
            comment_count: row.comment_count,
            download_count: row.download_count,
            has_liked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResourceResponse {
    pub success: bool,
    pub thumbnail_regenerating: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

// ---------------------------------------------------------------------------
// Study groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

/// A study group as seen by one actor. `member_count` is withheld from
/// non-members of private groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatus {
    pub study_group_id: String,
    pub name: String,
    pub description: Option<String>,
    pub course_code: Option<String>,
    pub creator_id: String,
    pub is_private: bool,
    pub is_member: bool,
    pub role: Option<MemberRole>,
    pub member_count: Option<u64>,
}

impl GroupStatus {
    pub fn for_actor(row: &StudyGroupRow, role: Option<MemberRole>) -> Self {
        let is_member = role.is_some();
        Self {
            study_group_id: row.id.clone(),
            name: row.name.clone(),
            description: row.description.clone(),
            course_code: row.course_code.clone(),
            creator_id: row.creator_id.clone(),
            is_private: row.is_private,
            is_member,
            role,
            member_count: (is_member || !row.is_private).then_some(row.member_count),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupList {
    pub study_groups: Vec<GroupStatus>,
    pub my_study_groups: Vec<GroupStatus>,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipResponse {
    pub success: bool,
    pub message: String,
    pub member_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: MemberRole,
}

// ---------------------------------------------------------------------------
// Invitations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationRequest {
    pub study_group_id: String,
    #[serde(default)]
    pub expires_in_hours: Option<u64>,
    #[serde(default)]
    pub max_uses: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationList {
    pub invitations: Vec<Invitation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub study_group_id: String,
    pub message: String,
    #[serde(default)]
    pub already_member: bool,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: i64,
    pub actor_id: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: u64,
}

impl From<NotificationRow> for NotificationView {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            actor_id: row.actor_id,
            notification_type: row.notification_type,
            title: row.title,
            message: row.message,
            link: row.link,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_row(is_private: bool) -> StudyGroupRow {
        StudyGroupRow {
            id: "g1".to_string(),
            name: "Algebra".to_string(),
            description: None,
            course_code: None,
            creator_id: "alice".to_string(),
            is_private,
            university_id: None,
            member_count: 4,
            created_at: 0,
        }
    }

    #[test]
    fn private_group_hides_count_from_non_members() {
        assert_eq!(GroupStatus::for_actor(&group_row(true), None).member_count, None);
        assert_eq!(
            GroupStatus::for_actor(&group_row(true), Some(MemberRole::Member)).member_count,
            Some(4)
        );
        assert_eq!(GroupStatus::for_actor(&group_row(false), None).member_count, Some(4));
    }

    #[test]
    fn wire_names_are_camel_case() {
        let json = serde_json::to_value(LikeStatus {
            has_liked: true,
            like_count: 3,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"hasLiked": true, "likeCount": 3}));

        let follow: FollowRequest = serde_json::from_str(r#"{"action":"unfollow"}"#).unwrap();
        assert_eq!(follow.action, FollowAction::Unfollow);
        assert_eq!(group_view_path("g1"), "/dashboard/study-groups?view=g1");
    }
}
