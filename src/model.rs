//! Domain types shared by the store, the HTTP service and the engagement
//! client: engagement targets, counters, edges, comments, invitations and
//! realtime change events.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Table names published on the realtime change feed.
pub mod tables {
    pub const RESOURCES: &str = "resources";
    pub const RESOURCE_LIKES: &str = "resource_likes";
    pub const RESOURCE_COMMENTS: &str = "resource_comments";
    pub const STUDY_GROUPS: &str = "study_groups";
    pub const STUDY_GROUP_MEMBERS: &str = "study_group_members";
    pub const STUDY_GROUP_INVITATIONS: &str = "study_group_invitations";
    pub const USER_FOLLOWERS: &str = "user_followers";
    pub const NOTIFICATIONS: &str = "notifications";
}

// ---------------------------------------------------------------------------
// Engagement targets and counters
// ---------------------------------------------------------------------------

/// Something an actor can engage with. Resources and study groups are the
/// engaged items proper; profiles are the target of the follow edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    Resource(String),
    StudyGroup(String),
    Profile(String),
}

impl Target {
    pub fn id(&self) -> &str {
        match self {
            Target::Resource(id) | Target::StudyGroup(id) | Target::Profile(id) => id,
        }
    }

    /// Change-feed filters a view of this target keeps open while mounted.
    pub fn watch_filters(&self) -> Vec<ChangeFilter> {
        match self {
            Target::Resource(id) => vec![
                ChangeFilter::new(tables::RESOURCE_LIKES).eq("resource_id", id),
                ChangeFilter::new(tables::RESOURCE_COMMENTS).eq("resource_id", id),
                ChangeFilter::new(tables::RESOURCES)
                    .eq("id", id)
                    .kinds(&[ChangeKind::Update]),
            ],
            Target::StudyGroup(id) => vec![
                ChangeFilter::new(tables::STUDY_GROUP_MEMBERS).eq("study_group_id", id),
                ChangeFilter::new(tables::STUDY_GROUPS)
                    .eq("id", id)
                    .kinds(&[ChangeKind::Update]),
            ],
            Target::Profile(id) => {
                vec![ChangeFilter::new(tables::USER_FOLLOWERS).eq("user_id", id)]
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Resource(id) => write!(f, "resource {id}"),
            Target::StudyGroup(id) => write!(f, "study group {id}"),
            Target::Profile(id) => write!(f, "profile {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Likes,
    Comments,
    Members,
    Downloads,
    Followers,
}

/// Non-negative engagement counters of one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet {
    pub likes: u64,
    pub comments: u64,
    pub members: u64,
    pub downloads: u64,
    pub followers: u64,
}

impl CounterSet {
    pub fn get(&self, kind: CounterKind) -> u64 {
        match kind {
            CounterKind::Likes => self.likes,
            CounterKind::Comments => self.comments,
            CounterKind::Members => self.members,
            CounterKind::Downloads => self.downloads,
            CounterKind::Followers => self.followers,
        }
    }

    pub fn set(&mut self, kind: CounterKind, value: u64) {
        match kind {
            CounterKind::Likes => self.likes = value,
            CounterKind::Comments => self.comments = value,
            CounterKind::Members => self.members = value,
            CounterKind::Downloads => self.downloads = value,
            CounterKind::Followers => self.followers = value,
        }
    }

    /// Apply a signed delta, saturating at zero.
    pub fn offset(&mut self, kind: CounterKind, delta: i64) {
        let current = self.get(kind) as i64;
        self.set(kind, (current + delta).max(0) as u64);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn from_private_flag(is_private: bool) -> Self {
        if is_private {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

/// Uniqueness-constrained relation types: one row per (actor, target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Like,
    Follow,
    Membership,
}

/// State-changing actions an actor performs on a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Like,
    Follow,
    Unfollow,
    JoinGroup,
    LeaveGroup,
    PostComment,
    DeleteComment,
}

impl ActionKind {
    pub fn counter(self) -> CounterKind {
        match self {
            ActionKind::Like => CounterKind::Likes,
            ActionKind::Follow | ActionKind::Unfollow => CounterKind::Followers,
            ActionKind::JoinGroup | ActionKind::LeaveGroup => CounterKind::Members,
            ActionKind::PostComment | ActionKind::DeleteComment => CounterKind::Comments,
        }
    }

    /// Optimistic change to the counter while the request is in flight.
    pub fn delta(self) -> i64 {
        match self {
            ActionKind::Like | ActionKind::Follow | ActionKind::JoinGroup | ActionKind::PostComment => 1,
            ActionKind::Unfollow | ActionKind::LeaveGroup | ActionKind::DeleteComment => -1,
        }
    }

    /// The edge this action creates or removes, if any.
    pub fn edge(self) -> Option<EdgeKind> {
        match self {
            ActionKind::Like => Some(EdgeKind::Like),
            ActionKind::Follow | ActionKind::Unfollow => Some(EdgeKind::Follow),
            ActionKind::JoinGroup | ActionKind::LeaveGroup => Some(EdgeKind::Membership),
            ActionKind::PostComment | ActionKind::DeleteComment => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Like => "like",
            ActionKind::Follow => "follow",
            ActionKind::Unfollow => "unfollow",
            ActionKind::JoinGroup => "join_group",
            ActionKind::LeaveGroup => "leave_group",
            ActionKind::PostComment => "post_comment",
            ActionKind::DeleteComment => "delete_comment",
        }
    }
}

// ---------------------------------------------------------------------------
// Comments, memberships, invitations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub resource_id: String,
    pub user_id: String,
    #[serde(default)]
    pub author_name: Option<String>,
    pub content: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(MemberRole::Admin),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }
}

/// A shareable code granting membership of one study group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub study_group_id: String,
    pub code: String,
    pub created_by: String,
    pub expires_at: Option<u64>,
    pub max_uses: Option<u32>,
    pub current_uses: u32,
    pub created_at: u64,
}

impl Invitation {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.current_uses >= max)
    }

    pub fn is_usable(&self, now: u64) -> bool {
        !self.is_expired(now) && !self.is_exhausted()
    }
}

/// Why an invitation code could not be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeemFailure {
    NotFound,
    Expired,
    Exhausted,
}

impl RedeemFailure {
    pub fn reason(self) -> &'static str {
        match self {
            RedeemFailure::NotFound => "not_found",
            RedeemFailure::Expired => "expired",
            RedeemFailure::Exhausted => "exhausted",
        }
    }

    pub fn from_reason(reason: &str) -> Option<Self> {
        match reason {
            "not_found" => Some(RedeemFailure::NotFound),
            "expired" => Some(RedeemFailure::Expired),
            "exhausted" => Some(RedeemFailure::Exhausted),
            _ => None,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            RedeemFailure::NotFound => "Invalid invitation code",
            RedeemFailure::Expired => "This invitation has expired",
            RedeemFailure::Exhausted => "This invitation has reached its maximum number of uses",
        }
    }
}

impl fmt::Display for RedeemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

// ---------------------------------------------------------------------------
// Realtime change feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Some(ChangeKind::Insert),
            "update" => Some(ChangeKind::Update),
            "delete" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// A row changed. Only key columns are carried: subscribers treat the event
/// as a signal to re-read, never as the new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub keys: BTreeMap<String, String>,
    #[serde(default)]
    pub sequence: u64,
}

impl ChangeEvent {
    pub fn new(table: &str, kind: ChangeKind) -> Self {
        Self {
            table: table.to_string(),
            kind,
            keys: BTreeMap::new(),
            sequence: 0,
        }
    }

    pub fn key(mut self, column: &str, value: &str) -> Self {
        self.keys.insert(column.to_string(), value.to_string());
        self
    }
}

/// Subscription filter: one table, optionally one `column = value`
/// equality, optionally restricted to some change kinds (empty = all).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub table: String,
    pub column: Option<String>,
    pub value: Option<String>,
    #[serde(default)]
    pub kinds: Vec<ChangeKind>,
}

impl ChangeFilter {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            column: None,
            value: None,
            kinds: Vec::new(),
        }
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.column = Some(column.to_string());
        self.value = Some(value.to_string());
        self
    }

    pub fn kinds(mut self, kinds: &[ChangeKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn accepts_kind(&self, kind: ChangeKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.accepts_kind(event.kind) {
            return false;
        }
        match (&self.column, &self.value) {
            (Some(column), Some(value)) => event.keys.get(column) == Some(value),
            _ => true,
        }
    }

    /// Broadcast topic this filter listens on.
    pub fn topic(&self) -> String {
        match (&self.column, &self.value) {
            (Some(column), Some(value)) => topic_for(&self.table, Some((column, value))),
            _ => topic_for(&self.table, None),
        }
    }
}

/// Topic naming shared by publishers and subscribers.
pub fn topic_for(table: &str, key: Option<(&str, &str)>) -> String {
    match key {
        Some((column, value)) => format!("{table}:{column}=eq.{value}"),
        None => table.to_string(),
    }
}
