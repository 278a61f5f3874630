//! One mounted engagement view: a like button, comment thread, follow
//! button or group membership panel bound to one [`Target`].
//!
//! Mounting opens one change subscription per watched table, then reads
//! the authoritative state. Every change notification triggers a full
//! re-read; payloads are never used as values. Actions go through the
//! optimistic state machine in [`ViewState`] and are reconciled with the
//! counter the server returns. After [`EngagementView::unmount`] nothing
//! touches the state again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::FollowAction;
use crate::client::backend::{ChangeSource, ClientError, EngagementBackend};
use crate::client::subscription::{Subscription, SubscriptionSet};
use crate::client::view::{EngagementSnapshot, Observation, Rejection, Started, ViewState};
use crate::logging::item_id;
use crate::model::{tables, ActionKind, ChangeEvent, CounterKind, EdgeKind, MemberRole, Target};
use crate::validation::{check_length, require_non_empty, COMMENT_MAX_CHARS};

/// How long the like animation stays on, whatever the request outcome.
pub const LIKE_ANIMATION_HOLD: Duration = Duration::from_millis(800);

#[derive(Debug, Clone)]
pub struct EngagementConfig {
    pub animation_hold: Duration,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            animation_hold: LIKE_ANIMATION_HOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Like,
    Follow,
    Unfollow,
    JoinGroup,
    LeaveGroup,
    PostComment(String),
    /// Delete the comment with this id.
    DeleteComment(String),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Like => ActionKind::Like,
            Action::Follow => ActionKind::Follow,
            Action::Unfollow => ActionKind::Unfollow,
            Action::JoinGroup => ActionKind::JoinGroup,
            Action::LeaveGroup => ActionKind::LeaveGroup,
            Action::PostComment(_) => ActionKind::PostComment,
            Action::DeleteComment(_) => ActionKind::DeleteComment,
        }
    }

    fn applies_to(&self, target: &Target) -> bool {
        matches!(
            (self, target),
            (
                Action::Like | Action::PostComment(_) | Action::DeleteComment(_),
                Target::Resource(_)
            ) | (Action::Follow | Action::Unfollow, Target::Profile(_))
                | (Action::JoinGroup | Action::LeaveGroup, Target::StudyGroup(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The server accepted the action and the view was reconciled.
    Applied,
    /// The edge was already in the requested state; no request was made.
    NoOp,
    /// The same action is still in flight; no request was made.
    Busy,
    /// The optimistic change was reverted.
    Failed(ClientError),
    /// The view was unmounted before the action settled.
    Detached,
}

struct Inner {
    target: Target,
    backend: Arc<dyn EngagementBackend>,
    source: Arc<dyn ChangeSource>,
    config: EngagementConfig,
    state: Mutex<ViewState>,
    mounted: AtomicBool,
    snapshots: watch::Sender<EngagementSnapshot>,
    subscriptions: Mutex<SubscriptionSet>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Run `f` against the state and publish the new snapshot, unless the
    /// view is gone.
    fn update<R>(&self, f: impl FnOnce(&mut ViewState) -> R) -> Option<R> {
        if !self.is_mounted() {
            return None;
        }
        let mut state = self.state();
        let result = f(&mut state);
        self.snapshots.send_replace(state.snapshot());
        Some(result)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.listeners.get_mut().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }
}

/// Which authoritative read refreshes which part of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Read {
    Resource,
    LikeStatus,
    Comments,
    Group,
    Profile,
}

fn reads_for(target: &Target) -> &'static [Read] {
    match target {
        Target::Resource(_) => &[Read::Resource, Read::Comments],
        Target::StudyGroup(_) => &[Read::Group],
        Target::Profile(_) => &[Read::Profile],
    }
}

fn reads_for_event(target: &Target, event: &ChangeEvent) -> &'static [Read] {
    match event.table.as_str() {
        tables::RESOURCE_LIKES => &[Read::LikeStatus],
        tables::RESOURCE_COMMENTS => &[Read::Comments],
        _ => reads_for(target),
    }
}

#[derive(Clone)]
pub struct EngagementView {
    inner: Arc<Inner>,
}

impl EngagementView {
    /// Open the subscriptions for `target`, then load its state. A
    /// subscription that fails to open degrades to a no-op; a failed
    /// initial read is logged and the view starts empty.
    pub async fn mount(
        target: Target,
        backend: Arc<dyn EngagementBackend>,
        source: Arc<dyn ChangeSource>,
        config: EngagementConfig,
    ) -> EngagementView {
        let state = ViewState::new(target.clone());
        let (snapshots, _) = watch::channel(state.snapshot());
        let inner = Arc::new(Inner {
            target: target.clone(),
            backend,
            source,
            config,
            state: Mutex::new(state),
            mounted: AtomicBool::new(true),
            snapshots,
            subscriptions: Mutex::new(SubscriptionSet::new()),
            listeners: Mutex::new(Vec::new()),
        });

        for filter in target.watch_filters() {
            let sub = match inner.source.subscribe(filter.clone()).await {
                Ok(sub) => sub,
                Err(e) => {
                    crate::ulog!("engagement: subscribe to {} failed: {}", filter.topic(), e);
                    Subscription::degraded(filter)
                }
            };
            let Subscription { events, handle, .. } = sub;
            inner
                .subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
            let task = tokio::spawn(listen(Arc::downgrade(&inner), events));
            inner
                .listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(task);
        }

        let view = EngagementView { inner };
        if let Err(e) = view.refresh().await {
            crate::ulog!("engagement: initial load of {} failed: {}", view.inner.target, e);
        }
        view
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted()
    }

    pub fn snapshot(&self) -> EngagementSnapshot {
        self.inner.state().snapshot()
    }

    /// Receiver of every published snapshot.
    pub fn watch(&self) -> watch::Receiver<EngagementSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Re-read everything the view shows.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        refresh_reads(&self.inner, reads_for(&self.inner.target)).await
    }

    /// Perform `action` optimistically and reconcile with the server.
    pub async fn act(&self, action: Action) -> MutationOutcome {
        let inner = &self.inner;
        if !inner.is_mounted() {
            return MutationOutcome::Detached;
        }
        if !action.applies_to(&inner.target) {
            return MutationOutcome::Failed(ClientError::Validation(format!(
                "{} is not available on a {}",
                action.kind().as_str(),
                inner.target
            )));
        }

        let action = match action {
            Action::PostComment(content) => {
                let content = content.trim().to_string();
                let checked = require_non_empty("content", "Comment", &content)
                    .and_then(|_| check_length("content", "Comment", &content, COMMENT_MAX_CHARS));
                if let Err(e) = checked {
                    return MutationOutcome::Failed(ClientError::Validation(e.to_string()));
                }
                Action::PostComment(content)
            }
            other => other,
        };

        let kind = action.kind();
        let comment_id = match &action {
            Action::DeleteComment(id) => Some(id.as_str()),
            _ => None,
        };
        let started = match inner.update(|s| s.begin_action(kind, comment_id)) {
            None => return MutationOutcome::Detached,
            Some(Err(Rejection::AlreadyApplied)) => return MutationOutcome::NoOp,
            Some(Err(Rejection::Busy)) => return MutationOutcome::Busy,
            Some(Ok(started)) => started,
        };
        let mut unsettled = Unsettled {
            inner,
            started: Some(started),
        };

        if kind == ActionKind::Like {
            let weak = Arc::downgrade(inner);
            let hold = inner.config.animation_hold;
            tokio::spawn(async move {
                tokio::time::sleep(hold).await;
                if let Some(inner) = weak.upgrade() {
                    inner.update(|s| s.stop_animation());
                }
            });
        }

        let result = perform(inner, &action).await;
        let Some(started) = unsettled.started.take() else {
            return MutationOutcome::Detached;
        };
        if !inner.is_mounted() {
            return MutationOutcome::Detached;
        }
        self.settle(started, result).await
    }

    async fn settle(
        &self,
        started: Started,
        result: Result<Observation, ClientError>,
    ) -> MutationOutcome {
        let inner = &self.inner;
        let kind = started.kind;
        match result {
            Ok(obs) => {
                let fresh = inner.update(|s| s.settle_success(started, Some(obs)));
                let comment_action =
                    matches!(kind, ActionKind::PostComment | ActionKind::DeleteComment);
                if fresh == Some(false) || comment_action {
                    let reads: &[Read] = if comment_action {
                        &[Read::Comments]
                    } else {
                        reads_for(&inner.target)
                    };
                    if let Err(e) = refresh_reads(inner, reads).await {
                        crate::ulog!(
                            "engagement: re-read after {} on {} failed: {}",
                            kind.as_str(),
                            inner.target,
                            e
                        );
                    }
                }
                MutationOutcome::Applied
            }
            Err(ClientError::Conflict(msg)) => {
                crate::ulog!(
                    "engagement: {} on {} already applied ({})",
                    kind.as_str(),
                    inner.target,
                    msg
                );
                inner.update(|s| s.settle_success(started, None));
                if let Err(e) = self.refresh().await {
                    crate::ulog!(
                        "engagement: refresh after {} conflict on {} failed: {}",
                        kind.as_str(),
                        inner.target,
                        e
                    );
                }
                MutationOutcome::Applied
            }
            Err(e) => {
                crate::ulog!("engagement: {} on {} failed: {}", kind.as_str(), inner.target, e);
                inner.update(|s| s.settle_failure(started, e.user_message()));
                MutationOutcome::Failed(e)
            }
        }
    }

    /// Close every subscription and stop applying results. Idempotent.
    pub fn unmount(&self) {
        let inner = &self.inner;
        if !inner.mounted.swap(false, Ordering::AcqRel) {
            return;
        }
        inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close_all();
        for task in inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
    }

    pub fn clear_error(&self) {
        self.inner.update(|s| s.clear_error());
    }
}

/// An action whose request was issued but not yet settled. Dropping it
/// unsettled (the `act` future was cancelled) withdraws the optimistic delta
/// and schedules a re-read, since the request may or may not have landed.
struct Unsettled<'a> {
    inner: &'a Arc<Inner>,
    started: Option<Started>,
}

impl Drop for Unsettled<'_> {
    fn drop(&mut self) {
        let Some(started) = self.started.take() else {
            return;
        };
        let inner = self.inner;
        if inner.update(|s| s.abandon(started)).is_none() {
            return;
        }
        crate::ulog!(
            "engagement: {} on {} cancelled before it settled",
            started.kind.as_str(),
            inner.target
        );
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = Arc::downgrade(inner);
        runtime.spawn(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Err(e) = refresh_reads(&inner, reads_for(&inner.target)).await {
                crate::ulog!("engagement: re-read after cancel on {} failed: {}", inner.target, e);
            }
        });
    }
}

async fn listen(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
    while let Some(event) = events.recv().await {
        // Coalesce a burst into one re-read.
        let mut latest = event;
        while let Ok(next) = events.try_recv() {
            latest = next;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.is_mounted() {
            break;
        }
        let reads = reads_for_event(&inner.target, &latest);
        if let Err(e) = refresh_reads(&inner, reads).await {
            crate::ulog!(
                "engagement: re-read after {} change #{} failed: {}",
                latest.table,
                latest.sequence,
                e
            );
        }
    }
    if let Some(inner) = inner.upgrade().filter(|i| i.is_mounted()) {
        crate::ulog!("engagement: change stream for {} ended while mounted", inner.target);
    }
}

async fn refresh_reads(inner: &Inner, reads: &[Read]) -> Result<(), ClientError> {
    let mut first_error = None;
    for read in reads {
        let Some(ticket) = inner.update(|s| s.begin_read()) else {
            return Ok(());
        };
        match fetch(inner, *read).await {
            Ok(obs) => {
                inner.update(|s| s.apply(ticket, obs));
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn fetch(inner: &Inner, read: Read) -> Result<Observation, ClientError> {
    let backend = &inner.backend;
    let id = inner.target.id();
    let obs = Observation::default();
    Ok(match read {
        Read::Resource => {
            let r = backend.resource(id).await?;
            obs.counter(CounterKind::Likes, r.like_count)
                .counter(CounterKind::Comments, r.comment_count)
                .counter(CounterKind::Downloads, r.download_count)
                .edge(EdgeKind::Like, r.has_liked)
        }
        Read::LikeStatus => {
            let s = backend.like_status(id).await?;
            obs.counter(CounterKind::Likes, s.like_count)
                .edge(EdgeKind::Like, s.has_liked)
        }
        Read::Comments => {
            let page = backend.list_comments(id).await?;
            obs.counter(CounterKind::Comments, page.count)
                .comments(page.comments)
        }
        Read::Group => {
            let g = backend.group_status(id).await?;
            let obs = obs
                .edge(EdgeKind::Membership, g.is_member)
                .role(g.role);
            match g.member_count {
                Some(count) => obs.counter(CounterKind::Members, count),
                None => obs,
            }
        }
        Read::Profile => {
            let p = backend.profile(id).await?;
            obs.counter(CounterKind::Followers, p.follower_count)
                .edge(EdgeKind::Follow, p.is_following)
        }
    })
}

async fn perform(inner: &Inner, action: &Action) -> Result<Observation, ClientError> {
    let backend = &inner.backend;
    let id = inner.target.id();
    crate::ulog!("engagement: {} on {}", action.kind().as_str(), item_id(id));
    let obs = Observation::default();
    Ok(match action {
        Action::Like => {
            let r = backend.like_resource(id).await?;
            obs.counter(CounterKind::Likes, r.like_count)
                .edge(EdgeKind::Like, true)
        }
        Action::Follow | Action::Unfollow => {
            let follow = matches!(action, Action::Follow);
            let verb = if follow {
                FollowAction::Follow
            } else {
                FollowAction::Unfollow
            };
            let r = backend.follow(id, verb).await?;
            obs.counter(CounterKind::Followers, r.follower_count)
                .edge(EdgeKind::Follow, follow)
        }
        Action::JoinGroup => {
            let r = backend.join_group(id).await?;
            obs.counter(CounterKind::Members, r.member_count)
                .edge(EdgeKind::Membership, true)
                .role(Some(MemberRole::Member))
        }
        Action::LeaveGroup => {
            let r = backend.leave_group(id).await?;
            obs.counter(CounterKind::Members, r.member_count)
                .edge(EdgeKind::Membership, false)
        }
        Action::PostComment(content) => {
            let r = backend.post_comment(id, content).await?;
            obs.counter(CounterKind::Comments, r.count)
        }
        Action::DeleteComment(comment_id) => {
            let r = backend.delete_comment(id, comment_id).await?;
            obs.counter(CounterKind::Comments, r.count)
        }
    })
}
