//! Engagement protocol tests against the in-process backend.
//!
//! Views are driven through `LocalBackend`, wrapped in an instrumented
//! backend that counts requests, can hold likes and redemptions at a gate
//! and can fail likes on demand.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use unishare::api::{
    CommentMutation, CommentPage, CreateGroupRequest, CreateInvitationRequest,
    CreateResourceRequest, FollowAction, FollowResponse, GroupStatus, LikeCount, LikeStatus,
    MembershipResponse, ProfileRequest, ProfileView, RedeemResponse, ResourceView,
};
use unishare::client::{
    Action, ClientError, EngagementBackend, EngagementConfig, EngagementSnapshot, EngagementView,
    InvitationRedeemer, LocalBackend, LocalChangeSource, MutationOutcome, RedeemError, Redeemed,
};
use unishare::model::{RedeemFailure, Target};
use unishare::server::service::{groups, resources, social};
use unishare::server::state::{AppState, SharedState};
use unishare::storage::Storage;
use unishare::validation::WordFilter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Fixture {
    state: SharedState,
    source: Arc<LocalChangeSource>,
    _dir: tempfile::TempDir,
}

async fn fixture(users: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open_in_memory(&dir.path().join("files")).unwrap();
    let app = AppState::new(storage, WordFilter::default(), None);
    let source = Arc::new(LocalChangeSource::new(app.feed.clone()));
    let state = app.into_shared();
    {
        let st = state.lock().await;
        for user in users {
            social::upsert_profile(
                &st,
                user,
                ProfileRequest {
                    username: user.to_string(),
                    full_name: None,
                    university_id: Some("uni-1".to_string()),
                },
                1,
            )
            .unwrap();
        }
    }
    Fixture {
        state,
        source,
        _dir: dir,
    }
}

impl Fixture {
    async fn resource(&self, author: &str) -> String {
        let st = self.state.lock().await;
        let (view, _) = resources::create_resource(
            &st,
            author,
            CreateResourceRequest {
                title: "Past papers".to_string(),
                description: None,
                resource_type: "notes".to_string(),
                course_code: None,
                external_link: None,
                is_public: true,
            },
            1,
        )
        .unwrap();
        view.id
    }

    async fn group(&self, creator: &str, is_private: bool) -> String {
        let st = self.state.lock().await;
        groups::create_group(
            &st,
            creator,
            CreateGroupRequest {
                name: "Linear algebra".to_string(),
                description: None,
                course_code: None,
                is_private,
            },
            1,
        )
        .unwrap()
        .study_group_id
    }

    async fn like_as(&self, actor: &str, resource_id: &str) {
        let st = self.state.lock().await;
        social::like_resource(&st, actor, resource_id, 2).unwrap();
    }

    fn backend(&self, actor: &str) -> Arc<Instrumented> {
        Arc::new(Instrumented::new(LocalBackend::new(self.state.clone(), actor)))
    }

    async fn mount(&self, target: Target, backend: Arc<Instrumented>) -> EngagementView {
        EngagementView::mount(
            target,
            backend,
            self.source.clone(),
            EngagementConfig {
                animation_hold: Duration::from_millis(20),
            },
        )
        .await
    }
}

async fn converge(view: &EngagementView, done: impl FnMut(&EngagementSnapshot) -> bool) {
    let mut rx = view.watch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(done))
        .await
        .expect("view did not converge")
        .unwrap();
}

/// Wrapper counting likes and redemptions; can gate both, fail or conflict
/// likes and fail resource reads.
struct Instrumented {
    inner: LocalBackend,
    like_calls: AtomicUsize,
    redeem_calls: AtomicUsize,
    fail_likes: AtomicBool,
    conflict_likes: AtomicBool,
    fail_reads: AtomicBool,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Instrumented {
    /// Park the request until released, if gating is on.
    async fn hold(&self) {
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    fn read_gate(&self) -> Result<(), ClientError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ClientError::Network("read timed out".to_string()));
        }
        Ok(())
    }

    fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            like_calls: AtomicUsize::new(0),
            redeem_calls: AtomicUsize::new(0),
            fail_likes: AtomicBool::new(false),
            conflict_likes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl EngagementBackend for Instrumented {
    async fn like_status(&self, id: &str) -> Result<LikeStatus, ClientError> {
        self.read_gate()?;
        self.inner.like_status(id).await
    }
    async fn like_resource(&self, id: &str) -> Result<LikeCount, ClientError> {
        self.like_calls.fetch_add(1, Ordering::SeqCst);
        self.hold().await;
        if self.fail_likes.load(Ordering::SeqCst) {
            return Err(ClientError::Network("connection reset".to_string()));
        }
        if self.conflict_likes.load(Ordering::SeqCst) {
            return Err(ClientError::Conflict("already liked".to_string()));
        }
        self.inner.like_resource(id).await
    }
    async fn resource(&self, id: &str) -> Result<ResourceView, ClientError> {
        self.read_gate()?;
        self.inner.resource(id).await
    }
    async fn list_comments(&self, id: &str) -> Result<CommentPage, ClientError> {
        self.read_gate()?;
        self.inner.list_comments(id).await
    }
    async fn post_comment(&self, id: &str, content: &str) -> Result<CommentMutation, ClientError> {
        self.inner.post_comment(id, content).await
    }
    async fn delete_comment(&self, id: &str, comment: &str) -> Result<CommentMutation, ClientError> {
        self.inner.delete_comment(id, comment).await
    }
    async fn profile(&self, id: &str) -> Result<ProfileView, ClientError> {
        self.inner.profile(id).await
    }
    async fn follow(&self, id: &str, action: FollowAction) -> Result<FollowResponse, ClientError> {
        self.inner.follow(id, action).await
    }
    async fn group_status(&self, id: &str) -> Result<GroupStatus, ClientError> {
        self.inner.group_status(id).await
    }
    async fn join_group(&self, id: &str) -> Result<MembershipResponse, ClientError> {
        self.inner.join_group(id).await
    }
    async fn leave_group(&self, id: &str) -> Result<MembershipResponse, ClientError> {
        self.inner.leave_group(id).await
    }
    async fn redeem_invitation(&self, code: &str) -> Result<RedeemResponse, ClientError> {
        self.redeem_calls.fetch_add(1, Ordering::SeqCst);
        self.hold().await;
        self.inner.redeem_invitation(code).await
    }
    async fn fetch_download(&self, id: &str) -> Result<Vec<u8>, ClientError> {
        self.inner.fetch_download(id).await
    }
    fn download_url(&self, id: &str) -> String {
        self.inner.download_url(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_observers_converge_after_interleaved_likes() {
    let users = ["author", "u1", "u2", "u3", "u4", "u5", "p", "q"];
    let fx = fixture(&users).await;
    let id = fx.resource("author").await;
    for user in &users[1..6] {
        fx.like_as(user, &id).await;
    }

    let target = Target::Resource(id.clone());
    let p = fx.mount(target.clone(), fx.backend("p")).await;
    let q = fx.mount(target.clone(), fx.backend("q")).await;
    assert_eq!(p.snapshot().counters.likes, 5);
    assert_eq!(q.snapshot().counters.likes, 5);

    let (a, b) = tokio::join!(p.act(Action::Like), q.act(Action::Like));
    assert_eq!(a, MutationOutcome::Applied);
    assert_eq!(b, MutationOutcome::Applied);

    converge(&p, |s| s.counters.likes == 7 && s.in_flight.is_empty()).await;
    converge(&q, |s| s.counters.likes == 7 && s.in_flight.is_empty()).await;
    assert!(p.snapshot().has_liked);
    assert!(q.snapshot().has_liked);

    p.unmount();
    q.unmount();
}

#[tokio::test]
async fn second_like_issues_no_request() {
    let fx = fixture(&["author", "fan"]).await;
    let id = fx.resource("author").await;
    let backend = fx.backend("fan");
    let view = fx.mount(Target::Resource(id), backend.clone()).await;

    assert_eq!(view.act(Action::Like).await, MutationOutcome::Applied);
    let after_first = view.snapshot();
    assert_eq!(view.act(Action::Like).await, MutationOutcome::NoOp);

    assert_eq!(backend.like_calls.load(Ordering::SeqCst), 1);
    assert_eq!(view.snapshot().counters.likes, after_first.counters.likes);
    assert_eq!(after_first.counters.likes, 1);
}

#[tokio::test]
async fn like_while_in_flight_is_busy() {
    let fx = fixture(&["author", "fan"]).await;
    let id = fx.resource("author").await;
    let backend = fx.backend("fan");
    backend.gated.store(true, Ordering::SeqCst);
    let view = fx.mount(Target::Resource(id), backend.clone()).await;

    let first = tokio::spawn({
        let view = view.clone();
        async move { view.act(Action::Like).await }
    });
    backend.entered.notified().await;
    // Precondition already shows liked, but the guard answers first.
    assert_eq!(view.act(Action::Like).await, MutationOutcome::Busy);

    backend.release.notify_one();
    assert_eq!(first.await.unwrap(), MutationOutcome::Applied);
    assert_eq!(backend.like_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unmount_during_request_drops_the_result() {
    let fx = fixture(&["author", "fan"]).await;
    let id = fx.resource("author").await;
    let backend = fx.backend("fan");
    backend.gated.store(true, Ordering::SeqCst);
    let view = fx.mount(Target::Resource(id.clone()), backend.clone()).await;

    let pending = tokio::spawn({
        let view = view.clone();
        async move { view.act(Action::Like).await }
    });
    backend.entered.notified().await;
    view.unmount();
    let frozen = view.snapshot();

    backend.release.notify_one();
    assert_eq!(pending.await.unwrap(), MutationOutcome::Detached);
    // Later changes from elsewhere do not reach the view either.
    fx.like_as("author", &id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(view.snapshot(), frozen);
    assert!(!view.is_mounted());
    view.unmount();

    let st = fx.state.lock().await;
    assert_eq!(st.storage.count_likes(&id).unwrap(), 2);
}

#[tokio::test]
async fn cancelled_like_is_withdrawn_and_the_view_recovers() {
    let users = ["author", "u1", "u2", "u3", "u4", "u5", "fan"];
    let fx = fixture(&users).await;
    let id = fx.resource("author").await;
    for user in &users[1..6] {
        fx.like_as(user, &id).await;
    }
    let backend = fx.backend("fan");
    backend.gated.store(true, Ordering::SeqCst);
    let view = fx.mount(Target::Resource(id.clone()), backend.clone()).await;

    // The caller gives up while the request is parked.
    let gave_up = tokio::time::timeout(Duration::from_millis(20), view.act(Action::Like)).await;
    assert!(gave_up.is_err());

    converge(&view, |s| s.counters.likes == 5 && !s.has_liked && s.in_flight.is_empty()).await;
    assert!(view.snapshot().error.is_none());

    backend.gated.store(false, Ordering::SeqCst);
    assert_eq!(view.act(Action::Like).await, MutationOutcome::Applied);
    let snap = view.snapshot();
    assert_eq!(snap.counters.likes, 6);
    assert!(snap.has_liked);
    assert!(view.is_mounted());
}

#[tokio::test]
async fn cancelled_redemption_frees_the_form() {
    let fx = fixture(&["owner", "carol"]).await;
    let group_id = fx.group("owner", true).await;
    let code = {
        let st = fx.state.lock().await;
        groups::create_invitation(
            &st,
            "owner",
            CreateInvitationRequest {
                study_group_id: group_id.clone(),
                expires_in_hours: None,
                max_uses: None,
            },
            unishare::server::utils::now_secs(),
        )
        .unwrap()
        .code
    };
    let backend = fx.backend("carol");
    backend.gated.store(true, Ordering::SeqCst);
    let redeemer = InvitationRedeemer::new(backend.clone());

    let gave_up = tokio::time::timeout(Duration::from_millis(20), redeemer.redeem(&code)).await;
    assert!(gave_up.is_err());
    assert!(!redeemer.is_busy());

    backend.gated.store(false, Ordering::SeqCst);
    let joined = redeemer.redeem(&code).await.unwrap();
    assert_eq!(joined.study_group_id(), group_id);
    assert!(matches!(joined, Redeemed::Joined { .. }));
}

/// Log sink shared with the test.
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn conflict_with_failed_refresh_is_logged() {
    let fx = fixture(&["author", "fan"]).await;
    let id = fx.resource("author").await;
    let backend = fx.backend("fan");
    let view = fx.mount(Target::Resource(id.clone()), backend.clone()).await;

    let lines = Arc::new(Mutex::new(Vec::new()));
    unishare::logging::set_writer(Box::new(Captured(lines.clone())));
    backend.conflict_likes.store(true, Ordering::SeqCst);
    backend.fail_reads.store(true, Ordering::SeqCst);

    assert_eq!(view.act(Action::Like).await, MutationOutcome::Applied);
    let snap = view.snapshot();
    assert!(snap.has_liked);
    assert!(snap.in_flight.is_empty());

    unishare::logging::set_writer(Box::new(std::io::stderr()));
    let log = String::from_utf8(lines.lock().unwrap().clone()).unwrap();
    assert!(
        log.contains(&format!("refresh after like conflict on resource {id} failed")),
        "missing refresh failure in log:\n{log}"
    );
}

#[tokio::test]
async fn failed_like_reverts_and_reports() {
    let fx = fixture(&["author", "fan"]).await;
    let id = fx.resource("author").await;
    fx.like_as("author", &id).await;
    let backend = fx.backend("fan");
    backend.fail_likes.store(true, Ordering::SeqCst);
    let view = fx.mount(Target::Resource(id), backend).await;

    let outcome = view.act(Action::Like).await;
    assert!(matches!(outcome, MutationOutcome::Failed(ClientError::Network(_))));
    let snap = view.snapshot();
    assert_eq!(snap.counters.likes, 1);
    assert!(!snap.has_liked);
    assert_eq!(
        snap.error.as_deref(),
        Some("Network error. Please check your connection and try again.")
    );
}

#[tokio::test]
async fn follow_counts_reach_other_observers() {
    let fx = fixture(&["alice", "bob", "carol"]).await;
    let target = Target::Profile("alice".to_string());
    let bob = fx.mount(target.clone(), fx.backend("bob")).await;
    let carol = fx.mount(target, fx.backend("carol")).await;

    assert_eq!(bob.act(Action::Follow).await, MutationOutcome::Applied);
    assert_eq!(bob.act(Action::Follow).await, MutationOutcome::NoOp);
    let snap = bob.snapshot();
    assert!(snap.is_following);
    assert_eq!(snap.counters.followers, 1);
    converge(&carol, |s| s.counters.followers == 1 && !s.is_following).await;

    assert_eq!(bob.act(Action::Unfollow).await, MutationOutcome::Applied);
    assert_eq!(bob.snapshot().counters.followers, 0);
    converge(&carol, |s| s.counters.followers == 0).await;
}

#[tokio::test]
async fn private_group_join_is_reverted() {
    let fx = fixture(&["owner", "guest"]).await;
    let public = fx.group("owner", false).await;
    let private = fx.group("owner", true).await;

    let view = fx.mount(Target::StudyGroup(public), fx.backend("guest")).await;
    assert_eq!(view.snapshot().counters.members, 1);
    assert_eq!(view.act(Action::JoinGroup).await, MutationOutcome::Applied);
    let snap = view.snapshot();
    assert!(snap.is_member);
    assert_eq!(snap.counters.members, 2);
    assert_eq!(view.act(Action::LeaveGroup).await, MutationOutcome::Applied);
    assert_eq!(view.snapshot().counters.members, 1);

    let view = fx.mount(Target::StudyGroup(private), fx.backend("guest")).await;
    let outcome = view.act(Action::JoinGroup).await;
    assert!(matches!(outcome, MutationOutcome::Failed(ClientError::Forbidden(_))));
    assert!(!view.snapshot().is_member);
}

#[tokio::test]
async fn comment_thread_stays_in_step() {
    let fx = fixture(&["author", "reader"]).await;
    let id = fx.resource("author").await;
    let target = Target::Resource(id);
    let reader = fx.mount(target.clone(), fx.backend("reader")).await;
    let author = fx.mount(target, fx.backend("author")).await;

    let outcome = reader
        .act(Action::PostComment("Thanks for sharing".to_string()))
        .await;
    assert_eq!(outcome, MutationOutcome::Applied);
    let snap = reader.snapshot();
    assert_eq!(snap.counters.comments, 1);
    assert_eq!(snap.comments.len(), 1);
    let comment_id = snap.comments[0].id.clone();

    converge(&author, |s| s.comments.len() == 1 && s.counters.comments == 1).await;
    assert_eq!(
        author.act(Action::DeleteComment(comment_id)).await,
        MutationOutcome::Applied
    );
    assert_eq!(author.snapshot().counters.comments, 0);
    converge(&reader, |s| s.comments.is_empty() && s.counters.comments == 0).await;
}

#[tokio::test]
async fn invitation_redemption_flow() {
    let fx = fixture(&["owner", "carol", "dave"]).await;
    let group_id = fx.group("owner", true).await;
    let code = {
        let st = fx.state.lock().await;
        groups::create_invitation(
            &st,
            "owner",
            CreateInvitationRequest {
                study_group_id: group_id.clone(),
                expires_in_hours: Some(24),
                max_uses: Some(1),
            },
            unishare::server::utils::now_secs(),
        )
        .unwrap()
        .code
    };

    let carol_backend = fx.backend("carol");
    let carol = InvitationRedeemer::new(carol_backend.clone());
    assert_eq!(carol.redeem("   ").await, Err(RedeemError::EmptyCode));
    assert_eq!(carol_backend.redeem_calls.load(Ordering::SeqCst), 0);

    let joined = carol.redeem(&format!("  {code} ")).await.unwrap();
    assert_eq!(
        joined,
        Redeemed::Joined {
            study_group_id: group_id.clone(),
            redirect: format!("/dashboard/study-groups?view={group_id}"),
        }
    );
    let again = carol.redeem(&code).await.unwrap();
    assert!(matches!(again, Redeemed::AlreadyMember { .. }));
    assert_eq!(again.redirect(), joined.redirect());

    let dave = InvitationRedeemer::new(fx.backend("dave"));
    let err = dave.redeem(&code).await.unwrap_err();
    assert_eq!(err, RedeemError::Rejected(RedeemFailure::Exhausted));
    assert_eq!(
        err.user_message(),
        "This invitation has reached its maximum number of uses"
    );
    assert_eq!(
        dave.redeem("NOSUCH23").await,
        Err(RedeemError::Rejected(RedeemFailure::NotFound))
    );
}
