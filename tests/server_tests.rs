//! End-to-end tests of the `/api` routes on a real listener.
//!
//! Covers:
//! - Follow flow with the de-duplicated "New Follower" notification
//! - Invitation use ceiling under two concurrent redeemers
//! - Comment counts, moderation and limits
//! - Resource edit limits and ownership
//! - File upload, download counting and the realtime feed (actor required,
//!   private notification feeds, client reconnects)
//! - The HTTP client transports against the same server

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use unishare::api::ACTOR_HEADER;
use unishare::client::{
    Action, ChangeSource, ClientConfig, ClientError, EngagementBackend, EngagementConfig,
    EngagementView, HttpBackend, MutationOutcome, WsChangeSource,
};
use unishare::feed::FeedMessage;
use unishare::model::{tables, ChangeEvent, ChangeFilter, ChangeKind, Target};
use unishare::server::state::AppState;
use unishare::storage::Storage;
use unishare::validation::WordFilter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct TestServer {
    base_url: String,
    _dir: tempfile::TempDir,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Storage::open_in_memory(&dir.path().join("files")).expect("storage");
    let state = AppState::new(storage, WordFilter::default(), None).into_shared();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let task = tokio::spawn(async move {
        unishare::server::serve(listener, state).await.ok();
    });
    TestServer {
        base_url: format!("http://{addr}"),
        _dir: dir,
        task,
    }
}

fn call_blocking(
    method: &str,
    url: &str,
    actor: Option<&str>,
    body: Option<Value>,
) -> (u16, Value) {
    let mut request = ureq::request(method, url);
    if let Some(actor) = actor {
        request = request.set(ACTOR_HEADER, actor);
    }
    let response = match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    };
    let (status, response) = match response {
        Ok(r) => (r.status(), r),
        Err(ureq::Error::Status(code, r)) => (code, r),
        Err(e) => panic!("request failed: {e}"),
    };
    let text = response.into_string().unwrap_or_default();
    (status, serde_json::from_str(&text).unwrap_or(Value::Null))
}

async fn call(
    server: &TestServer,
    method: &'static str,
    path: &str,
    actor: Option<&str>,
    body: Option<Value>,
) -> (u16, Value) {
    let url = format!("{}{}", server.base_url, path);
    let actor = actor.map(str::to_string);
    tokio::task::spawn_blocking(move || call_blocking(method, &url, actor.as_deref(), body))
        .await
        .unwrap()
}

async fn add_user(server: &TestServer, id: &str) {
    let (status, _) = call(
        server,
        "PUT",
        "/api/profile",
        Some(id),
        Some(json!({ "username": id, "fullName": id.to_uppercase(), "universityId": "uni-1" })),
    )
    .await;
    assert_eq!(status, 200, "profile for {id}");
}

async fn add_resource(server: &TestServer, author: &str, title: &str) -> String {
    let (status, body) = call(
        server,
        "POST",
        "/api/resources",
        Some(author),
        Some(json!({ "title": title, "resourceType": "notes" })),
    )
    .await;
    assert_eq!(status, 201, "create resource: {body}");
    body["id"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn requests_without_an_actor_are_rejected() {
    let server = start_server().await;
    let (status, body) = call(&server, "GET", "/api/notifications", None, None).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "Authentication required");

    let (status, body) = call(&server, "GET", "/api/health", None, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn follow_flow_notifies_once() {
    let server = start_server().await;
    add_user(&server, "alice").await;
    add_user(&server, "bob").await;

    let (status, body) = call(
        &server,
        "POST",
        "/api/users/alice/follow",
        Some("bob"),
        Some(json!({ "action": "follow" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["action"], "follow");
    assert_eq!(body["message"], "You are now following alice");
    assert_eq!(body["followerCount"], 1);

    // Retried request: success without a second edge.
    let (status, body) = call(
        &server,
        "POST",
        "/api/users/alice/follow",
        Some("bob"),
        Some(json!({ "action": "follow" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["followerCount"], 1);

    let (_, profile) = call(&server, "GET", "/api/users/alice", Some("bob"), None).await;
    assert_eq!(profile["followerCount"], 1);
    assert_eq!(profile["isFollowing"], true);
    let (_, profile) = call(&server, "GET", "/api/users/bob", Some("bob"), None).await;
    assert_eq!(profile["followingCount"], 1);

    // Unfollow and follow again: still only one notification.
    let (status, body) = call(
        &server,
        "POST",
        "/api/users/alice/follow",
        Some("bob"),
        Some(json!({ "action": "unfollow" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["action"], "unfollow");
    assert_eq!(body["followerCount"], 0);
    call(
        &server,
        "POST",
        "/api/users/alice/follow",
        Some("bob"),
        Some(json!({ "action": "follow" })),
    )
    .await;

    let (status, list) = call(&server, "GET", "/api/notifications", Some("alice"), None).await;
    assert_eq!(status, 200);
    let follows: Vec<&Value> = list
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["type"] == "follow")
        .collect();
    assert_eq!(follows.len(), 1);
    assert_eq!(follows[0]["title"], "New Follower");
    assert_eq!(follows[0]["actorId"], "bob");

    let (_, count) = call(&server, "GET", "/api/notifications/count", Some("alice"), None).await;
    assert_eq!(count["unread"], 1);
    let (status, _) = call(&server, "POST", "/api/notifications/read-all", Some("alice"), None).await;
    assert_eq!(status, 200);
    let (_, count) = call(&server, "GET", "/api/notifications/count", Some("alice"), None).await;
    assert_eq!(count["unread"], 0);
}

#[tokio::test]
async fn follow_rejects_self_and_unknown_users() {
    let server = start_server().await;
    add_user(&server, "alice").await;

    let (status, body) = call(
        &server,
        "POST",
        "/api/users/alice/follow",
        Some("alice"),
        Some(json!({ "action": "follow" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "You cannot follow yourself");

    let (status, _) = call(
        &server,
        "POST",
        "/api/users/nobody/follow",
        Some("alice"),
        Some(json!({ "action": "follow" })),
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn invitation_ceiling_admits_exactly_one_of_two_concurrent_redeemers() {
    let server = start_server().await;
    for user in ["owner", "carol", "dave"] {
        add_user(&server, user).await;
    }

    let (status, group) = call(
        &server,
        "POST",
        "/api/study-groups",
        Some("owner"),
        Some(json!({ "name": "Algorithms", "isPrivate": true })),
    )
    .await;
    assert_eq!(status, 201);
    let group_id = group["studyGroupId"].as_str().unwrap().to_string();

    let (status, body) = call(
        &server,
        "POST",
        &format!("/api/study-groups/{group_id}/join"),
        Some("carol"),
        None,
    )
    .await;
    assert_eq!(status, 403, "private group needs an invitation: {body}");

    let (status, invitation) = call(
        &server,
        "POST",
        "/api/study-groups/invitations",
        Some("owner"),
        Some(json!({ "studyGroupId": group_id, "maxUses": 1 })),
    )
    .await;
    assert_eq!(status, 201);
    let code = invitation["code"].as_str().unwrap().to_string();

    let redeem = |actor: &'static str| {
        call(
            &server,
            "POST",
            "/api/study-groups/invitations/use",
            Some(actor),
            Some(json!({ "code": code })),
        )
    };
    let ((s1, b1), (s2, b2)) = tokio::join!(redeem("carol"), redeem("dave"));

    let mut statuses = vec![s1, s2];
    statuses.sort();
    assert_eq!(statuses, vec![200, 400], "{b1} / {b2}");
    let (winner, loser_body) = if s1 == 200 { ("carol", &b2) } else { ("dave", &b1) };
    assert_eq!(loser_body["reason"], "exhausted");

    let (_, status_body) = call(
        &server,
        "GET",
        &format!("/api/study-groups/{group_id}"),
        Some("owner"),
        None,
    )
    .await;
    assert_eq!(status_body["memberCount"], 2);

    // Already a member: success even though the code is used up.
    let (status, body) = call(
        &server,
        "POST",
        "/api/study-groups/invitations/use",
        Some(winner),
        Some(json!({ "code": code })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["alreadyMember"], true);
    assert_eq!(body["studyGroupId"], group_id.as_str());

    let (status, body) = call(
        &server,
        "POST",
        "/api/study-groups/invitations/use",
        Some("dave"),
        Some(json!({ "code": "ZZZZZZZZ" })),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["reason"], "not_found");
}

#[tokio::test]
async fn private_group_hides_member_count_from_outsiders() {
    let server = start_server().await;
    add_user(&server, "owner").await;
    add_user(&server, "eve").await;

    let (_, group) = call(
        &server,
        "POST",
        "/api/study-groups",
        Some("owner"),
        Some(json!({ "name": "Secret", "isPrivate": true })),
    )
    .await;
    let group_id = group["studyGroupId"].as_str().unwrap().to_string();

    let (_, seen) = call(
        &server,
        "GET",
        &format!("/api/study-groups/{group_id}"),
        Some("eve"),
        None,
    )
    .await;
    assert_eq!(seen["isMember"], false);
    assert!(seen["memberCount"].is_null());

    let (_, seen) = call(
        &server,
        "GET",
        &format!("/api/study-groups/{group_id}"),
        Some("owner"),
        None,
    )
    .await;
    assert_eq!(seen["role"], "admin");
    assert_eq!(seen["memberCount"], 1);
}

#[tokio::test]
async fn comment_counts_track_posts_and_moderation() {
    let server = start_server().await;
    add_user(&server, "author").await;
    add_user(&server, "reader").await;
    let id = add_resource(&server, "author", "Lecture notes").await;

    let (status, posted) = call(
        &server,
        "POST",
        &format!("/api/resources/{id}/comments"),
        Some("reader"),
        Some(json!({ "content": "  Very helpful  " })),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(posted["count"], 1);
    assert_eq!(posted["comment"]["content"], "Very helpful");
    let comment_id = posted["comment"]["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &server,
        "POST",
        &format!("/api/resources/{id}/comments"),
        Some("reader"),
        Some(json!({ "content": "x".repeat(501) })),
    )
    .await;
    assert_eq!(status, 400);
    let (status, _) = call(
        &server,
        "POST",
        &format!("/api/resources/{id}/comments"),
        Some("reader"),
        Some(json!({ "content": "   " })),
    )
    .await;
    assert_eq!(status, 400);

    let (_, page) = call(
        &server,
        "GET",
        &format!("/api/resources/{id}/comments"),
        Some("reader"),
        None,
    )
    .await;
    assert_eq!(page["count"], 1);
    assert_eq!(page["comments"][0]["authorName"], "reader");

    // The resource owner may remove someone else's comment.
    let (status, deleted) = call(
        &server,
        "DELETE",
        &format!("/api/resources/{id}/comments?commentId={comment_id}"),
        Some("author"),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(deleted["count"], 0);

    let (_, resource) = call(&server, "GET", &format!("/api/resources/{id}"), Some("author"), None).await;
    assert_eq!(resource["commentCount"], 0);
}

#[tokio::test]
async fn edit_enforces_ownership_and_limits() {
    let server = start_server().await;
    add_user(&server, "author").await;
    add_user(&server, "other").await;
    let id = add_resource(&server, "author", "Notes").await;
    let path = format!("/api/resources/{id}/edit");

    let (status, body) = call(
        &server,
        "POST",
        &path,
        Some("author"),
        Some(json!({ "title": "t".repeat(26), "resourceType": "notes" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Title must be 25 characters or less");

    let (status, _) = call(
        &server,
        "POST",
        &path,
        Some("other"),
        Some(json!({ "title": "Mine now", "resourceType": "notes" })),
    )
    .await;
    assert_eq!(status, 403);

    let (status, body) = call(
        &server,
        "POST",
        &path,
        Some("author"),
        Some(json!({ "title": "Week 3 notes", "resourceType": "notes", "courseCode": "CS101" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["thumbnailRegenerating"], false);

    let (_, resource) = call(&server, "GET", &format!("/api/resources/{id}"), Some("other"), None).await;
    assert_eq!(resource["title"], "Week 3 notes");
    assert_eq!(resource["courseCode"], "CS101");
}

#[tokio::test]
async fn uploaded_file_downloads_and_counts() {
    let server = start_server().await;
    add_user(&server, "author").await;
    let id = add_resource(&server, "author", "Slides").await;

    let boundary = "unishare-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"slides.pdf\"\r\nContent-Type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"%PDF-1.4 test");
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let upload_url = format!("{}/api/resources/{id}/file", server.base_url);
    let status = tokio::task::spawn_blocking(move || {
        match ureq::post(&upload_url)
            .set(ACTOR_HEADER, "author")
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
        {
            Ok(r) => r.status(),
            Err(ureq::Error::Status(code, _)) => code,
            Err(e) => panic!("upload failed: {e}"),
        }
    })
    .await
    .unwrap();
    assert_eq!(status, 201);

    let download_url = format!("{}/api/resources/{id}/download", server.base_url);
    let (content_type, data) = tokio::task::spawn_blocking(move || {
        let response = ureq::get(&download_url)
            .set(ACTOR_HEADER, "author")
            .call()
            .expect("download");
        let content_type = response.content_type().to_string();
        let mut data = Vec::new();
        response.into_reader().read_to_end(&mut data).unwrap();
        (content_type, data)
    })
    .await
    .unwrap();
    assert_eq!(content_type, "application/pdf");
    assert_eq!(data, b"%PDF-1.4 test");

    let (_, resource) = call(&server, "GET", &format!("/api/resources/{id}"), Some("author"), None).await;
    assert_eq!(resource["downloadCount"], 1);
    assert_eq!(resource["hasFile"], true);

    let bare = add_resource(&server, "author", "Empty").await;
    let (status, body) = call(
        &server,
        "GET",
        &format!("/api/resources/{bare}/download"),
        Some("author"),
        None,
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "No downloadable content available");
}

#[tokio::test]
async fn realtime_feed_delivers_like_changes() {
    let server = start_server().await;
    add_user(&server, "author").await;
    add_user(&server, "fan").await;
    let id = add_resource(&server, "author", "Notes").await;

    let ws_url = format!(
        "{}/api/realtime?table=resource_likes&column=resource_id&value={id}&events=insert",
        server.base_url.replacen("http://", "ws://", 1)
    );
    let anonymous = tokio_tungstenite::connect_async(ws_url.as_str()).await;
    match anonymous {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("anonymous realtime connect should be refused, got {:?}", other.map(|_| ())),
    }

    let mut request = ws_url.as_str().into_client_request().unwrap();
    request
        .headers_mut()
        .insert(ACTOR_HEADER, HeaderValue::from_static("fan"));
    let (mut stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("connect realtime");

    let first = stream.next().await.unwrap().unwrap();
    let WsMessage::Text(text) = first else {
        panic!("expected text frame, got {first:?}");
    };
    assert!(matches!(
        serde_json::from_str::<FeedMessage>(&text).unwrap(),
        FeedMessage::Subscribed { .. }
    ));

    let (status, body) = call(&server, "POST", &format!("/api/resources/{id}/like"), Some("fan"), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["likeCount"], 1);

    let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("change frame")
        .unwrap()
        .unwrap();
    let WsMessage::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };
    match serde_json::from_str::<FeedMessage>(&text).unwrap() {
        FeedMessage::Change { event } => {
            assert_eq!(event.table, "resource_likes");
            assert_eq!(event.keys.get("resource_id"), Some(&id));
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn http_views_converge_over_the_network() {
    let server = start_server().await;
    for user in ["author", "ann", "ben"] {
        add_user(&server, user).await;
    }
    let id = add_resource(&server, "author", "Shared notes").await;
    let target = Target::Resource(id.clone());

    let mount = |actor: &str| {
        let config = ClientConfig {
            api_url: server.base_url.clone(),
            actor_id: actor.to_string(),
        };
        let backend = Arc::new(HttpBackend::new(&config).unwrap());
        let source = Arc::new(WsChangeSource::new(&config).unwrap());
        EngagementView::mount(target.clone(), backend, source, EngagementConfig::default())
    };
    let ann = mount("ann").await;
    let ben = mount("ben").await;

    assert_eq!(ann.act(Action::Like).await, MutationOutcome::Applied);
    assert_eq!(ben.act(Action::Like).await, MutationOutcome::Applied);

    for view in [&ann, &ben] {
        let mut rx = view.watch();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.counters.likes == 2),
        )
        .await
        .expect("views converge")
        .unwrap();
    }
    assert!(ann.snapshot().has_liked);
    assert!(ben.snapshot().has_liked);

    let config = ClientConfig {
        api_url: server.base_url.clone(),
        actor_id: "ann".to_string(),
    };
    let backend = HttpBackend::new(&config).unwrap();
    let err = backend.redeem_invitation("NOPE2345").await.unwrap_err();
    assert_eq!(
        err,
        unishare::client::ClientError::Invitation(unishare::model::RedeemFailure::NotFound)
    );

    ann.unmount();
    ben.unmount();
}

#[tokio::test]
async fn notification_feed_is_private_to_its_recipient() {
    let server = start_server().await;
    add_user(&server, "alice").await;
    add_user(&server, "mallory").await;

    let source = |actor: &str| {
        WsChangeSource::new(&ClientConfig {
            api_url: server.base_url.clone(),
            actor_id: actor.to_string(),
        })
        .unwrap()
    };
    let filter = ChangeFilter::new(tables::NOTIFICATIONS).eq("user_id", "alice");

    let err = source("mallory").subscribe(filter.clone()).await.unwrap_err();
    assert!(matches!(err, ClientError::Forbidden(_)), "got {err:?}");

    let sub = source("alice").subscribe(filter).await.expect("own feed");
    sub.handle.close();
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event after reconnect")
        .expect("stream still open")
}

fn frame(message: &FeedMessage) -> WsMessage {
    WsMessage::Text(serde_json::to_string(message).unwrap())
}

#[tokio::test]
async fn realtime_client_reconnects_after_the_feed_drops() {
    // A feed that drops the first connection right after acknowledging it,
    // then delivers one change on the second.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (actors_tx, mut actors_rx) = mpsc::unbounded_channel::<Option<String>>();
    let feed = tokio::spawn(async move {
        for round in 0..2 {
            let (tcp, _) = listener.accept().await.unwrap();
            let actors = actors_tx.clone();
            let record_actor =
                move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let actor = req
                        .headers()
                        .get(ACTOR_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let _ = actors.send(actor);
                    Ok(resp)
                };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, record_actor)
                .await
                .unwrap();
            let topic = "resource_likes:resource_id=eq.r1".to_string();
            ws.send(frame(&FeedMessage::Subscribed { topic })).await.unwrap();
            if round == 0 {
                drop(ws);
                continue;
            }
            let event = ChangeEvent::new(tables::RESOURCE_LIKES, ChangeKind::Insert)
                .key("resource_id", "r1");
            ws.send(frame(&FeedMessage::Change { event })).await.unwrap();
            while ws.next().await.is_some() {}
        }
    });

    let source = WsChangeSource::new(&ClientConfig {
        api_url: format!("http://{addr}"),
        actor_id: "carol".to_string(),
    })
    .unwrap();
    let filter = ChangeFilter::new(tables::RESOURCE_LIKES).eq("resource_id", "r1");
    let mut sub = source.subscribe(filter).await.expect("subscribe");

    // The gap is reported first, then live changes resume.
    let gap = next_event(&mut sub.events).await;
    assert_eq!(gap.table, tables::RESOURCE_LIKES);
    assert_eq!(gap.kind, ChangeKind::Update);
    let live = next_event(&mut sub.events).await;
    assert_eq!(live.kind, ChangeKind::Insert);
    assert_eq!(live.keys.get("resource_id").map(String::as_str), Some("r1"));

    assert_eq!(actors_rx.recv().await, Some(Some("carol".to_string())));
    assert_eq!(actors_rx.recv().await, Some(Some("carol".to_string())));

    sub.handle.close();
    feed.abort();
}
