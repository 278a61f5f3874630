//! Network transports: the `/api` routes over blocking `ureq` calls run on
//! tokio's blocking pool, and the realtime feed over `tokio-tungstenite`.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::api::{
    CommentMutation, CommentPage, ErrorBody, FollowAction, FollowResponse, GroupStatus, LikeCount,
    LikeStatus, MembershipResponse, ProfileView, RedeemResponse, ResourceView, ACTOR_HEADER,
};
use crate::client::backend::{ChangeSource, ClientError, EngagementBackend};
use crate::client::subscription::{missed_changes, Subscription, SubscriptionHandle};
use crate::feed::FeedMessage;
use crate::model::{ChangeEvent, ChangeFilter, RedeemFailure};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub actor_id: String,
}

impl ClientConfig {
    /// `UNISHARE_API_URL` (default `http://127.0.0.1:3000`) and
    /// `UNISHARE_ACTOR_ID` (required).
    pub fn from_env() -> Result<Self, ClientError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    fn resolve(env: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let api_url = env("UNISHARE_API_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let actor_id = env("UNISHARE_ACTOR_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ClientError::Validation("UNISHARE_ACTOR_ID is not set".to_string()))?;
        Ok(Self { api_url, actor_id })
    }
}

fn parse_base(api_url: &str) -> Result<Url, ClientError> {
    Url::parse(api_url.trim_end_matches('/'))
        .map_err(|e| ClientError::Validation(format!("invalid api url '{api_url}': {e}")))
}

/// Turn an error response into the matching [`ClientError`]. A `reason`
/// naming an invitation failure wins over the status code.
fn status_error(code: u16, response: ureq::Response) -> ClientError {
    let body: Option<ErrorBody> = response.into_json().ok();
    if let Some(reason) = body
        .as_ref()
        .and_then(|b| b.reason.as_deref())
        .and_then(RedeemFailure::from_reason)
    {
        return ClientError::Invitation(reason);
    }
    let message = body
        .map(|b| b.error)
        .unwrap_or_else(|| format!("request failed with status {code}"));
    match code {
        400 | 422 => ClientError::Validation(message),
        401 => ClientError::Unauthorized(message),
        403 => ClientError::Forbidden(message),
        404 => ClientError::NotFound(message),
        409 => ClientError::Conflict(message),
        _ => ClientError::Server(message),
    }
}

pub struct HttpBackend {
    base: Url,
    actor_id: String,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            base: parse_base(&config.api_url)?,
            actor_id: config.actor_id.clone(),
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::Protocol(format!("bad path {path}: {e}")))
    }

    async fn send(
        &self,
        method: &'static str,
        url: Url,
        body: Option<Value>,
    ) -> Result<ureq::Response, ClientError> {
        let agent = self.agent.clone();
        let actor = self.actor_id.clone();
        tokio::task::spawn_blocking(move || {
            let request = agent.request_url(method, &url).set(ACTOR_HEADER, &actor);
            let response = match body {
                Some(body) => request.send_json(body),
                None => request.call(),
            };
            match response {
                Ok(response) => Ok(response),
                Err(ureq::Error::Status(code, response)) => Err(status_error(code, response)),
                Err(e) => Err(ClientError::Network(e.to_string())),
            }
        })
        .await
        .map_err(|e| ClientError::Network(format!("request task failed: {e}")))?
    }

    async fn json<T: DeserializeOwned + Send + 'static>(
        &self,
        method: &'static str,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let url = self.url(path)?;
        let response = self.send(method, url, body).await?;
        tokio::task::spawn_blocking(move || {
            response
                .into_json::<T>()
                .map_err(|e| ClientError::Protocol(format!("decode response: {e}")))
        })
        .await
        .map_err(|e| ClientError::Network(format!("decode task failed: {e}")))?
    }
}

#[async_trait]
impl EngagementBackend for HttpBackend {
    async fn like_status(&self, resource_id: &str) -> Result<LikeStatus, ClientError> {
        self.json("GET", &format!("/api/resources/{resource_id}/like"), None)
            .await
    }

    async fn like_resource(&self, resource_id: &str) -> Result<LikeCount, ClientError> {
        self.json("POST", &format!("/api/resources/{resource_id}/like"), None)
            .await
    }

    async fn resource(&self, resource_id: &str) -> Result<ResourceView, ClientError> {
        self.json("GET", &format!("/api/resources/{resource_id}"), None)
            .await
    }

    async fn list_comments(&self, resource_id: &str) -> Result<CommentPage, ClientError> {
        self.json("GET", &format!("/api/resources/{resource_id}/comments"), None)
            .await
    }

    async fn post_comment(
        &self,
        resource_id: &str,
        content: &str,
    ) -> Result<CommentMutation, ClientError> {
        self.json(
            "POST",
            &format!("/api/resources/{resource_id}/comments"),
            Some(json!({ "content": content })),
        )
        .await
    }

    async fn delete_comment(
        &self,
        resource_id: &str,
        comment_id: &str,
    ) -> Result<CommentMutation, ClientError> {
        let mut url = self.url(&format!("/api/resources/{resource_id}/comments"))?;
        url.query_pairs_mut().append_pair("commentId", comment_id);
        let response = self.send("DELETE", url, None).await?;
        tokio::task::spawn_blocking(move || {
            response
                .into_json::<CommentMutation>()
                .map_err(|e| ClientError::Protocol(format!("decode response: {e}")))
        })
        .await
        .map_err(|e| ClientError::Network(format!("decode task failed: {e}")))?
    }

    async fn profile(&self, user_id: &str) -> Result<ProfileView, ClientError> {
        self.json("GET", &format!("/api/users/{user_id}"), None).await
    }

    async fn follow(
        &self,
        user_id: &str,
        action: FollowAction,
    ) -> Result<FollowResponse, ClientError> {
        self.json(
            "POST",
            &format!("/api/users/{user_id}/follow"),
            Some(json!({ "action": action.as_str() })),
        )
        .await
    }

    async fn group_status(&self, group_id: &str) -> Result<GroupStatus, ClientError> {
        self.json("GET", &format!("/api/study-groups/{group_id}"), None)
            .await
    }

    async fn join_group(&self, group_id: &str) -> Result<MembershipResponse, ClientError> {
        self.json("POST", &format!("/api/study-groups/{group_id}/join"), None)
            .await
    }

    async fn leave_group(&self, group_id: &str) -> Result<MembershipResponse, ClientError> {
        self.json("POST", &format!("/api/study-groups/{group_id}/leave"), None)
            .await
    }

    async fn redeem_invitation(&self, code: &str) -> Result<RedeemResponse, ClientError> {
        self.json(
            "POST",
            "/api/study-groups/invitations/use",
            Some(json!({ "code": code })),
        )
        .await
    }

    async fn fetch_download(&self, resource_id: &str) -> Result<Vec<u8>, ClientError> {
        let url = self.url(&format!("/api/resources/{resource_id}/download"))?;
        let response = self.send("GET", url, None).await?;
        tokio::task::spawn_blocking(move || {
            let mut data = Vec::new();
            response
                .into_reader()
                .read_to_end(&mut data)
                .map_err(|e| ClientError::Network(format!("read download: {e}")))?;
            Ok(data)
        })
        .await
        .map_err(|e| ClientError::Network(format!("download task failed: {e}")))?
    }

    fn download_url(&self, resource_id: &str) -> String {
        self.url(&format!("/api/resources/{resource_id}/download"))
            .map(String::from)
            .unwrap_or_else(|_| format!("/api/resources/{resource_id}/download"))
    }
}

/// Realtime subscriptions over `/api/realtime`. A dropped connection is
/// re-established with exponential backoff for as long as the subscription
/// is open; after each reconnect the subscriber gets a missed-changes event
/// so it re-reads whatever changed in the gap.
pub struct WsChangeSource {
    base: Url,
    actor_id: String,
}

impl WsChangeSource {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            base: parse_base(&config.api_url)?,
            actor_id: config.actor_id.clone(),
        })
    }

    /// `ws(s)://host/api/realtime?table=..&column=..&value=..&events=..`
    pub fn feed_url(&self, filter: &ChangeFilter) -> Result<Url, ClientError> {
        let mut url = self
            .base
            .join("/api/realtime")
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Protocol(format!("cannot use {scheme} for {url}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("table", &filter.table);
            if let (Some(column), Some(value)) = (&filter.column, &filter.value) {
                query.append_pair("column", column);
                query.append_pair("value", value);
            }
            if !filter.kinds.is_empty() {
                let kinds: Vec<&str> = filter.kinds.iter().map(|k| k.as_str()).collect();
                query.append_pair("events", &kinds.join(","));
            }
        }
        Ok(url)
    }
}

/// Connect and wait for the subscription acknowledgement.
async fn open_feed(url: &Url, actor_id: &str) -> Result<FeedSocket, ClientError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::Protocol(format!("realtime request: {e}")))?;
    let actor = HeaderValue::from_str(actor_id)
        .map_err(|_| ClientError::Validation("actor id is not a valid header value".to_string()))?;
    request.headers_mut().insert(ACTOR_HEADER, actor);

    let (mut socket, _response) = match tokio_tungstenite::connect_async(request).await {
        Ok(connected) => connected,
        Err(WsError::Http(response)) if response.status().as_u16() == 401 => {
            return Err(ClientError::Unauthorized("Authentication required".to_string()))
        }
        Err(WsError::Http(response)) if response.status().as_u16() == 403 => {
            return Err(ClientError::Forbidden(
                "Not allowed to watch this feed".to_string(),
            ))
        }
        Err(e) => return Err(ClientError::Network(format!("realtime connect: {e}"))),
    };

    // Nothing is guaranteed to be delivered before the acknowledgement.
    let ack = tokio::time::timeout(SUBSCRIBE_TIMEOUT, socket.next())
        .await
        .map_err(|_| ClientError::Network("realtime subscribe timed out".to_string()))?;
    match ack {
        Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<FeedMessage>(&text) {
            Ok(FeedMessage::Subscribed { topic }) => {
                crate::ulog!("realtime client: subscribed to {}", topic);
                Ok(socket)
            }
            Ok(other) => Err(ClientError::Protocol(format!(
                "expected subscription ack, got {other:?}"
            ))),
            Err(e) => Err(ClientError::Protocol(format!("bad feed frame: {e}"))),
        },
        Some(Ok(other)) => Err(ClientError::Protocol(format!(
            "unexpected realtime frame: {other:?}"
        ))),
        Some(Err(e)) => Err(ClientError::Network(e.to_string())),
        None => Err(ClientError::Network("realtime closed".to_string())),
    }
}

/// Forward change frames until the connection ends.
async fn pump(
    socket: &mut FeedSocket,
    filter: &ChangeFilter,
    tx: &mpsc::UnboundedSender<ChangeEvent>,
) {
    while let Some(frame) = socket.next().await {
        let event = match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<FeedMessage>(&text) {
                Ok(FeedMessage::Change { event }) => event,
                Ok(FeedMessage::EventsMissed { count }) => {
                    crate::ulog!(
                        "realtime client: {} missed {} events",
                        filter.topic(),
                        count
                    );
                    missed_changes(filter)
                }
                Ok(FeedMessage::Subscribed { .. }) => continue,
                Err(e) => {
                    crate::ulog!("realtime client: bad frame: {}", e);
                    continue;
                }
            },
            Ok(WsMessage::Close(_)) => return,
            Ok(_) => continue,
            Err(e) => {
                crate::ulog!("realtime client: {} error: {}", filter.topic(), e);
                return;
            }
        };
        if tx.send(event).is_err() {
            return;
        }
    }
}

async fn follow_feed(
    mut socket: FeedSocket,
    url: Url,
    actor_id: String,
    filter: ChangeFilter,
    tx: mpsc::UnboundedSender<ChangeEvent>,
) {
    let topic = filter.topic();
    loop {
        pump(&mut socket, &filter, &tx).await;
        if tx.is_closed() {
            return;
        }

        let mut backoff = RECONNECT_BACKOFF;
        crate::ulog!("realtime client: {} disconnected, reconnecting in {:?}", topic, backoff);
        socket = loop {
            tokio::time::sleep(backoff).await;
            if tx.is_closed() {
                return;
            }
            match open_feed(&url, &actor_id).await {
                Ok(socket) => break socket,
                Err(e) => {
                    backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
                    crate::ulog!(
                        "realtime client: {} reconnect failed (retry in {:?}): {}",
                        topic,
                        backoff,
                        e
                    );
                }
            }
        };

        if tx.send(missed_changes(&filter)).is_err() {
            return;
        }
    }
}

#[async_trait]
impl ChangeSource for WsChangeSource {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, ClientError> {
        let url = self.feed_url(&filter)?;
        let socket = open_feed(&url, &self.actor_id).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(follow_feed(
            socket,
            url,
            self.actor_id.clone(),
            filter.clone(),
            tx,
        ));

        let abort = task.abort_handle();
        let handle = SubscriptionHandle::new(move || abort.abort());
        Ok(Subscription::new(filter, rx, handle))
    }
}
