//! Realtime change feed over WebSocket.
//!
//! `GET /api/realtime?table=resource_likes&column=resource_id&value=r1&events=insert,delete`
//! upgrades to a socket that first sends `{"type":"subscribed"}` and then one
//! `{"type":"change"}` frame per matching committed change. Frames carry key
//! columns only.

use std::sync::atomic::Ordering;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::feed::FeedMessage;
use crate::logging::user_id;
use crate::model::{tables, ChangeFilter, ChangeKind};
use crate::server::config::MAX_WS_CONNECTIONS;
use crate::server::state::SharedState;
use crate::server::utils::{api_error, Actor};

#[derive(Deserialize)]
pub struct RealtimeQuery {
    table: String,
    column: Option<String>,
    value: Option<String>,
    events: Option<String>,
}

/// Build the subscription filter from query parameters. `column` and
/// `value` must be given together.
pub fn parse_filter(query: &RealtimeQuery) -> Result<ChangeFilter, String> {
    if query.table.trim().is_empty() {
        return Err("table is required".to_string());
    }
    let mut filter = ChangeFilter::new(query.table.trim());
    match (&query.column, &query.value) {
        (Some(column), Some(value)) => filter = filter.eq(column, value),
        (None, None) => {}
        _ => return Err("column and value must be given together".to_string()),
    }
    if let Some(events) = query.events.as_deref().filter(|e| !e.trim().is_empty()) {
        let mut kinds = Vec::new();
        for part in events.split(',') {
            if part.trim() == "*" {
                kinds.clear();
                break;
            }
            let kind = ChangeKind::parse(part)
                .ok_or_else(|| format!("unknown event kind '{}'", part.trim()))?;
            kinds.push(kind);
        }
        filter = filter.kinds(&kinds);
    }
    Ok(filter)
}

/// Notification feeds are private: the filter must pin `user_id` to the
/// caller. Every other table carries public engagement keys only.
pub fn check_access(filter: &ChangeFilter, actor: &str) -> Result<(), String> {
    if filter.table != tables::NOTIFICATIONS {
        return Ok(());
    }
    match (filter.column.as_deref(), filter.value.as_deref()) {
        (Some("user_id"), Some(value)) if value == actor => Ok(()),
        _ => Err("notifications can only be watched by their recipient".to_string()),
    }
}

pub async fn realtime_handler(
    Actor(actor): Actor,
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(query): Query<RealtimeQuery>,
) -> Response {
    let filter = match parse_filter(&query) {
        Ok(f) => f,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e),
    };
    if let Err(e) = check_access(&filter, &actor) {
        crate::ulog!("realtime: {} refused {}", user_id(&actor), filter.topic());
        return api_error(StatusCode::FORBIDDEN, e);
    }

    let ws_count = {
        let st = state.lock().await;
        st.ws_connection_count.clone()
    };
    if ws_count.load(Ordering::Relaxed) >= MAX_WS_CONNECTIONS {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!(
                "too many realtime connections (max {})",
                MAX_WS_CONNECTIONS
            ),
        );
    }

    ws.on_upgrade(move |socket| realtime_connection(socket, state, filter))
        .into_response()
}

async fn send_frame(socket: &mut WebSocket, frame: &FeedMessage) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(WsMessage::Text(json)).await.is_ok(),
        Err(_) => true,
    }
}

async fn realtime_connection(mut socket: WebSocket, state: SharedState, filter: ChangeFilter) {
    // Subscribe before acknowledging so nothing committed after the ack is lost.
    let (mut rx, ws_count) = {
        let st = state.lock().await;
        let count = st.ws_connection_count.clone();
        count.fetch_add(1, Ordering::Relaxed);
        (st.feed.subscribe(&filter), count)
    };
    let topic = filter.topic();
    crate::ulog!("realtime: subscribed to {}", topic);

    if send_frame(&mut socket, &FeedMessage::Subscribed { topic: topic.clone() }).await {
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if !filter.matches(&event) {
                                continue;
                            }
                            if !send_frame(&mut socket, &FeedMessage::Change { event }).await {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            crate::ulog!("realtime: {} lagged, skipped {n} events", topic);
                            if !send_frame(&mut socket, &FeedMessage::EventsMissed { count: n }).await {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = socket.send(WsMessage::Pong(data)).await;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    ws_count.fetch_sub(1, Ordering::Relaxed);
    drop(rx);
    state.lock().await.feed.prune();
    crate::ulog!("realtime: closed {}", topic);
}
