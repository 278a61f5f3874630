//! In-process realtime change feed.
//!
//! Every committed mutation publishes a [`ChangeEvent`] here. Subscribers
//! pick a topic: either a whole table (`resource_likes`) or one key
//! equality within it (`resource_likes:resource_id=eq.r1`). Each topic is a
//! lazily-created `tokio::sync::broadcast` channel; publishing to a topic
//! nobody listens on is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{topic_for, ChangeEvent, ChangeFilter};

/// Per-topic buffer. A subscriber that lags further than this is told how
/// many events it missed and must re-read.
pub const FEED_CHANNEL_CAPACITY: usize = 256;

/// Frames sent to a realtime websocket subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// The subscription is live; every later change will be delivered.
    Subscribed { topic: String },
    Change { event: ChangeEvent },
    /// The subscriber fell behind and lost `count` events.
    EventsMissed { count: u64 },
}

#[derive(Clone, Default)]
pub struct FeedHub {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>>,
    sequence: Arc<AtomicU64>,
}

impl FeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver for the topic `filter` listens on. Kind filtering is left to
    /// the caller via [`ChangeFilter::matches`].
    pub fn subscribe(&self, filter: &ChangeFilter) -> broadcast::Receiver<ChangeEvent> {
        let topic = filter.topic();
        {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            if let Some(tx) = topics.get(&topic) {
                return tx.subscribe();
            }
        }
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(FEED_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Stamp `event` with the next sequence number and deliver it to the
    /// table topic and to every key topic it carries. Returns the stamped
    /// sequence.
    pub fn publish(&self, mut event: ChangeEvent) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        event.sequence = sequence;

        let mut targets = vec![topic_for(&event.table, None)];
        for (column, value) in &event.keys {
            targets.push(topic_for(&event.table, Some((column, value))));
        }

        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        for topic in targets {
            if let Some(tx) = topics.get(&topic) {
                let _ = tx.send(event.clone());
            }
        }
        sequence
    }

    /// Drop channels whose last receiver has gone away.
    pub fn prune(&self) -> usize {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let before = topics.len();
        topics.retain(|_, tx| tx.receiver_count() > 0);
        before - topics.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
