//! Shared application state.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::feed::FeedHub;
use crate::storage::Storage;
use crate::validation::WordFilter;

pub struct AppState {
    pub storage: Storage,
    pub feed: FeedHub,
    pub filter: WordFilter,
    pub thumbnail_url: Option<String>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(storage: Storage, filter: WordFilter, thumbnail_url: Option<String>) -> Self {
        Self {
            storage,
            feed: FeedHub::new(),
            filter,
            thumbnail_url,
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }
}

pub type SharedState = Arc<Mutex<AppState>>;
