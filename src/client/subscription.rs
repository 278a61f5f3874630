//! Realtime subscription handles.
//!
//! A [`Subscription`] is an event stream plus a [`SubscriptionHandle`] that
//! tears the underlying transport down. Closing is idempotent and may race
//! with delivery; events that arrive after close are simply never read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::model::{ChangeEvent, ChangeFilter, ChangeKind};

/// Event standing in for changes lost to lag. It only needs to trigger a
/// re-read, so it carries the filter's own key.
pub(crate) fn missed_changes(filter: &ChangeFilter) -> ChangeEvent {
    let mut event = ChangeEvent::new(&filter.table, ChangeKind::Update);
    if let (Some(column), Some(value)) = (&filter.column, &filter.value) {
        event = event.key(column, value);
    }
    event
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Disposable handle of one subscription. Cloning shares the same
/// underlying teardown, which runs at most once.
#[derive(Clone)]
pub struct SubscriptionHandle {
    closed: Arc<AtomicBool>,
    teardown: Arc<Mutex<Option<Teardown>>>,
}

impl SubscriptionHandle {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            teardown: Arc::new(Mutex::new(Some(Box::new(teardown)))),
        }
    }

    /// Handle of a subscription that never came up.
    pub fn noop() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            teardown: Arc::new(Mutex::new(None)),
        }
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An open change-feed subscription.
#[derive(Debug)]
pub struct Subscription {
    pub filter: ChangeFilter,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
    pub handle: SubscriptionHandle,
}

impl Subscription {
    pub fn new(
        filter: ChangeFilter,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        handle: SubscriptionHandle,
    ) -> Self {
        Self {
            filter,
            events,
            handle,
        }
    }

    /// A subscription that delivers nothing. Used when setup fails so the
    /// view keeps working on request/response reads alone.
    pub fn degraded(filter: ChangeFilter) -> Self {
        let (_tx, events) = mpsc::unbounded_channel();
        Self::new(filter, events, SubscriptionHandle::noop())
    }
}

/// All handles one view holds. Closes everything on drop.
#[derive(Default)]
pub struct SubscriptionSet {
    handles: Vec<SubscriptionHandle>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: SubscriptionHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn close_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.close();
        }
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.close_all();
    }
}
