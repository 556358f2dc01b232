//! In-process bill feed.
//!
//! Subscribers register per household context and receive the full current bill list
//! on every change, never a diff. Dropping the returned [`Subscription`] unregisters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::bill::BillRecord;

pub type SnapshotCallback = Arc<dyn Fn(&[BillRecord]) + Send + Sync>;

struct Subscriber {
    id: u64,
    context_id: String,
    callback: SnapshotCallback,
}

#[derive(Default)]
struct FeedInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    latest: HashMap<String, Vec<BillRecord>>,
}

#[derive(Clone, Default)]
pub struct BillFeed {
    inner: Arc<Mutex<FeedInner>>,
}

impl BillFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `callback` for `context_id`. If a snapshot was already published for
    /// the context it is delivered immediately.
    pub fn subscribe(
        &self,
        context_id: &str,
        callback: impl Fn(&[BillRecord]) + Send + Sync + 'static,
    ) -> Subscription {
        let callback: SnapshotCallback = Arc::new(callback);
        let (id, current) = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.subscribers.push(Subscriber {
                id,
                context_id: context_id.to_string(),
                callback: Arc::clone(&callback),
            });
            (id, inner.latest.get(context_id).cloned())
        };
        debug!(context_id, subscription = id, "bill feed subscribed");

        if let Some(bills) = current {
            callback(&bills);
        }

        Subscription {
            feed: Arc::downgrade(&self.inner),
            id,
            active: true,
        }
    }

    /// Delivers `bills` to every subscriber of `context_id`. Callbacks run outside the
    /// feed lock so they may subscribe or publish themselves.
    pub fn publish(&self, context_id: &str, bills: Vec<BillRecord>) {
        let callbacks: Vec<SnapshotCallback> = {
            let mut inner = self.lock();
            inner.latest.insert(context_id.to_string(), bills.clone());
            inner
                .subscribers
                .iter()
                .filter(|s| s.context_id == context_id)
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };
        debug!(
            context_id,
            bills = bills.len(),
            subscribers = callbacks.len(),
            "bill feed publish"
        );
        for callback in callbacks {
            callback(&bills);
        }
    }

    pub fn subscriber_count(&self, context_id: &str) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| s.context_id == context_id)
            .count()
    }
}

/// Disposer returned by [`BillFeed::subscribe`].
pub struct Subscription {
    feed: std::sync::Weak<Mutex<FeedInner>>,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(inner) = self.feed.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.subscribers.retain(|s| s.id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
