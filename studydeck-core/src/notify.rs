//! Change notifications shared by every context attached to one store.

use crate::DeckId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Identifies one handle onto the shared medium.
pub type ContextId = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    DeckCreated(DeckId),
    DeckSaved(DeckId),
    DeckDeleted(DeckId),
    CardsSaved { deck_id: DeckId, count: usize },
    CountsRepaired(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreEvent {
    pub origin: ContextId,
    pub change: Change,
}

type Callback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
struct HubInner {
    next_sub: AtomicU64,
    next_ctx: AtomicU64,
    subs: RwLock<Vec<(u64, Callback)>>,
}

#[derive(Clone, Default)]
pub struct ChangeHub {
    inner: Arc<HubInner>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn new_context(&self) -> ContextId {
        self.inner.next_ctx.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_sub.fetch_add(1, Ordering::Relaxed);
        self.inner.subs.write().push((id, Arc::new(callback)));
        Subscription {
            hub: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.read().len()
    }

    /// Callbacks run on the caller's thread, outside the registry lock.
    pub fn emit(&self, event: StoreEvent) {
        let targets: Vec<Callback> = self
            .inner
            .subs
            .read()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        tracing::trace!(origin = event.origin, subscribers = targets.len(), "store event");
        for cb in targets {
            cb(&event);
        }
    }
}

/// Unregisters its callback when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    hub: Weak<HubInner>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subs.write().retain(|(id, _)| *id != self.id);
        }
    }
}
