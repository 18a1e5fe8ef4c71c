//! In-process live feed for plan changes.
//!
//! # Responsibility
//! - Let hosts `subscribe(plan, callback)` and detach again.
//! - Fan out committed-write notifications from services.
//!
//! # Invariants
//! - Callbacks run synchronously on the publishing thread, outside the
//!   registry lock, so a callback may subscribe or publish again.
//! - Dropping a `Subscription` detaches it.

use crate::model::plan::PlanId;
use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// What changed in a plan after a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChange {
    Plan,
    Participants,
    Contributions,
    Settlements,
    /// The plan is gone; subscribers should detach.
    Deleted,
}

impl PlanChange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Participants => "participants",
            Self::Contributions => "contributions",
            Self::Settlements => "settlements",
            Self::Deleted => "deleted",
        }
    }
}

type Callback = Arc<dyn Fn(PlanId, PlanChange) + Send + Sync>;

#[derive(Default)]
struct FeedInner {
    subscribers: Mutex<BTreeMap<PlanId, Vec<(u64, Callback)>>>,
    next_id: AtomicU64,
}

/// Subscription registry shared by services and hosts.
#[derive(Clone, Default)]
pub struct PlanFeed {
    inner: Arc<FeedInner>,
}

/// Handle returned by `PlanFeed::subscribe`.
pub struct Subscription {
    feed: Weak<FeedInner>,
    plan_uuid: PlanId,
    id: u64,
}

impl PlanFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `on_change` for one plan.
    pub fn subscribe(
        &self,
        plan_uuid: PlanId,
        on_change: impl Fn(PlanId, PlanChange) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = lock(&self.inner);
        subscribers
            .entry(plan_uuid)
            .or_default()
            .push((id, Arc::new(on_change)));
        Subscription {
            feed: Arc::downgrade(&self.inner),
            plan_uuid,
            id,
        }
    }

    /// Notifies every subscriber of `plan_uuid`.
    pub fn publish(&self, plan_uuid: PlanId, change: PlanChange) {
        let callbacks = lock(&self.inner)
            .get(&plan_uuid)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect::<Vec<_>>())
            .unwrap_or_default();
        debug!(
            "event=feed_publish module=sync status=ok change={} subscribers={}",
            change.as_str(),
            callbacks.len()
        );
        for callback in callbacks {
            callback(plan_uuid, change);
        }
    }

    /// Number of live subscriptions for one plan.
    pub fn subscriber_count(&self, plan_uuid: PlanId) -> usize {
        lock(&self.inner).get(&plan_uuid).map_or(0, Vec::len)
    }
}

impl Subscription {
    /// Detaches explicitly; equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.feed.upgrade() else {
            return;
        };
        let mut subscribers = lock(&inner);
        if let Some(entries) = subscribers.get_mut(&self.plan_uuid) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                subscribers.remove(&self.plan_uuid);
            }
        }
    }
}

fn lock(inner: &FeedInner) -> std::sync::MutexGuard<'_, BTreeMap<PlanId, Vec<(u64, Callback)>>> {
    // A panicking subscriber must not wedge the feed.
    inner
        .subscribers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
