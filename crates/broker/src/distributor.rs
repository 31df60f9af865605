// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out of PTY output to the attached consumers.
//!
//! `publish` runs on the terminal's read loop, so every consumer sees the
//! same bytes in PTY order by construction. Consumers must be O(1)
//! non-blocking; anything with real work to do enqueues to its own task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::warn;

/// Token returned by [`OutputDistributor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A sink receiving PTY output synchronously from the read loop.
pub trait Consumer: Send + Sync {
    /// Short name used in dispatch-failure logs.
    fn name(&self) -> &'static str;

    /// Handle one chunk of output. Errors are caught at the dispatch site;
    /// they never abort the read loop or affect other consumers.
    fn on_output(&self, data: &Bytes) -> anyhow::Result<()>;
}

/// Thread-safe consumer registry with snapshot-under-lock dispatch.
#[derive(Default)]
pub struct OutputDistributor {
    subscribers: Mutex<HashMap<u64, Arc<dyn Consumer>>>,
    next_id: AtomicU64,
}

impl OutputDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, consumer: Arc<dyn Consumer>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, consumer);
        SubscriberId(id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().remove(&id.0);
    }

    /// Deliver one chunk to every consumer registered at the time of the
    /// call. The subscriber set is snapshotted under the lock and iterated
    /// outside it, so consumers may (un)subscribe from within `on_output`.
    pub fn publish(&self, data: &Bytes) {
        let snapshot: Vec<Arc<dyn Consumer>> =
            self.subscribers.lock().values().cloned().collect();
        for consumer in snapshot {
            if let Err(e) = consumer.on_output(data) {
                warn!(consumer = consumer.name(), err = %e, "output consumer failed");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drop all subscribers. Used on terminal disposal.
    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }
}

#[cfg(test)]
#[path = "distributor_tests.rs"]
mod tests;
