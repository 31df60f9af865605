// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idle-shutdown watchdog.
//!
//! The host stays alive while at least one owner is registered: persistent
//! owners (acquired and released explicitly) or pulse owners (heartbeats
//! with a TTL, typically a browser tab pinging every few seconds). Once no
//! owner has been active for the idle window, the watchdog signals the host
//! to stop. Disabled entirely in foreground CLI mode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How often the watchdog re-evaluates.
pub const CHECK_PERIOD: Duration = Duration::from_secs(5);

/// Idle window before the host is told to stop.
pub const IDLE_LIMIT: Duration = Duration::from_secs(120);

#[derive(Default)]
struct Owners {
    persistent: HashSet<String>,
    pulses: HashMap<String, Instant>,
}

#[derive(Default)]
pub struct LifecycleWatchdog {
    owners: Mutex<Owners>,
}

impl LifecycleWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent owner. Held until `release`.
    pub fn acquire(&self, id: &str) {
        self.owners.lock().persistent.insert(id.to_owned());
    }

    pub fn release(&self, id: &str) {
        self.owners.lock().persistent.remove(id);
    }

    /// Record a heartbeat: the owner counts as active until `ttl` from now.
    pub fn pulse(&self, id: &str, ttl: Duration) {
        self.owners.lock().pulses.insert(id.to_owned(), Instant::now() + ttl);
    }

    /// True while any persistent owner exists or any pulse is unexpired.
    /// Expired pulses are pruned as a side effect.
    pub fn has_active_owners(&self) -> bool {
        let mut owners = self.owners.lock();
        if !owners.persistent.is_empty() {
            return true;
        }
        let now = Instant::now();
        owners.pulses.retain(|_, expiry| *expiry > now);
        !owners.pulses.is_empty()
    }

    /// Run the periodic check until either the idle limit is hit (then
    /// `stop` is cancelled exactly once) or `stop` is cancelled externally.
    pub async fn run(
        self: Arc<Self>,
        period: Duration,
        idle_limit: Duration,
        stop: CancellationToken,
    ) {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_active = Instant::now();

        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = timer.tick() => {}
            }

            if self.has_active_owners() {
                last_active = Instant::now();
            } else if last_active.elapsed() >= idle_limit {
                info!(idle_secs = last_active.elapsed().as_secs(), "no active clients, stopping host");
                stop.cancel();
                return;
            }
        }
    }

    /// Spawn the periodic check as its own task.
    pub fn spawn_with(
        self: &Arc<Self>,
        period: Duration,
        idle_limit: Duration,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let watchdog = Arc::clone(self);
        tokio::spawn(watchdog.run(period, idle_limit, stop))
    }
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
