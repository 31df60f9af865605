// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single choke point for every input and output byte of a session.
//!
//! All viewer paths (console, local WS, remote relay) deliver input here so
//! source tagging and store observation happen in exactly one place before
//! the bytes reach the PTY.

use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::accumulator::InputAccumulator;
use crate::distributor::Consumer;
use crate::session::InputSource;
use crate::store::SessionStore;
use crate::terminal::Terminal;

pub struct IoRouter {
    terminal: Arc<Terminal>,
    accumulator: Arc<InputAccumulator>,
    store: Arc<dyn SessionStore>,
    session_id: String,
    /// Whether raw PTY output is persisted to the store. Policy knob,
    /// default off.
    log_output: bool,
}

impl IoRouter {
    pub fn new(
        terminal: Arc<Terminal>,
        accumulator: Arc<InputAccumulator>,
        store: Arc<dyn SessionStore>,
        session_id: String,
        log_output: bool,
    ) -> Self {
        Self { terminal, accumulator, store, session_id, log_output }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Route one chunk of viewer input: observe it for the session record,
    /// then write the original bytes to the PTY.
    pub async fn route_input(&self, data: &[u8], source: InputSource) -> anyhow::Result<()> {
        let text = String::from_utf8_lossy(data);
        self.accumulator.push(&text, source);
        self.terminal.write_bytes(data).await
    }

    /// Observe one chunk of PTY output. Only the DB-logging consumer calls
    /// this; whether anything is stored is the `log_output` policy knob.
    pub fn route_output(&self, data: &[u8]) {
        if !self.log_output {
            return;
        }
        if let Err(e) = self.store.log_output(&self.session_id, data) {
            warn!(session_id = %self.session_id, err = %e, "failed to log output");
        }
    }
}

/// Consumer that feeds PTY output back through the router for optional
/// persistence.
pub struct DbLoggingConsumer {
    router: Arc<IoRouter>,
}

impl DbLoggingConsumer {
    pub fn new(router: Arc<IoRouter>) -> Self {
        Self { router }
    }
}

impl Consumer for DbLoggingConsumer {
    fn name(&self) -> &'static str {
        "db-logging"
    }

    fn on_output(&self, data: &Bytes) -> anyhow::Result<()> {
        self.router.route_output(data);
        Ok(())
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
