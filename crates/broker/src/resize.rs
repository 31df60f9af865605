// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session resize policy: apply the new size, record it, and (when
//! enabled) nudge full-screen programs to repaint with a debounced Ctrl+L.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::session::InputSource;
use crate::store::SessionStore;
use crate::terminal::Terminal;

/// Debounce window for the redraw nudge.
pub const REDRAW_DEBOUNCE: Duration = Duration::from_millis(160);

/// Ctrl+L.
const FORM_FEED: u8 = 0x0c;

pub struct ResizeCoordinator {
    terminal: Arc<Terminal>,
    store: Arc<dyn SessionStore>,
    session_id: String,
    /// Debounced-redraw policy. Default off.
    redraw_enabled: bool,
    pending_redraw: Mutex<Option<CancellationToken>>,
}

impl ResizeCoordinator {
    pub fn new(
        terminal: Arc<Terminal>,
        store: Arc<dyn SessionStore>,
        session_id: String,
        redraw_enabled: bool,
    ) -> Self {
        Self {
            terminal,
            store,
            session_id,
            redraw_enabled,
            pending_redraw: Mutex::new(None),
        }
    }

    /// Apply a resize from any viewer. Later resizes inside the debounce
    /// window cancel and replace the pending redraw.
    pub fn apply_resize(
        &self,
        cols: u16,
        rows: u16,
        source: InputSource,
    ) -> anyhow::Result<()> {
        self.terminal.resize(cols, rows)?;

        if let Err(e) = self.store.record_resize(&self.session_id, cols, rows, source) {
            warn!(session_id = %self.session_id, err = %e, "failed to record resize");
        }

        if self.redraw_enabled {
            self.schedule_redraw();
        }
        Ok(())
    }

    fn schedule_redraw(&self) {
        let token = CancellationToken::new();
        if let Some(prev) = self.pending_redraw.lock().replace(token.clone()) {
            prev.cancel();
        }

        let terminal = Arc::clone(&self.terminal);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(REDRAW_DEBOUNCE) => {
                    let _ = terminal.write_bytes(&[FORM_FEED]).await;
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "resize_tests.rs"]
mod tests;
