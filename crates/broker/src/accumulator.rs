// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounces raw keystrokes into logical "user input" records.
//!
//! Individual key events are useless in the session history; this
//! accumulator concatenates them and flushes one record per submit byte
//! (CR/LF) or after a quiescence window with no typing. The store call is
//! made from the accumulator's own task, never from an I/O path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::session::InputSource;
use crate::store::SessionStore;

/// Idle window after the last byte before a flush.
pub const FLUSH_QUIESCENCE: Duration = Duration::from_millis(400);

enum Msg {
    Push { text: String, source: InputSource },
    Flush(oneshot::Sender<()>),
}

/// Handle to the accumulator task. Dropping it flushes any pending input
/// and stops the task.
pub struct InputAccumulator {
    tx: mpsc::UnboundedSender<Msg>,
}

impl InputAccumulator {
    pub fn new(store: Arc<dyn SessionStore>, session_id: String) -> Self {
        Self::with_quiescence(store, session_id, FLUSH_QUIESCENCE)
    }

    pub fn with_quiescence(
        store: Arc<dyn SessionStore>,
        session_id: String,
        quiescence: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, session_id, quiescence, rx));
        Self { tx }
    }

    /// Append decoded input text. Cheap and non-blocking.
    pub fn push(&self, text: &str, source: InputSource) {
        let _ = self.tx.send(Msg::Push { text: text.to_owned(), source });
    }

    /// Force a flush and wait until the pending record has been delivered.
    /// Called on session completion.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Msg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run(
    store: Arc<dyn SessionStore>,
    session_id: String,
    quiescence: Duration,
    mut rx: mpsc::UnboundedReceiver<Msg>,
) {
    let mut pending: Option<(String, InputSource)> = None;
    let mut deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Msg::Push { text, source }) => {
                    match pending.as_mut() {
                        Some((buf, src)) => {
                            buf.push_str(&text);
                            *src = source;
                        }
                        None => pending = Some((text, source)),
                    }
                    let submitted = pending
                        .as_ref()
                        .is_some_and(|(buf, _)| buf.contains('\r') || buf.contains('\n'));
                    if submitted {
                        flush(&store, &session_id, &mut pending);
                        deadline = None;
                    } else {
                        deadline = Some(tokio::time::Instant::now() + quiescence);
                    }
                }
                Some(Msg::Flush(ack)) => {
                    flush(&store, &session_id, &mut pending);
                    deadline = None;
                    let _ = ack.send(());
                }
                None => break,
            },
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            }, if deadline.is_some() => {
                flush(&store, &session_id, &mut pending);
                deadline = None;
            }
        }
    }

    // Sender dropped: flush whatever is left.
    flush(&store, &session_id, &mut pending);
}

fn flush(
    store: &Arc<dyn SessionStore>,
    session_id: &str,
    pending: &mut Option<(String, InputSource)>,
) {
    let Some((text, source)) = pending.take() else { return };
    if text.is_empty() {
        return;
    }
    if let Err(e) = store.record_user_input(session_id, &text, source) {
        warn!(session_id = %session_id, err = %e, "failed to record user input");
    }
}

#[cfg(test)]
#[path = "accumulator_tests.rs"]
mod tests;
