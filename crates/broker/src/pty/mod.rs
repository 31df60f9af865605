// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod nbio;
pub mod spawn;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Input delivered to the PTY task.
///
/// Writes and resizes share one channel so a resize is always applied
/// before any input byte that arrived after it from the same source.
#[derive(Debug)]
pub enum PtyInput {
    /// Raw bytes to write to the PTY master.
    Write(Bytes),
    /// Apply a new window size.
    Resize { cols: u16, rows: u16 },
}

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Collapse to a single exit code for session records: signal deaths
    /// use the shell convention `128 + signal`.
    pub fn report_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 1,
        }
    }
}

/// PTY backend abstraction: the real forkpty handle in production, a
/// scripted fake in tests.
///
/// Object-safe for use as `Box<dyn PtyBackend>`.
pub trait PtyBackend: Send + 'static {
    /// Run the PTY I/O loop: read output into `output_tx` in 4 KiB chunks,
    /// apply input from `input_rx`, return the child's exit status once the
    /// stream reaches EOF.
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        input_rx: mpsc::Receiver<PtyInput>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>;

    fn child_pid(&self) -> Option<u32>;
}

/// Conversion trait so both concrete backends and `Box<dyn PtyBackend>` can
/// be handed to the terminal without explicit boxing.
pub trait Boxed {
    fn boxed(self) -> Box<dyn PtyBackend>;
}

impl<T: PtyBackend> Boxed for T {
    fn boxed(self) -> Box<dyn PtyBackend> {
        Box::new(self)
    }
}

impl Boxed for Box<dyn PtyBackend> {
    fn boxed(self) -> Box<dyn PtyBackend> {
        self
    }
}
