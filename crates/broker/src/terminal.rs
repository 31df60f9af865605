// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One live terminal: a PTY backend, its replay buffer, and the consumer
//! fan-out, driven by a single pump loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::distributor::{Consumer, OutputDistributor, SubscriberId};
use crate::error::ErrorCode;
use crate::pty::spawn::{PtyHandle, PtyLaunch};
use crate::pty::{Boxed, ExitStatus, PtyBackend, PtyInput};
use crate::ring::ReplayBuffer;

/// Default replay buffer capacity (16 KiB).
pub const DEFAULT_REPLAY_CAPACITY: usize = 16 * 1024;

/// Pieces consumed when the read loop starts.
struct PumpParts {
    backend: Box<dyn PtyBackend>,
    output_tx: mpsc::Sender<Bytes>,
    output_rx: mpsc::Receiver<Bytes>,
    input_rx: mpsc::Receiver<PtyInput>,
}

/// Exclusive owner of one PTY for its whole lifetime.
pub struct Terminal {
    distributor: Arc<OutputDistributor>,
    replay: Arc<ReplayBuffer>,
    /// Dropped on dispose so the backend's input drain terminates.
    input_tx: Mutex<Option<mpsc::Sender<PtyInput>>>,
    child_pid: Option<u32>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
    exited_rx: watch::Receiver<Option<ExitStatus>>,
    pending: Mutex<Option<PumpParts>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    exited_tx: Arc<watch::Sender<Option<ExitStatus>>>,
}

impl Terminal {
    /// Spawn a PTY for the given launch spec and bind it.
    pub async fn spawn(launch: &PtyLaunch, replay_capacity: usize) -> anyhow::Result<Self> {
        let handle = PtyHandle::spawn(launch)?;
        Ok(Self::new(handle, replay_capacity))
    }

    /// Bind an already-created backend. Used directly by tests with a fake
    /// backend.
    pub fn new(backend: impl Boxed, replay_capacity: usize) -> Self {
        let backend = backend.boxed();
        let (output_tx, output_rx) = mpsc::channel(256);
        let (input_tx, input_rx) = mpsc::channel(256);
        let (exited_tx, exited_rx) = watch::channel(None);
        let child_pid = backend.child_pid();

        Self {
            distributor: Arc::new(OutputDistributor::new()),
            replay: Arc::new(ReplayBuffer::new(replay_capacity)),
            input_tx: Mutex::new(Some(input_tx)),
            child_pid,
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            exited_rx,
            pending: Mutex::new(Some(PumpParts { backend, output_tx, output_rx, input_rx })),
            pump: Mutex::new(None),
            exited_tx: Arc::new(exited_tx),
        }
    }

    /// Start the read loop. Must be called exactly once, after the initial
    /// consumers are subscribed so they observe output from the first byte.
    pub fn start_read_loop(&self) -> anyhow::Result<()> {
        let parts = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("read loop already started"))?;
        let PumpParts { mut backend, output_tx, mut output_rx, input_rx } = parts;

        let backend_handle =
            tokio::spawn(async move { backend.run(output_tx, input_rx).await });

        let distributor = Arc::clone(&self.distributor);
        let replay = Arc::clone(&self.replay);
        let closed = Arc::clone(&self.closed);
        let cancel = self.cancel.clone();
        let exited_tx = Arc::clone(&self.exited_tx);

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    data = output_rx.recv() => match data {
                        Some(bytes) => {
                            replay.append(&bytes);
                            distributor.publish(&bytes);
                        }
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }

            closed.store(true, Ordering::Release);
            // Reject further backend output so it can never block on a full
            // channel while we wait for it to exit.
            output_rx.close();

            let status = match backend_handle.await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    warn!(err = %e, "PTY backend error");
                    ExitStatus { code: Some(1), signal: None }
                }
                Err(e) => {
                    warn!(err = %e, "PTY backend task panicked");
                    ExitStatus { code: Some(1), signal: None }
                }
            };
            debug!(code = ?status.code, signal = ?status.signal, "terminal exited");
            let _ = exited_tx.send(Some(status));
        });

        *self.pump.lock() = Some(pump);
        Ok(())
    }

    pub fn subscribe(&self, consumer: Arc<dyn Consumer>) -> SubscriberId {
        self.distributor.subscribe(consumer)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.distributor.unsubscribe(id);
    }

    /// UTF-8 text input.
    pub async fn write(&self, text: &str) -> anyhow::Result<()> {
        self.write_bytes(text.as_bytes()).await
    }

    /// Byte-exact input.
    pub async fn write_bytes(&self, data: &[u8]) -> anyhow::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ErrorCode::Closed.into());
        }
        let Some(tx) = self.input_tx.lock().clone() else {
            return Err(ErrorCode::Closed.into());
        };
        tx.send(PtyInput::Write(Bytes::copy_from_slice(data)))
            .await
            .map_err(|_| ErrorCode::Closed.into())
    }

    /// Write a command followed by carriage return.
    pub async fn send_command(&self, cmd: &str) -> anyhow::Result<()> {
        self.write(&format!("{cmd}\r")).await
    }

    /// Queue a window-size change. Ordered with respect to input written
    /// after it.
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ErrorCode::Closed.into());
        }
        let Some(tx) = self.input_tx.lock().clone() else {
            return Err(ErrorCode::Closed.into());
        };
        tx.try_send(PtyInput::Resize { cols, rows })
            .map_err(|_| ErrorCode::Closed.into())
    }

    /// Copy of the most recent output for new viewers.
    pub fn replay_snapshot(&self) -> Vec<u8> {
        self.replay.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.child_pid
    }

    /// Watch channel that resolves once the PTY stream ends.
    pub fn exited(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.exited_rx.clone()
    }

    /// Wait until the child has exited and return its status.
    pub async fn wait_exited(&self) -> ExitStatus {
        let mut rx = self.exited();
        loop {
            if let Some(status) = *rx.borrow_and_update() {
                return status;
            }
            if rx.changed().await.is_err() {
                return ExitStatus { code: Some(1), signal: None };
            }
        }
    }

    /// Kill the child: SIGHUP first, SIGKILL after a short grace.
    pub async fn kill(&self) {
        let Some(pid) = self.child_pid else { return };
        let pid = Pid::from_raw(pid as i32);
        let _ = kill(pid, Signal::SIGHUP);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let _ = kill(pid, Signal::SIGKILL);
    }

    /// Tear down: kill the child, cancel the pump, await it, drop all
    /// subscribers, and empty the replay buffer.
    pub async fn dispose(&self) {
        self.closed.store(true, Ordering::Release);

        // Never started: dropping the parts drops the backend, whose Drop
        // kills the child.
        let pending = self.pending.lock().take();
        drop(pending);

        // Close the input channel so a backend draining input terminates.
        let input_tx = self.input_tx.lock().take();
        drop(input_tx);

        self.kill().await;
        self.cancel.cancel();

        let pump = self.pump.lock().take();
        if let Some(handle) = pump {
            let _ = handle.await;
        }

        self.distributor.clear();
        self.replay.clear();
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("child_pid", &self.child_pid)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
