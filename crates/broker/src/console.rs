// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process console viewer for foreground mode.
//!
//! Puts the local terminal in raw mode and proxies stdin/stdout to the
//! session. Output is muted while a remote browser is viewing (the broker
//! flips the flag on `__replay__` / `__browser_disconnected__`). Detach
//! with Ctrl+] without killing the session.

use std::io::Write;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use nix::sys::termios;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::ConsoleContext;
use crate::distributor::Consumer;
use crate::session::InputSource;

/// Detach key: Ctrl+] (ASCII 0x1d), same as telnet.
const DETACH_KEY: u8 = 0x1d;

/// RAII guard that restores the original terminal attributes on drop.
///
/// Stores a raw fd (stdin) and the original termios state. The fd is valid
/// for the lifetime of the process (stdin never closes).
struct RawModeGuard {
    fd: i32,
    original: termios::Termios,
}

impl RawModeGuard {
    fn enter() -> anyhow::Result<Self> {
        let fd = std::io::stdin().as_raw_fd();
        let borrowed = borrow_fd(fd);
        let original = termios::tcgetattr(borrowed)?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &raw)?;
        Ok(Self { fd, original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let borrowed = borrow_fd(self.fd);
        let _ = termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &self.original);
    }
}

/// Create a `BorrowedFd` from a raw fd that we know is valid.
fn borrow_fd(fd: i32) -> BorrowedFd<'static> {
    // SAFETY: stdin fd 0 is valid for the lifetime of the process.
    #[allow(unsafe_code)]
    unsafe {
        BorrowedFd::borrow_raw(fd)
    }
}

/// Consumer mirroring PTY output to the console, unless muted.
struct ConsoleConsumer {
    tx: mpsc::UnboundedSender<Bytes>,
    muted: Arc<AtomicBool>,
}

impl Consumer for ConsoleConsumer {
    fn name(&self) -> &'static str {
        "console"
    }

    fn on_output(&self, data: &Bytes) -> anyhow::Result<()> {
        if !self.muted.load(Ordering::Acquire) {
            let _ = self.tx.send(data.clone());
        }
        Ok(())
    }
}

/// Run the console until the session exits, the user detaches, or the host
/// shuts down.
pub async fn run(ctx: ConsoleContext, shutdown: CancellationToken) -> anyhow::Result<()> {
    // Raw mode only when stdin is really a terminal (tcgetattr succeeds).
    let interactive = termios::tcgetattr(borrow_fd(std::io::stdin().as_raw_fd())).is_ok();
    let _raw = if interactive { Some(RawModeGuard::enter()?) } else { None };

    // Replay first so the console shows the current screen state.
    {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(&ctx.terminal.replay_snapshot());
        let _ = stdout.flush();
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let consumer_id = ctx.terminal.subscribe(Arc::new(ConsoleConsumer {
        tx: out_tx,
        muted: Arc::clone(&ctx.muted),
    }));

    let mut exited = ctx.terminal.exited();
    if exited.borrow().is_some() {
        // Session already over; nothing to mirror.
        ctx.terminal.unsubscribe(consumer_id);
        return Ok(());
    }
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            _ = exited.changed() => {
                if exited.borrow().is_some() {
                    break;
                }
            }

            data = out_rx.recv() => match data {
                Some(bytes) => {
                    let mut stdout = std::io::stdout();
                    let _ = stdout.write_all(&bytes);
                    let _ = stdout.flush();
                }
                None => break,
            },

            read = stdin.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = &buf[..n];
                    if let Some(pos) = chunk.iter().position(|b| *b == DETACH_KEY) {
                        if pos > 0 {
                            let _ = ctx
                                .router
                                .route_input(&chunk[..pos], InputSource::LocalCli)
                                .await;
                        }
                        debug!(session_id = %ctx.session_id, "console detached");
                        break;
                    }
                    if let Err(e) = ctx.router.route_input(chunk, InputSource::LocalCli).await {
                        debug!(session_id = %ctx.session_id, err = %e, "console input dropped");
                        break;
                    }
                }
            },
        }
    }

    ctx.terminal.unsubscribe(consumer_id);
    Ok(())
}
