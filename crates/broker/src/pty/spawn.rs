// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native PTY handle: spawns the session shell via `forkpty` and owns the
//! master side for its lifetime.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;

use anyhow::Context;
use bytes::Bytes;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use super::nbio::{read_chunk, set_nonblocking, write_all, PtyFd};
use super::{ExitStatus, PtyBackend, PtyInput};

/// Read-loop chunk size.
const READ_BUF_BYTES: usize = 4096;

/// The shell hosted inside the PTY on this platform.
pub fn default_shell() -> &'static str {
    if cfg!(windows) {
        "pwsh"
    } else {
        "bash"
    }
}

/// Everything needed to spawn a session shell.
///
/// The environment is explicit: the parent process environment is NOT
/// inherited; callers pass the complete set they want the child to see.
#[derive(Debug, Clone)]
pub struct PtyLaunch {
    pub shell: String,
    /// Command string run via `<shell> -c`; `None` starts an interactive
    /// shell.
    pub command: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Written to the PTY as an OSC title sequence when non-empty.
    pub title: Option<String>,
}

impl PtyLaunch {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            shell: default_shell().to_owned(),
            command: None,
            cols: 120,
            rows: 30,
            cwd,
            env: Vec::new(),
            title: None,
        }
    }

    fn argv(&self) -> Vec<String> {
        match &self.command {
            Some(cmd) => vec![self.shell.clone(), "-c".to_owned(), cmd.clone()],
            None => vec![self.shell.clone()],
        }
    }
}

/// Owns the child process and the PTY master fd.
pub struct PtyHandle {
    master: AsyncFd<PtyFd>,
    child_pid: Pid,
}

impl PtyHandle {
    /// Fork a new PTY and exec the session shell in the child.
    // forkpty requires unsafe: the child is partially initialized post-fork
    #[allow(unsafe_code)]
    pub fn spawn(launch: &PtyLaunch) -> anyhow::Result<Self> {
        let winsize = Winsize {
            ws_col: launch.cols,
            ws_row: launch.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: forkpty is unsafe because the child runs in a
        // partially-initialized address space after fork. The child branch
        // only calls chdir/exec and never returns to the runtime.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                let err = exec_child(launch);
                // exec only returns on failure; unwinding the forked
                // runtime is not an option.
                eprintln!("viberails: exec failed: {err:?}");
                std::process::exit(127);
            }
            ForkptyResult::Parent { child, master } => {
                if let Some(ref title) = launch.title {
                    if !title.is_empty() {
                        write_osc_title(&master, title);
                    }
                }
                set_nonblocking(&master)?;
                let afd = AsyncFd::new(PtyFd(master)).context("AsyncFd::new failed")?;
                Ok(Self { master: afd, child_pid: child })
            }
        }
    }
}

impl PtyBackend for PtyHandle {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<PtyInput>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>
    {
        let pid = self.child_pid;
        Box::pin(async move {
            let mut buf = vec![0u8; READ_BUF_BYTES];
            let mut input_open = true;

            loop {
                tokio::select! {
                    result = read_chunk(&self.master, &mut buf) => {
                        match result {
                            Ok(0) => break,
                            Ok(n) => {
                                let data = Bytes::copy_from_slice(&buf[..n]);
                                if output_tx.send(data).await.is_err() {
                                    break;
                                }
                            }
                            // EIO from the master means the slave side is
                            // gone; treat as EOF.
                            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    input = input_rx.recv(), if input_open => {
                        match input {
                            Some(PtyInput::Write(data)) => {
                                write_all(&self.master, &data).await?;
                            }
                            Some(PtyInput::Resize { cols, rows }) => {
                                if let Err(e) = resize_fd(self.master.as_raw_fd(), cols, rows) {
                                    tracing::warn!(err = %e, "PTY resize failed");
                                }
                            }
                            None => input_open = false,
                        }
                    }
                }
            }

            // Reap on a blocking thread to avoid stalling the runtime.
            let status = tokio::task::spawn_blocking(move || wait_for_exit(pid))
                .await
                .context("join wait thread")??;
            Ok(status)
        })
    }

    fn child_pid(&self) -> Option<u32> {
        Some(self.child_pid.as_raw() as u32)
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        // Best-effort graceful shutdown: SIGHUP, short grace, SIGKILL.
        let _ = kill(self.child_pid, Signal::SIGHUP);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let _ = kill(self.child_pid, Signal::SIGKILL);
        let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
    }
}

/// UTF-8 locale defaults for the child, overridable by the caller's env
/// map.
const ENV_DEFAULTS: &[(&str, &str)] = &[
    ("LANG", "en_US.UTF-8"),
    ("LC_ALL", "en_US.UTF-8"),
    ("PYTHONIOENCODING", "utf-8"),
];

/// The complete child environment: locale defaults first, then the
/// caller's entries, which win on conflict.
fn compose_env(extra: &[(String, String)]) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = ENV_DEFAULTS
        .iter()
        .filter(|(key, _)| !extra.iter().any(|(k, _)| k == key))
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    env.extend(extra.iter().cloned());
    env
}

/// Child-side setup after fork: chdir into the working directory and exec
/// the shell with an explicit environment. Only returns on failure.
fn exec_child(launch: &PtyLaunch) -> anyhow::Error {
    if let Err(e) = nix::unistd::chdir(&launch.cwd) {
        return anyhow::anyhow!("chdir {} failed: {e}", launch.cwd.display());
    }

    let argv: Vec<CString> = match launch
        .argv()
        .iter()
        .map(|s| CString::new(s.as_bytes()))
        .collect::<Result<_, _>>()
    {
        Ok(v) => v,
        Err(e) => return anyhow::anyhow!("invalid argument: {e}"),
    };

    let envp: Vec<CString> = match compose_env(&launch.env)
        .iter()
        .map(|(k, v)| CString::new(format!("{k}={v}")))
        .collect::<Result<_, _>>()
    {
        Ok(v) => v,
        Err(e) => return anyhow::anyhow!("invalid environment entry: {e}"),
    };

    match nix::unistd::execvpe(&argv[0], &argv, &envp) {
        Ok(infallible) => match infallible {},
        Err(e) => anyhow::anyhow!("execvpe {} failed: {e}", launch.shell),
    }
}

/// Write the OSC window-title sequence (`ESC ] 0 ; title BEL`) to the
/// still-blocking master fd.
fn write_osc_title(master: &OwnedFd, title: &str) {
    let seq = format!("\x1b]0;{title}\x07");
    let mut rest = seq.as_bytes();
    while !rest.is_empty() {
        match nix::unistd::write(master, rest) {
            Ok(n) => rest = &rest[n..],
            Err(_) => break,
        }
    }
}

/// Apply TIOCSWINSZ to the master fd.
// the ioctl call itself requires unsafe
#[allow(unsafe_code)]
fn resize_fd(fd: i32, cols: u16, rows: u16) -> anyhow::Result<()> {
    let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

    // SAFETY: TIOCSWINSZ is a well-defined ioctl that sets the window size
    // on the PTY master fd; ws is a properly-initialized Winsize.
    let ret = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &ws) };
    if ret < 0 {
        anyhow::bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

/// Block until the child exits and convert to our `ExitStatus`.
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => anyhow::bail!("waitpid failed: {e}"),
        }
    }
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
