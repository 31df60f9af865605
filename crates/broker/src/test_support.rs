// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fakes for the PTY backend, the session
//! store, and the command planner.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::broker::{CommandPlanner, LaunchPlan, StartRequest};
use crate::pty::{ExitStatus, PtyBackend, PtyInput};
use crate::session::{InputSource, SessionMeta};
use crate::store::SessionStore;

/// A scripted PTY backend for deterministic tests.
pub struct MockPty {
    output: Vec<Bytes>,
    chunk_delay: Duration,
    exit_status: ExitStatus,
    hold_open: bool,
    captured: Arc<Mutex<Vec<PtyInput>>>,
}

impl Default for MockPty {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPty {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            chunk_delay: Duration::ZERO,
            exit_status: ExitStatus { code: Some(0), signal: None },
            hold_open: false,
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_output(chunks: Vec<Bytes>) -> Self {
        Self { output: chunks, ..Self::new() }
    }

    pub fn exit_status(mut self, status: ExitStatus) -> Self {
        self.exit_status = status;
        self
    }

    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Keep the backend running (draining input) until the input channel
    /// closes, like a long-lived shell.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Handle to everything written to the fake PTY.
    pub fn captured(&self) -> Arc<Mutex<Vec<PtyInput>>> {
        Arc::clone(&self.captured)
    }
}

impl PtyBackend for MockPty {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<PtyInput>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>> {
        let output = std::mem::take(&mut self.output);
        let chunk_delay = self.chunk_delay;
        let exit_status = self.exit_status;
        let hold_open = self.hold_open;
        let captured = Arc::clone(&self.captured);

        Box::pin(async move {
            for chunk in output {
                if output_tx.send(chunk).await.is_err() {
                    break;
                }
                if chunk_delay > Duration::ZERO {
                    tokio::time::sleep(chunk_delay).await;
                }
            }
            if hold_open {
                while let Some(input) = input_rx.recv().await {
                    captured.lock().push(input);
                }
            } else {
                // Capture whatever was queued without waiting.
                while let Ok(input) = input_rx.try_recv() {
                    captured.lock().push(input);
                }
            }
            Ok(exit_status)
        })
    }

    fn child_pid(&self) -> Option<u32> {
        None
    }
}

/// Everything a [`RecordingStore`] saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Created { session_id: String },
    InitialInput { text: String },
    Output { data: Vec<u8> },
    UserInput { text: String, source: InputSource },
    Resize { cols: u16, rows: u16, source: InputSource },
    RemoteCommand { name: String, payload: Option<String> },
    Completed { exit_code: i32 },
}

/// Store fake that records every call.
#[derive(Debug, Default)]
pub struct RecordingStore {
    pub events: Mutex<Vec<StoreEvent>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    pub fn completed_codes(&self) -> Vec<i32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StoreEvent::Completed { exit_code } => Some(exit_code),
                _ => None,
            })
            .collect()
    }

    pub fn user_inputs(&self) -> Vec<(String, InputSource)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StoreEvent::UserInput { text, source } => Some((text, source)),
                _ => None,
            })
            .collect()
    }
}

impl SessionStore for RecordingStore {
    fn create_session(&self, meta: &SessionMeta) -> anyhow::Result<()> {
        self.events.lock().push(StoreEvent::Created { session_id: meta.session_id.clone() });
        Ok(())
    }

    fn record_initial_input(&self, _session_id: &str, text: &str) -> anyhow::Result<()> {
        self.events.lock().push(StoreEvent::InitialInput { text: text.to_owned() });
        Ok(())
    }

    fn log_output(&self, _session_id: &str, data: &[u8]) -> anyhow::Result<()> {
        self.events.lock().push(StoreEvent::Output { data: data.to_vec() });
        Ok(())
    }

    fn record_user_input(
        &self,
        _session_id: &str,
        text: &str,
        source: InputSource,
    ) -> anyhow::Result<()> {
        self.events.lock().push(StoreEvent::UserInput { text: text.to_owned(), source });
        Ok(())
    }

    fn record_resize(
        &self,
        _session_id: &str,
        cols: u16,
        rows: u16,
        source: InputSource,
    ) -> anyhow::Result<()> {
        self.events.lock().push(StoreEvent::Resize { cols, rows, source });
        Ok(())
    }

    fn record_remote_command(
        &self,
        _session_id: &str,
        name: &str,
        payload: Option<&str>,
    ) -> anyhow::Result<()> {
        self.events.lock().push(StoreEvent::RemoteCommand {
            name: name.to_owned(),
            payload: payload.map(str::to_owned),
        });
        Ok(())
    }

    fn complete_session(&self, _session_id: &str, exit_code: i32) -> anyhow::Result<()> {
        self.events.lock().push(StoreEvent::Completed { exit_code });
        Ok(())
    }
}

/// Store whose writes all fail. For the log-and-continue paths.
#[derive(Debug, Default)]
pub struct FailingStore;

impl SessionStore for FailingStore {
    fn create_session(&self, _meta: &SessionMeta) -> anyhow::Result<()> {
        anyhow::bail!("store down")
    }

    fn record_initial_input(&self, _session_id: &str, _text: &str) -> anyhow::Result<()> {
        anyhow::bail!("store down")
    }

    fn log_output(&self, _session_id: &str, _data: &[u8]) -> anyhow::Result<()> {
        anyhow::bail!("store down")
    }

    fn record_user_input(
        &self,
        _session_id: &str,
        _text: &str,
        _source: InputSource,
    ) -> anyhow::Result<()> {
        anyhow::bail!("store down")
    }

    fn record_resize(
        &self,
        _session_id: &str,
        _cols: u16,
        _rows: u16,
        _source: InputSource,
    ) -> anyhow::Result<()> {
        anyhow::bail!("store down")
    }

    fn record_remote_command(
        &self,
        _session_id: &str,
        _name: &str,
        _payload: Option<&str>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("store down")
    }

    fn complete_session(&self, _session_id: &str, _exit_code: i32) -> anyhow::Result<()> {
        anyhow::bail!("store down")
    }
}

/// Planner with a fixed command and a minimal environment that keeps the
/// shell functional.
pub struct StaticPlanner {
    pub command: String,
}

impl StaticPlanner {
    pub fn new(command: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { command: command.into() })
    }
}

impl CommandPlanner for StaticPlanner {
    fn plan(&self, request: &StartRequest) -> anyhow::Result<LaunchPlan> {
        let mut env = vec![
            ("TERM".to_owned(), "dumb".to_owned()),
            ("LANG".to_owned(), "en_US.UTF-8".to_owned()),
        ];
        if let Ok(path) = std::env::var("PATH") {
            env.push(("PATH".to_owned(), path));
        }
        Ok(LaunchPlan {
            shell: "bash".to_owned(),
            command: Some(self.command.clone()),
            env,
            title: request.title.clone(),
        })
    }
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}
