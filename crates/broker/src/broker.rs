// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide session broker.
//!
//! Tracks the one active terminal, the one local WebSocket viewer, and the
//! optional remote relay connection, and enforces the single-viewer
//! takeover policy between them. Singleton fields live behind one coarse
//! lock held only for field updates, never across awaits.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::accumulator::InputAccumulator;
use crate::distributor::{Consumer, SubscriberId};
use crate::error::ErrorCode;
use crate::protocol::ControlFrame;
use crate::pty::spawn::{default_shell, PtyLaunch};
use crate::remote::conn::{RelayConfig, RemoteCallbacks, RemoteConnection, RemoteOutputConsumer};
use crate::remote::register::{self, RegisterBody};
use crate::resize::ResizeCoordinator;
use crate::router::{DbLoggingConsumer, IoRouter};
use crate::session::{epoch_ms, new_session_id, CliKind, InputSource, OwnerKind, SessionMeta};
use crate::store::SessionStore;
use crate::terminal::{Terminal, DEFAULT_REPLAY_CAPACITY};

/// Reason sent to an evicted local viewer when a new one attaches.
pub const LOCAL_TAKEOVER_REASON: &str = "Session taken over";
/// Reason sent upstream when a local viewer displaces the remote browser.
pub const REMOTE_DISCONNECT_REASON: &str = "Session taken over by local viewer";
/// Reason sent to the local viewer when a remote browser takes over.
pub const REMOTE_TAKEOVER_REASON: &str = "Session taken over by remote viewer";

/// Static broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub cols: u16,
    pub rows: u16,
    pub replay_capacity: usize,
    /// Remote relay endpoint; `None` disables remote viewing entirely.
    pub relay: Option<RelayConfig>,
    /// URL where the frontend can reach this broker, for registration.
    pub host_url: String,
    /// Persist raw PTY output to the store. Default off.
    pub log_output: bool,
    /// Debounced Ctrl+L after resize. Default off.
    pub redraw_on_resize: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            cols: 120,
            rows: 30,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            relay: None,
            host_url: String::new(),
            log_output: false,
            redraw_on_resize: false,
        }
    }
}

/// Request to start a session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub cli: CliKind,
    pub working_dir: PathBuf,
    pub environment_name: Option<String>,
    pub title: Option<String>,
    /// Prompt text recorded as the session's initial input.
    pub initial_input: Option<String>,
    pub owner: OwnerKind,
    pub enable_remote: bool,
    /// Override the planned CLI invocation. Used by tests and dev tooling.
    pub command_override: Option<String>,
}

impl StartRequest {
    pub fn new(cli: CliKind, working_dir: PathBuf) -> Self {
        Self {
            cli,
            working_dir,
            environment_name: None,
            title: None,
            initial_input: None,
            owner: OwnerKind::Local,
            enable_remote: false,
            command_override: None,
        }
    }
}

/// Launch recipe produced by the planner: shell command plus the complete
/// child environment.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub shell: String,
    pub command: Option<String>,
    pub env: Vec<(String, String)>,
    pub title: Option<String>,
}

/// Builds the environment and launch command for a session.
pub trait CommandPlanner: Send + Sync {
    fn plan(&self, request: &StartRequest) -> anyhow::Result<LaunchPlan>;
}

/// Default planner: run the CLI under the platform shell with a UTF-8
/// locale. The child environment is explicit: only what is listed here
/// plus the variables the shell cannot function without.
#[derive(Debug, Default)]
pub struct ShellPlanner;

impl CommandPlanner for ShellPlanner {
    fn plan(&self, request: &StartRequest) -> anyhow::Result<LaunchPlan> {
        let mut env: Vec<(String, String)> = vec![
            ("TERM".to_owned(), "xterm-256color".to_owned()),
            ("LANG".to_owned(), "en_US.UTF-8".to_owned()),
            ("LC_ALL".to_owned(), "en_US.UTF-8".to_owned()),
            ("PYTHONIOENCODING".to_owned(), "utf-8".to_owned()),
        ];
        for key in ["PATH", "HOME", "USER", "SHELL"] {
            if let Ok(value) = std::env::var(key) {
                env.push((key.to_owned(), value));
            }
        }
        if let Some(ref name) = request.environment_name {
            env.push(("VIBERAILS_ENV".to_owned(), name.clone()));
        }

        let command = request
            .command_override
            .clone()
            .unwrap_or_else(|| request.cli.launch_command().to_owned());

        Ok(LaunchPlan {
            shell: default_shell().to_owned(),
            command: Some(command),
            env,
            title: request
                .title
                .clone()
                .or_else(|| Some(format!("viberails ({})", request.cli.as_str()))),
        })
    }
}

/// An attached local WebSocket viewer.
struct LocalViewer {
    id: u64,
    cancel: CancellationToken,
    close_reason: Arc<Mutex<Option<String>>>,
}

impl LocalViewer {
    fn close(self, reason: &str) {
        *self.close_reason.lock() = Some(reason.to_owned());
        self.cancel.cancel();
    }
}

/// The singleton state guarded by the broker's coarse lock.
struct ActiveSession {
    meta: SessionMeta,
    terminal: Arc<Terminal>,
    router: Arc<IoRouter>,
    resize: Arc<ResizeCoordinator>,
    accumulator: Arc<InputAccumulator>,
    remote: Option<Arc<RemoteConnection>>,
    local_ws: Option<LocalViewer>,
    completed: Arc<AtomicBool>,
    console_muted: Arc<AtomicBool>,
}

/// Everything a local WS attach task needs, snapshotted under the lock.
pub struct AttachContext {
    pub viewer_id: u64,
    pub session_id: String,
    pub replay: Vec<u8>,
    pub data_rx: mpsc::UnboundedReceiver<Bytes>,
    pub cancel: CancellationToken,
    pub close_reason: Arc<Mutex<Option<String>>>,
    pub router: Arc<IoRouter>,
    pub resize: Arc<ResizeCoordinator>,
    pub terminal: Arc<Terminal>,
    pub consumer_id: SubscriberId,
}

/// Handles needed by the in-process console viewer.
pub struct ConsoleContext {
    pub session_id: String,
    pub terminal: Arc<Terminal>,
    pub router: Arc<IoRouter>,
    pub muted: Arc<AtomicBool>,
}

/// Consumer forwarding PTY output to one local WS viewer's channel.
struct WsForwardConsumer {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Consumer for WsForwardConsumer {
    fn name(&self) -> &'static str {
        "local-ws"
    }

    fn on_output(&self, data: &Bytes) -> anyhow::Result<()> {
        // A closed channel just means the viewer is gone; unsubscription is
        // on its way.
        let _ = self.tx.send(data.clone());
        Ok(())
    }
}

pub struct SessionBroker {
    settings: BrokerSettings,
    store: Arc<dyn SessionStore>,
    planner: Arc<dyn CommandPlanner>,
    active: Arc<Mutex<Option<ActiveSession>>>,
    /// Serializes start/stop; never held while the singleton lock is.
    start_gate: tokio::sync::Mutex<()>,
    viewer_seq: AtomicU64,
}

impl SessionBroker {
    pub fn new(
        settings: BrokerSettings,
        store: Arc<dyn SessionStore>,
        planner: Arc<dyn CommandPlanner>,
    ) -> Self {
        Self {
            settings,
            store,
            planner,
            active: Arc::new(Mutex::new(None)),
            start_gate: tokio::sync::Mutex::new(()),
            viewer_seq: AtomicU64::new(1),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.meta.session_id.clone())
    }

    /// Handles for the in-process console viewer.
    pub fn console_context(&self) -> Option<ConsoleContext> {
        let guard = self.active.lock();
        guard.as_ref().map(|a| ConsoleContext {
            session_id: a.meta.session_id.clone(),
            terminal: Arc::clone(&a.terminal),
            router: Arc::clone(&a.router),
            muted: Arc::clone(&a.console_muted),
        })
    }

    /// Start a new session. Refuses with `AlreadyActive` while one is
    /// running; any failure after the PTY spawn disposes the partial state
    /// before surfacing.
    pub async fn start(&self, request: StartRequest) -> anyhow::Result<SessionMeta> {
        let _gate = self.start_gate.lock().await;
        if self.active.lock().is_some() {
            return Err(ErrorCode::AlreadyActive.into());
        }

        let plan = self.planner.plan(&request)?;
        let session_id = new_session_id();
        let launch = PtyLaunch {
            shell: plan.shell,
            command: plan.command,
            cols: self.settings.cols,
            rows: self.settings.rows,
            cwd: request.working_dir.clone(),
            env: plan.env,
            title: plan.title.clone(),
        };

        let terminal = Arc::new(
            Terminal::spawn(&launch, self.settings.replay_capacity)
                .await
                .map_err(|e| e.context(ErrorCode::SpawnFailed))?,
        );

        let meta = SessionMeta {
            session_id: session_id.clone(),
            cli: request.cli,
            working_dir: request.working_dir.clone(),
            environment_name: request.environment_name.clone(),
            title: plan.title,
            owner: request.owner,
            remote_enabled: request.enable_remote && self.settings.relay.is_some(),
            started_at_ms: epoch_ms(),
        };

        if let Err(e) = self.store.create_session(&meta) {
            warn!(session_id = %session_id, err = %e, "failed to create session record");
        }
        if let Some(ref text) = request.initial_input {
            if let Err(e) = self.store.record_initial_input(&session_id, text) {
                warn!(session_id = %session_id, err = %e, "failed to record initial input");
            }
        }

        let accumulator = Arc::new(InputAccumulator::new(
            Arc::clone(&self.store),
            session_id.clone(),
        ));
        let router = Arc::new(IoRouter::new(
            Arc::clone(&terminal),
            Arc::clone(&accumulator),
            Arc::clone(&self.store),
            session_id.clone(),
            self.settings.log_output,
        ));
        let resize = Arc::new(ResizeCoordinator::new(
            Arc::clone(&terminal),
            Arc::clone(&self.store),
            session_id.clone(),
            self.settings.redraw_on_resize,
        ));

        terminal.subscribe(Arc::new(DbLoggingConsumer::new(Arc::clone(&router))));

        let console_muted = Arc::new(AtomicBool::new(false));
        let remote = if meta.remote_enabled {
            match &self.settings.relay {
                Some(relay) => {
                    self.open_remote(relay, &meta, &terminal, &router, &resize, &console_muted)
                        .await
                }
                None => None,
            }
        } else {
            None
        };

        let completed = Arc::new(AtomicBool::new(false));
        *self.active.lock() = Some(ActiveSession {
            meta: meta.clone(),
            terminal: Arc::clone(&terminal),
            router,
            resize,
            accumulator: Arc::clone(&accumulator),
            remote: remote.clone(),
            local_ws: None,
            completed: Arc::clone(&completed),
            console_muted,
        });

        self.spawn_exit_watcher(&meta, &terminal, accumulator, remote, completed);

        if let Err(e) = terminal.start_read_loop() {
            // Fatal to this session: dispose the partial state before
            // surfacing.
            *self.active.lock() = None;
            terminal.dispose().await;
            return Err(e);
        }
        info!(session_id = %session_id, cli = %meta.cli, "session started");
        Ok(meta)
    }

    /// Connect the remote relay and wire its callbacks. Failures are
    /// transient: the session continues without remote viewing.
    async fn open_remote(
        &self,
        relay: &RelayConfig,
        meta: &SessionMeta,
        terminal: &Arc<Terminal>,
        router: &Arc<IoRouter>,
        resize: &Arc<ResizeCoordinator>,
        console_muted: &Arc<AtomicBool>,
    ) -> Option<Arc<RemoteConnection>> {
        let session_id = meta.session_id.clone();

        // The connection does not exist until after the handshake, but the
        // replay callback needs it, so a one-shot slot breaks the cycle.
        let conn_slot: Arc<OnceLock<Arc<RemoteConnection>>> = Arc::new(OnceLock::new());

        let mut callbacks = RemoteCallbacks::default();
        {
            let terminal = Arc::clone(terminal);
            let slot = Arc::clone(&conn_slot);
            let active = Arc::clone(&self.active);
            let muted = Arc::clone(console_muted);
            callbacks.on_replay_requested = Some(Arc::new(move || {
                // A browser attached upstream: ship the current screen and
                // enforce the single-viewer rule from the remote side.
                if let Some(conn) = slot.get() {
                    conn.queue_output(Bytes::from(terminal.replay_snapshot()));
                }
                muted.store(true, Ordering::Release);
                let viewer = active.lock().as_mut().and_then(|a| a.local_ws.take());
                if let Some(viewer) = viewer {
                    viewer.close(REMOTE_TAKEOVER_REASON);
                }
            }));
        }
        {
            let muted = Arc::clone(console_muted);
            callbacks.on_browser_disconnected = Some(Arc::new(move || {
                muted.store(false, Ordering::Release);
            }));
        }
        {
            let resize = Arc::clone(resize);
            callbacks.on_resize_requested = Some(Arc::new(move |cols, rows| {
                if let Err(e) = resize.apply_resize(cols, rows, InputSource::RemoteWebUi) {
                    debug!(err = %e, "remote resize rejected");
                }
            }));
        }
        {
            let store = Arc::clone(&self.store);
            let sid = session_id.clone();
            callbacks.on_command_received = Some(Arc::new(move |name, payload| {
                if let Err(e) = store.record_remote_command(&sid, name, payload) {
                    warn!(session_id = %sid, err = %e, "failed to record remote command");
                }
            }));
        }
        {
            // Remote input funnels through one ordered pump so bytes reach
            // the PTY in arrival order.
            let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Bytes>();
            let router = Arc::clone(router);
            tokio::spawn(async move {
                while let Some(data) = input_rx.recv().await {
                    if let Err(e) = router.route_input(&data, InputSource::RemoteWebUi).await {
                        debug!(err = %e, "remote input dropped");
                        break;
                    }
                }
            });
            callbacks.on_input_received = Some(Arc::new(move |data: Bytes| {
                let _ = input_tx.send(data);
            }));
        }

        match RemoteConnection::connect(relay, &session_id, callbacks).await {
            Ok(conn) => {
                let _ = conn_slot.set(Arc::clone(&conn));
                terminal.subscribe(Arc::new(RemoteOutputConsumer::new(Arc::clone(&conn))));

                let body = RegisterBody::from_meta(meta, &self.settings.host_url);
                let frontend = relay.frontend_url.clone();
                let api_key = relay.api_key.clone();
                tokio::spawn(async move {
                    register::register(&frontend, &api_key, &body).await;
                });

                Some(conn)
            }
            Err(e) => {
                warn!(session_id = %session_id, err = %e, "remote relay unavailable, continuing without it");
                None
            }
        }
    }

    /// Watch for PTY exit: complete the session exactly once, withdraw the
    /// remote registration, and clear the singletons.
    fn spawn_exit_watcher(
        &self,
        meta: &SessionMeta,
        terminal: &Arc<Terminal>,
        accumulator: Arc<InputAccumulator>,
        remote: Option<Arc<RemoteConnection>>,
        completed: Arc<AtomicBool>,
    ) {
        let terminal = Arc::clone(terminal);
        let store = Arc::clone(&self.store);
        let active = Arc::clone(&self.active);
        let session_id = meta.session_id.clone();
        let relay = self.settings.relay.clone();

        tokio::spawn(async move {
            let status = terminal.wait_exited().await;

            if !completed.swap(true, Ordering::AcqRel) {
                accumulator.flush().await;
                if let Err(e) = store.complete_session(&session_id, status.report_code()) {
                    warn!(session_id = %session_id, err = %e, "failed to complete session record");
                }
                info!(session_id = %session_id, code = status.report_code(), "session completed");
            }

            if let Some(conn) = remote {
                conn.dispose().await;
                if let Some(ref relay) = relay {
                    register::deregister(&relay.frontend_url, &relay.api_key, &session_id).await;
                }
            }

            // Clear the singletons if this session is still the active one,
            // closing any attached local viewer on the way out.
            let viewer = {
                let mut guard = active.lock();
                match guard.as_ref() {
                    Some(a) if a.meta.session_id == session_id => {
                        guard.take().and_then(|mut a| a.local_ws.take())
                    }
                    _ => None,
                }
            };
            if let Some(viewer) = viewer {
                viewer.close("Session ended");
            }
        });
    }

    /// Stop the active session. External owners are left alone.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let _gate = self.start_gate.lock().await;
        let (terminal, accumulator, completed, session_id, owner) = {
            let guard = self.active.lock();
            let Some(a) = guard.as_ref() else {
                return Err(ErrorCode::NotActive.into());
            };
            (
                Arc::clone(&a.terminal),
                Arc::clone(&a.accumulator),
                Arc::clone(&a.completed),
                a.meta.session_id.clone(),
                a.meta.owner,
            )
        };

        if owner == OwnerKind::External {
            debug!(session_id = %session_id, "stop ignored for externally-owned session");
            return Ok(());
        }

        if !completed.swap(true, Ordering::AcqRel) {
            accumulator.flush().await;
            if let Err(e) = self.store.complete_session(&session_id, 0) {
                warn!(session_id = %session_id, err = %e, "failed to complete session record");
            }
            info!(session_id = %session_id, code = 0, "session stopped");
        }

        terminal.dispose().await;
        Ok(())
    }

    /// Install a new local WebSocket viewer, evicting the previous one and
    /// requesting the remote browser disconnect. Returns the context the WS
    /// task runs with; the caller owns the socket I/O.
    pub fn begin_local_attach(&self) -> Result<AttachContext, ErrorCode> {
        let (ctx, remote) = {
            let mut guard = self.active.lock();
            let Some(a) = guard.as_mut() else {
                return Err(ErrorCode::NotActive);
            };

            let viewer_id = self.viewer_seq.fetch_add(1, Ordering::Relaxed);
            let (data_tx, data_rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let close_reason = Arc::new(Mutex::new(None));

            let prev = a.local_ws.replace(LocalViewer {
                id: viewer_id,
                cancel: cancel.clone(),
                close_reason: Arc::clone(&close_reason),
            });
            if let Some(prev) = prev {
                prev.close(LOCAL_TAKEOVER_REASON);
            }

            let replay = a.terminal.replay_snapshot();
            let consumer_id = a.terminal.subscribe(Arc::new(WsForwardConsumer { tx: data_tx }));

            (
                AttachContext {
                    viewer_id,
                    session_id: a.meta.session_id.clone(),
                    replay,
                    data_rx,
                    cancel,
                    close_reason,
                    router: Arc::clone(&a.router),
                    resize: Arc::clone(&a.resize),
                    terminal: Arc::clone(&a.terminal),
                    consumer_id,
                },
                a.remote.clone(),
            )
        };

        // Best-effort: the remote browser disconnects asynchronously.
        if let Some(conn) = remote {
            tokio::spawn(async move {
                conn.send_control(ControlFrame::disconnect_browser(REMOTE_DISCONNECT_REASON))
                    .await;
            });
        }

        Ok(ctx)
    }

    /// Called by the WS task on the way out. Removes the viewer slot only
    /// if it still belongs to this viewer.
    pub fn end_local_attach(&self, viewer_id: u64) {
        let mut guard = self.active.lock();
        if let Some(a) = guard.as_mut() {
            if a.local_ws.as_ref().is_some_and(|v| v.id == viewer_id) {
                a.local_ws = None;
            }
        }
    }
}

impl std::fmt::Debug for SessionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBroker")
            .field("active", &self.active_session_id())
            .finish()
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
