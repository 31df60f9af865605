// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level host wiring shared by `main` and the integration tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::broker::{BrokerSettings, SessionBroker, ShellPlanner, StartRequest};
use crate::config::Config;
use crate::console;
use crate::remote::conn::RelayConfig;
use crate::session::OwnerKind;
use crate::store::{NullStore, SessionStore};
use crate::tabhost::{build_tab_router, TabHost, TabHostConfig};
use crate::transport::{build_router, HostState, DEFAULT_PULSE_TTL};
use crate::watchdog::{LifecycleWatchdog, CHECK_PERIOD};

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so repeated calls (e.g. from tests) are harmless.
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / VIBERAILS_LOG_LEVEL > RUST_LOG > "info".
    let filter = if std::env::var("VIBERAILS_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Everything goes to stderr: in child mode, stdout carries exactly one
    // bootstrap announcement line.
    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

/// Install the ring crypto provider for reqwest/rustls. Safe to call more
/// than once.
pub fn install_crypto() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Run the configured mode to completion. Returns the process exit code.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    init_tracing(&config);
    install_crypto();

    if config.serve_tabs {
        run_tab_host(config).await
    } else {
        run_broker(config, Arc::new(NullStore)).await
    }
}

/// A broker host bound to its listener, ready to serve. Split from
/// [`run_broker`] so tests can reach the state before the host runs.
pub struct PreparedHost {
    pub state: Arc<HostState>,
    pub broker: Arc<SessionBroker>,
    pub shutdown: CancellationToken,
    pub port: u16,
    listener: TcpListener,
}

/// Bind the listener and assemble the broker host.
pub async fn prepare_broker(
    config: &Config,
    store: Arc<dyn SessionStore>,
) -> anyhow::Result<PreparedHost> {
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let port = listener.local_addr()?.port();
    let host_url = format!("http://127.0.0.1:{port}");

    let relay = match (&config.frontend_url, &config.api_key) {
        (Some(frontend_url), Some(api_key)) => Some(RelayConfig {
            frontend_url: frontend_url.clone(),
            api_key: api_key.clone(),
        }),
        _ => None,
    };

    let settings = BrokerSettings {
        cols: config.cols,
        rows: config.rows,
        replay_capacity: config.replay_size,
        relay,
        host_url,
        log_output: config.log_output,
        redraw_on_resize: config.redraw_on_resize,
    };

    let broker = Arc::new(SessionBroker::new(settings, store, Arc::new(ShellPlanner)));

    // Tab children mint a bootstrap token; standalone local hosts skip the
    // check.
    let session_token = config.child.then(|| uuid::Uuid::new_v4().to_string());

    let state = Arc::new(HostState {
        broker: Arc::clone(&broker),
        watchdog: Arc::new(LifecycleWatchdog::new()),
        session_token,
        default_workdir: config.workdir_or_cwd()?,
        pulse_ttl: DEFAULT_PULSE_TTL,
        command_override: config.command.clone(),
    });

    Ok(PreparedHost { state, broker, shutdown, port, listener })
}

async fn run_broker(config: Config, store: Arc<dyn SessionStore>) -> anyhow::Result<i32> {
    let prepared = prepare_broker(&config, store).await?;
    let PreparedHost { state, broker, shutdown, port, listener } = prepared;

    let router = build_router(Arc::clone(&state));
    info!(port, "broker listening");
    {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let result =
                axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
            if let Err(e) = result {
                error!("HTTP server error: {e}");
            }
        });
    }

    // The supervisor handshake: exactly one announcement line on stdout.
    if config.child {
        println!("vs-code-v1=http://127.0.0.1:{port}/bootstrap");
    }

    // Stop when the supervising parent goes away.
    if let Some(parent_pid) = config.parent_pid {
        spawn_parent_watch(parent_pid, shutdown.clone());
    }

    // Idle watchdog, except in foreground CLI mode.
    if !config.foreground {
        let watchdog = Arc::clone(&state.watchdog);
        let _ = watchdog
            .spawn_with(CHECK_PERIOD, config.idle_limit(), shutdown.clone());
    }

    spawn_signal_handler(shutdown.clone());

    if config.foreground {
        let request = StartRequest {
            cli: config.cli_kind()?,
            working_dir: config.workdir_or_cwd()?,
            environment_name: config.environment_name.clone(),
            title: None,
            initial_input: None,
            owner: OwnerKind::Local,
            enable_remote: config.remote,
            command_override: config.command.clone(),
        };
        broker.start(request).await?;

        if let Some(ctx) = broker.console_context() {
            console::run(ctx, shutdown.clone()).await?;
        }
        // Console ended: session exit, detach, or shutdown. Stop what's
        // left and wind down.
        let _ = broker.stop().await;
        shutdown.cancel();
        return Ok(0);
    }

    shutdown.cancelled().await;
    let _ = broker.stop().await;
    Ok(0)
}

async fn run_tab_host(config: Config) -> anyhow::Result<i32> {
    let shutdown = CancellationToken::new();

    let exe = std::env::current_exe()?;
    let host = TabHost::new(TabHostConfig { exe, max_tabs: config.max_tabs });

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let port = listener.local_addr()?.port();
    info!(port, max_tabs = config.max_tabs, "tab host listening");

    let router = build_tab_router(Arc::clone(&host));
    {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let result =
                axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
            if let Err(e) = result {
                error!("HTTP server error: {e}");
            }
        });
    }

    spawn_signal_handler(shutdown.clone());
    shutdown.cancelled().await;

    // Take the tabs down with us.
    for entry in host.list().await {
        let _ = host.delete_tab(&entry.tab_id).await;
    }
    Ok(0)
}

/// Cancel the shutdown token once the parent process disappears.
fn spawn_parent_watch(parent_pid: u32, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let pid = nix::unistd::Pid::from_raw(parent_pid as i32);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
            // Signal 0 probes existence without delivering anything.
            if nix::sys::signal::kill(pid, None).is_err() {
                info!(parent_pid, "parent process gone, shutting down");
                shutdown.cancel();
                return;
            }
        }
    });
}

/// First SIGTERM/SIGINT: graceful shutdown. Second: force exit.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
