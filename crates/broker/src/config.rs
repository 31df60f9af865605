// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use crate::session::CliKind;

/// Terminal session broker for AI coding agents.
#[derive(Debug, Parser)]
#[command(name = "viberails", version, about)]
pub struct Config {
    /// HTTP port to listen on (0 = ephemeral).
    #[arg(long, env = "VIBERAILS_PORT", default_value = "0")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "VIBERAILS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// CLI agent kind (claude, codex, gemini, copilot).
    #[arg(long, env = "VIBERAILS_CLI", default_value = "claude")]
    pub cli: String,

    /// Working directory for sessions. Defaults to the current directory.
    #[arg(long, env = "VIBERAILS_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Environment profile name attached to session records.
    #[arg(long, env = "VIBERAILS_ENV_NAME")]
    pub environment_name: Option<String>,

    /// Terminal columns.
    #[arg(long, env = "VIBERAILS_COLS", default_value = "120")]
    pub cols: u16,

    /// Terminal rows.
    #[arg(long, env = "VIBERAILS_ROWS", default_value = "30")]
    pub rows: u16,

    /// Replay buffer size in bytes.
    #[arg(long, env = "VIBERAILS_REPLAY_SIZE", default_value = "16384")]
    pub replay_size: usize,

    /// Frontend base URL for remote viewing (enables the relay).
    #[arg(long, env = "VIBERAILS_FRONTEND_URL")]
    pub frontend_url: Option<String>,

    /// Pre-shared API key for the frontend.
    #[arg(long, env = "VIBERAILS_API_KEY")]
    pub api_key: Option<String>,

    /// Open the remote relay for sessions started from this host.
    #[arg(long, env = "VIBERAILS_REMOTE", default_value = "false")]
    pub remote: bool,

    /// Persist raw PTY output to the session store.
    #[arg(long, env = "VIBERAILS_LOG_OUTPUT", default_value = "false")]
    pub log_output: bool,

    /// Send a debounced Ctrl+L after resizes.
    #[arg(long, env = "VIBERAILS_REDRAW_ON_RESIZE", default_value = "false")]
    pub redraw_on_resize: bool,

    /// Foreground mode: start a session immediately and attach the console.
    /// Disables the idle watchdog.
    #[arg(long, env = "VIBERAILS_FOREGROUND", default_value = "false")]
    pub foreground: bool,

    /// Idle window in seconds before an unattended host stops.
    #[arg(long, env = "VIBERAILS_IDLE_TIMEOUT", default_value = "120")]
    pub idle_timeout: u64,

    /// Serve the multi-tab supervisor instead of a single broker.
    #[arg(long, env = "VIBERAILS_SERVE_TABS", default_value = "false")]
    pub serve_tabs: bool,

    /// Maximum number of tabs in supervisor mode.
    #[arg(long, env = "VIBERAILS_MAX_TABS", default_value = "8")]
    pub max_tabs: usize,

    /// Run as a tab child: print the bootstrap line and require the session
    /// cookie.
    #[arg(long, default_value = "false")]
    pub child: bool,

    /// PID of the supervising parent (set by the supervisor).
    #[arg(long)]
    pub parent_pid: Option<u32>,

    /// Log format (json or text).
    #[arg(long, env = "VIBERAILS_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "VIBERAILS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Override the planned CLI invocation (dev/testing).
    #[arg(long, env = "VIBERAILS_COMMAND")]
    pub command: Option<String>,
}

impl Config {
    pub fn cli_kind(&self) -> anyhow::Result<CliKind> {
        self.cli.parse()
    }

    pub fn workdir_or_cwd(&self) -> anyhow::Result<PathBuf> {
        match self.workdir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    pub fn idle_limit(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout)
    }

    /// Validate cross-field rules after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.cli_kind()?;

        if self.serve_tabs && self.child {
            anyhow::bail!("--serve-tabs and --child are mutually exclusive");
        }
        if self.serve_tabs && self.foreground {
            anyhow::bail!("--serve-tabs cannot run in the foreground console");
        }
        if self.remote && (self.frontend_url.is_none() || self.api_key.is_none()) {
            anyhow::bail!("--remote requires --frontend-url and --api-key");
        }
        if self.replay_size == 0 {
            anyhow::bail!("--replay-size must be positive");
        }
        if self.max_tabs == 0 {
            anyhow::bail!("--max-tabs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
