// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session identity and metadata shared across the broker, the store, and
//! the remote relay.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which CLI agent a session hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliKind {
    Claude,
    Codex,
    Gemini,
    Copilot,
}

impl CliKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Copilot => "copilot",
        }
    }

    /// The executable launched inside the PTY shell for this CLI kind.
    pub fn launch_command(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Copilot => "copilot",
        }
    }
}

impl std::str::FromStr for CliKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            "copilot" => Ok(Self::Copilot),
            other => anyhow::bail!("unknown CLI kind: {other}"),
        }
    }
}

impl fmt::Display for CliKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who controls the session's lifetime.
///
/// `External` sessions were started by an outside owner (e.g. the IDE
/// extension); `stop` requests from the web surface leave them alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Local,
    External,
}

/// Where an input byte entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Unknown,
    LocalCli,
    LocalWebUi,
    RemoteWebUi,
    Pty,
}

impl InputSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::LocalCli => "local_cli",
            Self::LocalWebUi => "local_web_ui",
            Self::RemoteWebUi => "remote_web_ui",
            Self::Pty => "pty",
        }
    }
}

/// Immutable metadata describing one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub cli: CliKind,
    pub working_dir: PathBuf,
    pub environment_name: Option<String>,
    pub title: Option<String>,
    pub owner: OwnerKind,
    pub remote_enabled: bool,
    /// UTC epoch milliseconds at session start.
    pub started_at_ms: u64,
}

/// Generate a new opaque session ID.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
