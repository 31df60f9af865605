// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured refusal codes surfaced over the HTTP and WebSocket transports.
///
/// Internal propagation uses `anyhow`; these codes exist for the cases where
/// a caller needs a machine-readable reason (start-while-active, write after
/// exit, oversize frame) rather than a stack of context strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A session is already active; at most one terminal per broker.
    AlreadyActive,
    /// The operation needs an active terminal and there is none.
    NotActive,
    /// The terminal's PTY has exited; writes and resizes are rejected.
    Closed,
    /// PTY or child process creation failed.
    SpawnFailed,
    /// A WebSocket message exceeded the per-message size limit.
    Oversize,
    /// Malformed request or control frame.
    BadRequest,
    /// Missing or wrong session token.
    Unauthorized,
    /// Tab limit reached or tab not found.
    TabUnavailable,
    /// Anything else.
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AlreadyActive => 409,
            Self::NotActive => 409,
            Self::Closed => 410,
            Self::SpawnFailed => 500,
            Self::Oversize => 413,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::TabUnavailable => 404,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyActive => "ALREADY_ACTIVE",
            Self::NotActive => "NOT_ACTIVE",
            Self::Closed => "CLOSED",
            Self::SpawnFailed => "SPAWN_FAILED",
            Self::Oversize => "OVERSIZE",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::TabUnavailable => "TAB_UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorCode {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
