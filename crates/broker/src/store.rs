// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Opaque session persistence sink.
//!
//! The broker never sees the store's schema; it only pushes events. Calls
//! are synchronous fire-and-forget: implementations must be cheap on the
//! calling task and do their real work elsewhere. A failed write is the
//! store's problem; callers log and continue, never blocking I/O on it.

use crate::session::{InputSource, SessionMeta};

/// Event sink for session history.
pub trait SessionStore: Send + Sync {
    /// A new session has started.
    fn create_session(&self, meta: &SessionMeta) -> anyhow::Result<()>;

    /// The prompt text the session was launched with, if any.
    fn record_initial_input(&self, session_id: &str, text: &str) -> anyhow::Result<()>;

    /// Raw PTY output. Only called when output logging is enabled.
    fn log_output(&self, session_id: &str, data: &[u8]) -> anyhow::Result<()>;

    /// One logical chunk of user input, already debounced by the
    /// accumulator.
    fn record_user_input(
        &self,
        session_id: &str,
        text: &str,
        source: InputSource,
    ) -> anyhow::Result<()>;

    /// The terminal was resized.
    fn record_resize(
        &self,
        session_id: &str,
        cols: u16,
        rows: u16,
        source: InputSource,
    ) -> anyhow::Result<()>;

    /// An opaque custom command arrived over the remote relay.
    fn record_remote_command(
        &self,
        session_id: &str,
        name: &str,
        payload: Option<&str>,
    ) -> anyhow::Result<()>;

    /// The session ended. Called exactly once per `create_session`.
    fn complete_session(&self, session_id: &str, exit_code: i32) -> anyhow::Result<()>;
}

/// Store that drops everything. Used when persistence is not configured.
#[derive(Debug, Default)]
pub struct NullStore;

impl SessionStore for NullStore {
    fn create_session(&self, _meta: &SessionMeta) -> anyhow::Result<()> {
        Ok(())
    }

    fn record_initial_input(&self, _session_id: &str, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn log_output(&self, _session_id: &str, _data: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn record_user_input(
        &self,
        _session_id: &str,
        _text: &str,
        _source: InputSource,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn record_resize(
        &self,
        _session_id: &str,
        _cols: u16,
        _rows: u16,
        _source: InputSource,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn record_remote_command(
        &self,
        _session_id: &str,
        _name: &str,
        _payload: Option<&str>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn complete_session(&self, _session_id: &str, _exit_code: i32) -> anyhow::Result<()> {
        Ok(())
    }
}
