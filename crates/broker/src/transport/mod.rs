// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket surface of a broker host.
//!
//! Deliberately small: the routes the supervisor handshake needs
//! (`IsLocal`, bootstrap cookie, stop), session start, the viewer attach
//! endpoint, and the lifecycle heartbeat.

pub mod http;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broker::SessionBroker;
use crate::watchdog::LifecycleWatchdog;

/// Cookie (and header) carrying the per-process session token.
pub const SESSION_COOKIE: &str = "viberails_session";

/// How long one heartbeat keeps a pulse owner alive.
pub const DEFAULT_PULSE_TTL: Duration = Duration::from_secs(30);

/// Shared state behind the axum `State` extractor.
pub struct HostState {
    pub broker: Arc<SessionBroker>,
    pub watchdog: Arc<LifecycleWatchdog>,
    /// Per-process bootstrap token. `None` disables the check (local
    /// single-user mode).
    pub session_token: Option<String>,
    pub default_workdir: PathBuf,
    pub pulse_ttl: Duration,
    /// Host-level override of the planned CLI invocation (`--command`).
    pub command_override: Option<String>,
}

/// Build the broker host router.
pub fn build_router(state: Arc<HostState>) -> Router {
    Router::new()
        .route("/api/v1/IsLocal", get(http::is_local))
        .route("/bootstrap", get(http::bootstrap))
        .route("/api/v1/terminal/start", post(http::start_terminal))
        .route("/api/v1/terminal/stop", post(http::stop_terminal))
        .route("/api/v1/terminal/ws", get(ws::ws_handler))
        .route("/api/v1/heartbeat", post(http::heartbeat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Check the `viberails_session` cookie or header against the expected
/// token. No expected token means the check is disabled.
pub fn authorized(headers: &axum::http::HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else { return true };

    if let Some(value) = headers.get(SESSION_COOKIE).and_then(|v| v.to_str().ok()) {
        if value == expected {
            return true;
        }
    }

    if let Some(cookies) = headers.get(axum::http::header::COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE && value == expected {
                    return true;
                }
            }
        }
    }

    false
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
