// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-tab supervisor.
//!
//! Each tab is a child process of this same executable running one broker.
//! The supervisor handles the bootstrap handshake (stdout line → health
//! poll → session cookie), keeps the tab map, and proxies browser
//! WebSockets through to the child.

pub mod proxy;
pub mod spawn;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::sync::{RwLock, Semaphore};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ErrorCode;
use crate::session::epoch_ms;
use crate::transport::http::error_response;

/// Most tabs a supervisor will host.
pub const DEFAULT_MAX_TABS: usize = 8;

/// Grace between SIGTERM and SIGKILL when tearing a child down.
const KILL_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct TabHostConfig {
    /// Executable to spawn tabs from (normally `current_exe`).
    pub exe: PathBuf,
    pub max_tabs: usize,
}

/// One running tab.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabEntry {
    pub tab_id: String,
    pub pid: u32,
    pub port: u16,
    pub bootstrap_url: String,
    #[serde(skip_serializing)]
    pub session_token: String,
    pub created_utc: u64,
}

pub struct TabHost {
    config: TabHostConfig,
    tabs: RwLock<HashMap<String, Arc<TabEntry>>>,
    /// Single-admission gate: one tab bootstraps at a time.
    admission: Semaphore,
}

impl TabHost {
    pub fn new(config: TabHostConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            tabs: RwLock::new(HashMap::new()),
            admission: Semaphore::new(1),
        })
    }

    pub async fn list(&self) -> Vec<Arc<TabEntry>> {
        self.tabs.read().await.values().cloned().collect()
    }

    pub async fn get(&self, tab_id: &str) -> Option<Arc<TabEntry>> {
        self.tabs.read().await.get(tab_id).cloned()
    }

    /// Spawn, bootstrap, and register a new tab. Atomic under the
    /// single-admission gate; a failed bootstrap leaves no child behind.
    pub async fn create_tab(self: &Arc<Self>) -> anyhow::Result<Arc<TabEntry>> {
        let _permit = self.admission.acquire().await?;

        if self.tabs.read().await.len() >= self.config.max_tabs {
            return Err(ErrorCode::TabUnavailable.into());
        }

        let booted = spawn::spawn_child(&self.config.exe).await?;
        let tab_id = uuid::Uuid::new_v4().to_string();
        let entry = Arc::new(TabEntry {
            tab_id: tab_id.clone(),
            pid: booted.pid,
            port: booted.port,
            bootstrap_url: booted.bootstrap_url,
            session_token: booted.session_token,
            created_utc: epoch_ms(),
        });
        self.tabs.write().await.insert(tab_id.clone(), Arc::clone(&entry));
        info!(tab_id = %tab_id, pid = booted.pid, port = booted.port, "tab created");

        // The watcher owns the child handle; the tab disappears from the
        // map when the process exits, however that happens.
        let host = Arc::clone(self);
        let mut child = booted.child;
        tokio::spawn(async move {
            let status = child.wait().await;
            match status {
                Ok(status) => {
                    info!(tab_id = %tab_id, code = ?status.code(), "tab child exited")
                }
                Err(e) => warn!(tab_id = %tab_id, err = %e, "tab child wait failed"),
            }
            host.tabs.write().await.remove(&tab_id);
        });

        Ok(entry)
    }

    /// Ask the child to stop its session, then terminate it.
    pub async fn delete_tab(&self, tab_id: &str) -> anyhow::Result<()> {
        let entry = self
            .tabs
            .write()
            .await
            .remove(tab_id)
            .ok_or(ErrorCode::TabUnavailable)?;

        // Best-effort graceful stop with the cached session token.
        let stop_url = format!("http://127.0.0.1:{}/api/v1/terminal/stop", entry.port);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        let result = client
            .post(&stop_url)
            .header(crate::transport::SESSION_COOKIE, &entry.session_token)
            .send()
            .await;
        if let Err(e) = result {
            warn!(tab_id = %tab_id, err = %e, "tab stop request failed");
        }

        kill_tree(entry.pid).await;
        info!(tab_id = %tab_id, "tab deleted");
        Ok(())
    }
}

/// Kill a child's whole process group: SIGTERM, grace, SIGKILL. Children
/// are spawned in their own group so the PTY descendants die too.
pub async fn kill_tree(pid: u32) {
    let group = Pid::from_raw(-(pid as i32));
    let _ = kill(group, Signal::SIGTERM);
    tokio::time::sleep(KILL_GRACE).await;
    let _ = kill(group, Signal::SIGKILL);
}

// -- HTTP surface -------------------------------------------------------------

/// Build the supervisor router.
pub fn build_tab_router(host: Arc<TabHost>) -> Router {
    Router::new()
        .route("/api/v1/IsLocal", get(is_local))
        .route("/api/v1/tabs", post(create_tab).get(list_tabs))
        .route("/api/v1/tabs/{tab_id}", delete(delete_tab))
        .route("/api/v1/tabs/{tab_id}/ws", get(tab_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(host)
}

async fn is_local() -> Response {
    Json(serde_json::json!({ "isLocal": true })).into_response()
}

async fn create_tab(State(host): State<Arc<TabHost>>) -> Response {
    match host.create_tab().await {
        Ok(entry) => Json(entry.as_ref().clone()).into_response(),
        Err(e) => {
            let code = e.downcast_ref::<ErrorCode>().copied().unwrap_or(ErrorCode::SpawnFailed);
            warn!(err = %e, "tab creation failed");
            error_response(code)
        }
    }
}

async fn list_tabs(State(host): State<Arc<TabHost>>) -> Response {
    let tabs: Vec<TabEntry> = host.list().await.iter().map(|t| t.as_ref().clone()).collect();
    Json(tabs).into_response()
}

async fn delete_tab(State(host): State<Arc<TabHost>>, Path(tab_id): Path<String>) -> Response {
    match host.delete_tab(&tab_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            let code = e.downcast_ref::<ErrorCode>().copied().unwrap_or(ErrorCode::Internal);
            error_response(code)
        }
    }
}

async fn tab_ws(
    State(host): State<Arc<TabHost>>,
    Path(tab_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(entry) = host.get(&tab_id).await else {
        return error_response(ErrorCode::TabUnavailable);
    };
    ws.max_message_size(crate::protocol::MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| async move {
            if let Err(e) = proxy::run(&entry, socket).await {
                warn!(tab_id = %entry.tab_id, err = %e, "tab proxy ended with error");
            }
        })
        .into_response()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
