// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort session registration with the remote frontend.
//!
//! Registration makes the session discoverable to remote browsers;
//! deregistration removes it on completion. Both are advisory: failures
//! are logged and ignored, the session runs fine without them.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::session::SessionMeta;

/// Body of the registration call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub session_id: String,
    pub cli: String,
    pub working_directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub host_url: String,
}

impl RegisterBody {
    pub fn from_meta(meta: &SessionMeta, host_url: &str) -> Self {
        Self {
            session_id: meta.session_id.clone(),
            cli: meta.cli.as_str().to_owned(),
            working_directory: meta.working_dir.display().to_string(),
            environment_name: meta.environment_name.clone(),
            title: meta.title.clone(),
            host_url: host_url.to_owned(),
        }
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

fn terminal_url(frontend_url: &str) -> String {
    format!("{}/api/v1/terminal", frontend_url.trim_end_matches('/'))
}

/// `POST <frontend>/api/v1/terminal` to announce the session.
pub async fn register(frontend_url: &str, api_key: &str, body: &RegisterBody) {
    let client = http_client();
    let result = client
        .post(terminal_url(frontend_url))
        .header("X-Api-Key", api_key)
        .json(body)
        .send()
        .await
        .and_then(|resp| resp.error_for_status());
    match result {
        Ok(_) => info!(session_id = %body.session_id, "registered session with frontend"),
        Err(e) => warn!(session_id = %body.session_id, err = %e, "session registration failed"),
    }
}

/// `DELETE <frontend>/api/v1/terminal` to withdraw the session.
pub async fn deregister(frontend_url: &str, api_key: &str, session_id: &str) {
    let client = http_client();
    let body = serde_json::json!({ "sessionId": session_id });
    let result = client
        .delete(terminal_url(frontend_url))
        .header("X-Api-Key", api_key)
        .json(&body)
        .send()
        .await
        .and_then(|resp| resp.error_for_status());
    match result {
        Ok(_) => debug!(session_id = %session_id, "deregistered session from frontend"),
        Err(e) => warn!(session_id = %session_id, err = %e, "session deregistration failed"),
    }
}

#[cfg(test)]
#[path = "register_tests.rs"]
mod tests;
