// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tab child bootstrap handshake.
//!
//! A child announces itself with exactly one `vs-code-v1=<url>` line on
//! stdout; every other stdout line is treated as a log. The supervisor then
//! polls the child's readiness endpoint and harvests the session cookie
//! from the bootstrap URL.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::transport::SESSION_COOKIE;

/// Prefix of the child's announcement line.
pub const BOOTSTRAP_PREFIX: &str = "vs-code-v1=";

/// The announcement must appear within this window.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);

/// Readiness polling: attempts × interval.
pub const HEALTH_ATTEMPTS: u32 = 30;
pub const HEALTH_INTERVAL: Duration = Duration::from_millis(500);

/// A fully-bootstrapped child broker.
pub struct BootedChild {
    pub child: Child,
    pub pid: u32,
    pub port: u16,
    pub bootstrap_url: String,
    pub session_token: String,
}

/// Spawn a tab child and run the full handshake. On any failure the child
/// tree is killed before the error is returned.
pub async fn spawn_child(exe: &Path) -> anyhow::Result<BootedChild> {
    let parent_pid = std::process::id();
    let mut child = Command::new(exe)
        .arg("--child")
        .arg("--parent-pid")
        .arg(parent_pid.to_string())
        .arg("--port")
        .arg("0")
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .stdin(Stdio::null())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn tab child")?;
    let pid = child.id().context("tab child has no pid")?;

    match bootstrap(&mut child).await {
        Ok(handshake) => Ok(BootedChild {
            child,
            pid,
            port: handshake.port,
            bootstrap_url: handshake.bootstrap_url,
            session_token: handshake.session_token,
        }),
        Err(e) => {
            super::kill_tree(pid).await;
            let _ = child.wait().await;
            Err(e)
        }
    }
}

struct Handshake {
    port: u16,
    bootstrap_url: String,
    session_token: String,
}

async fn bootstrap(child: &mut Child) -> anyhow::Result<Handshake> {
    let stdout = child.stdout.take().context("tab child stdout not piped")?;

    let bootstrap_url = tokio::time::timeout(BOOTSTRAP_TIMEOUT, read_announcement(stdout))
        .await
        .context("tab child did not announce within the bootstrap window")??;

    let port = port_of(&bootstrap_url)
        .with_context(|| format!("bootstrap URL has no port: {bootstrap_url}"))?;

    wait_ready(port).await?;

    let session_token = harvest_cookie(&bootstrap_url).await?;

    Ok(Handshake { port, bootstrap_url, session_token })
}

/// Read stdout lines until the announcement shows up. Other lines are child
/// logs.
async fn read_announcement(stdout: tokio::process::ChildStdout) -> anyhow::Result<String> {
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        match line.strip_prefix(BOOTSTRAP_PREFIX) {
            Some(url) if !url.is_empty() => return Ok(url.to_owned()),
            _ => debug!(line = %line, "tab child stdout"),
        }
    }
    anyhow::bail!("tab child stdout closed before announcing")
}

/// Extract the port from the bootstrap URL.
pub fn port_of(bootstrap_url: &str) -> Option<u16> {
    url::Url::parse(bootstrap_url).ok()?.port()
}

/// Poll the child's readiness endpoint.
async fn wait_ready(port: u16) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap_or_default();
    let url = format!("http://127.0.0.1:{port}/api/v1/IsLocal");

    for _ in 0..HEALTH_ATTEMPTS {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        tokio::time::sleep(HEALTH_INTERVAL).await;
    }
    anyhow::bail!("tab child never became ready on port {port}")
}

/// GET the bootstrap URL and pull the session token out of `Set-Cookie`.
async fn harvest_cookie(bootstrap_url: &str) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_default();
    let resp = client.get(bootstrap_url).send().await?.error_for_status()?;

    for value in resp.headers().get_all(reqwest::header::SET_COOKIE) {
        let Ok(text) = value.to_str() else { continue };
        if let Some(token) = session_token_from_cookie(text) {
            return Ok(token);
        }
    }
    anyhow::bail!("bootstrap response did not set a {SESSION_COOKIE} cookie")
}

/// Parse `viberails_session=<token>[; ...]`, url-unescaping the token.
pub fn session_token_from_cookie(set_cookie: &str) -> Option<String> {
    let first = set_cookie.split(';').next()?.trim();
    let (name, value) = first.split_once('=')?;
    if name != SESSION_COOKIE || value.is_empty() {
        return None;
    }
    Some(percent_decode_str(value).decode_utf8().ok()?.into_owned())
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
