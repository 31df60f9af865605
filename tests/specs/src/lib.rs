// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `viberails` binary as a subprocess and exercises it
//! over HTTP and WebSocket.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `viberails` binary.
pub fn viberails_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("viberails")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `viberails` process, killed on drop.
pub struct BrokerProcess {
    child: Child,
    port: u16,
}

impl BrokerProcess {
    /// Start a broker host on a fresh port with the given CLI invocation
    /// override.
    pub fn start(command_override: &str) -> anyhow::Result<Self> {
        ensure_crypto();
        let port = free_port()?;
        let child = Command::new(viberails_binary())
            .arg("--port")
            .arg(port.to_string())
            .arg("--command")
            .arg(command_override)
            .arg("--workdir")
            .arg(std::env::temp_dir())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Self { child, port })
    }

    /// Start a tab-host supervisor.
    pub fn start_tab_host() -> anyhow::Result<Self> {
        ensure_crypto();
        let port = free_port()?;
        let child = Command::new(viberails_binary())
            .arg("--serve-tabs")
            .arg("--port")
            .arg(port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Self { child, port })
    }

    /// Start a tab child directly and return (process, announced bootstrap
    /// URL).
    pub fn start_child() -> anyhow::Result<(Self, String)> {
        ensure_crypto();
        let mut child = Command::new(viberails_binary())
            .arg("--child")
            .arg("--parent-pid")
            .arg(std::process::id().to_string())
            .arg("--port")
            .arg("0")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout =
            child.stdout.take().ok_or_else(|| anyhow::anyhow!("child stdout not piped"))?;
        let mut lines = BufReader::new(stdout).lines();
        let url = loop {
            let line = lines
                .next()
                .ok_or_else(|| anyhow::anyhow!("child exited before announcing"))??;
            if let Some(url) = line.strip_prefix("vs-code-v1=") {
                break url.to_owned();
            }
        };

        let port = url
            .rsplit_once(':')
            .and_then(|(_, rest)| rest.split('/').next())
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("no port in bootstrap URL: {url}"))?;

        Ok((Self { child, port }, url))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/api/v1/terminal/ws", self.port)
    }

    /// Poll `IsLocal` until the host answers.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let url = format!("{}/api/v1/IsLocal", self.base_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(resp) = reqwest::get(&url).await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("host never became healthy on {url}");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Drop for BrokerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
