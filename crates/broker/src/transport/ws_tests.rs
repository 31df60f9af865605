// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live attach-endpoint tests over a real listener and real PTY sessions.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::transport::{build_router, HostState, DEFAULT_PULSE_TTL};
use crate::broker::{BrokerSettings, SessionBroker, StartRequest, LOCAL_TAKEOVER_REASON};
use crate::session::CliKind;
use crate::test_support::{RecordingStore, StaticPlanner, StoreEvent};
use crate::watchdog::LifecycleWatchdog;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(10);

struct Host {
    state: Arc<HostState>,
    store: Arc<RecordingStore>,
    ws_url: String,
}

impl Host {
    async fn spawn(command: &str) -> anyhow::Result<Self> {
        let store = RecordingStore::new();
        let broker = Arc::new(SessionBroker::new(
            BrokerSettings::default(),
            Arc::clone(&store) as _,
            StaticPlanner::new(command),
        ));
        let state = Arc::new(HostState {
            broker,
            watchdog: Arc::new(LifecycleWatchdog::new()),
            session_token: None,
            default_workdir: std::env::temp_dir(),
            pulse_ttl: DEFAULT_PULSE_TTL,
            command_override: None,
        });

        let router = build_router(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            state,
            store,
            ws_url: format!("ws://{addr}/api/v1/terminal/ws"),
        })
    }

    async fn start_session(&self) -> anyhow::Result<()> {
        let request = StartRequest::new(CliKind::Claude, std::env::temp_dir());
        self.state.broker.start(request).await?;
        Ok(())
    }

    /// Wait until the session's replay buffer contains the marker.
    async fn wait_replay_contains(&self, marker: &str) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            if let Some(ctx) = self.state.broker.console_context() {
                let replay = ctx.terminal.replay_snapshot();
                if String::from_utf8_lossy(&replay).contains(marker) {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("replay never contained {marker:?}");
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn connect(&self) -> anyhow::Result<Client> {
        let (client, _) = tokio_tungstenite::connect_async(self.ws_url.as_str()).await?;
        Ok(client)
    }

    async fn shutdown(&self) {
        let _ = self.state.broker.stop().await;
    }
}

async fn next_message(client: &mut Client) -> anyhow::Result<Message> {
    match tokio::time::timeout(TIMEOUT, client.next()).await {
        Ok(Some(Ok(msg))) => Ok(msg),
        Ok(Some(Err(e))) => anyhow::bail!("socket error: {e}"),
        Ok(None) => anyhow::bail!("socket closed"),
        Err(_) => anyhow::bail!("timed out waiting for a message"),
    }
}

/// Read until a close frame (or the stream ends). Returns the close reason
/// if one was delivered.
async fn read_until_close(client: &mut Client) -> anyhow::Result<Option<String>> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("no close frame before timeout");
        }
        match tokio::time::timeout(TIMEOUT, client.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => {
                return Ok(frame.map(|f| f.reason.to_string()));
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => return Ok(None),
            Err(_) => anyhow::bail!("no close frame before timeout"),
        }
    }
}

#[tokio::test]
async fn attach_without_session_is_refused() -> anyhow::Result<()> {
    let host = Host::spawn("true").await?;
    let mut client = host.connect().await?;

    let msg = next_message(&mut client).await?;
    assert!(matches!(msg, Message::Close(_)), "expected close, got {msg:?}");
    Ok(())
}

#[tokio::test]
async fn first_frame_is_the_replay_snapshot() -> anyhow::Result<()> {
    let host = Host::spawn("echo ready; cat").await?;
    host.start_session().await?;
    host.wait_replay_contains("ready").await?;

    let mut client = host.connect().await?;
    let msg = next_message(&mut client).await?;
    match msg {
        Message::Binary(data) => {
            assert!(String::from_utf8_lossy(&data).contains("ready"));
        }
        other => anyhow::bail!("expected binary replay, got {other:?}"),
    }

    host.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn new_viewer_takes_over_the_previous_one() -> anyhow::Result<()> {
    let host = Host::spawn("echo ready; cat").await?;
    host.start_session().await?;
    host.wait_replay_contains("ready").await?;

    let mut viewer_a = host.connect().await?;
    let _ = next_message(&mut viewer_a).await?; // replay

    let mut viewer_b = host.connect().await?;

    let reason = read_until_close(&mut viewer_a).await?;
    assert_eq!(reason.as_deref(), Some(LOCAL_TAKEOVER_REASON));

    // The newcomer is served normally, replay first.
    let msg = next_message(&mut viewer_b).await?;
    assert!(matches!(msg, Message::Binary(_)));

    host.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn viewer_input_reaches_the_pty() -> anyhow::Result<()> {
    let host = Host::spawn("cat").await?;
    host.start_session().await?;

    let mut client = host.connect().await?;
    let _ = next_message(&mut client).await?; // replay

    client.send(Message::Binary(Bytes::from_static(b"marker-7\r"))).await?;

    // cat echoes through the PTY; the broker's replay sees it.
    host.wait_replay_contains("marker-7").await?;

    host.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn resize_frame_is_applied_not_forwarded() -> anyhow::Result<()> {
    let host = Host::spawn("cat").await?;
    host.start_session().await?;

    let mut client = host.connect().await?;
    let _ = next_message(&mut client).await?;

    client.send(Message::Text("__resize__:80,24".into())).await?;
    client.send(Message::Binary(Bytes::from_static(b"ls\r"))).await?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let events = host.store.events();
        if events.iter().any(|e| {
            matches!(e, StoreEvent::Resize { cols: 80, rows: 24, .. })
        }) {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("resize was never recorded; events: {events:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    host.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn out_of_range_resize_falls_through_as_input() -> anyhow::Result<()> {
    let host = Host::spawn("cat").await?;
    host.start_session().await?;

    let mut client = host.connect().await?;
    let _ = next_message(&mut client).await?;

    client.send(Message::Text("__resize__:9,4".into())).await?;

    // Forwarded to the PTY as literal text, so cat echoes it back.
    host.wait_replay_contains("__resize__:9,4").await?;
    assert!(host.store.events().iter().all(|e| !matches!(e, StoreEvent::Resize { .. })));

    host.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn oversize_message_kills_the_connection_not_the_terminal() -> anyhow::Result<()> {
    let host = Host::spawn("echo ready; cat").await?;
    host.start_session().await?;
    host.wait_replay_contains("ready").await?;

    let mut client = host.connect().await?;
    let _ = next_message(&mut client).await?;

    let oversize = "x".repeat(300 * 1024);
    // The server may drop the connection mid-send; either way it must not
    // take the terminal down.
    let _ = client.send(Message::Text(oversize.into())).await;
    let _ = read_until_close(&mut client).await;

    assert!(host.state.broker.is_active(), "terminal must survive the bad viewer");

    // A fresh attach still works.
    let mut replacement = host.connect().await?;
    let msg = next_message(&mut replacement).await?;
    assert!(matches!(msg, Message::Binary(_)));

    host.shutdown().await;
    Ok(())
}
