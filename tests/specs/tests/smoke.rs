// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `viberails` binary and
//! exercise the HTTP surface, the viewer WebSocket, the child bootstrap
//! handshake, and the tab supervisor.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use viberails::protocol::ControlFrame;
use viberails_specs::BrokerProcess;

const TIMEOUT: Duration = Duration::from_secs(15);

async fn start_session(broker: &BrokerProcess) -> anyhow::Result<String> {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/v1/terminal/start", broker.base_url()))
        .json(&serde_json::json!({ "cli": "claude" }))
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = resp.json().await?;
    let session_id = body["sessionId"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("no sessionId in {body}"))?;
    Ok(session_id.to_owned())
}

// -- broker host --------------------------------------------------------------

#[tokio::test]
async fn is_local_answers() -> anyhow::Result<()> {
    let broker = BrokerProcess::start("true")?;
    broker.wait_healthy(TIMEOUT).await?;

    let body: serde_json::Value =
        reqwest::get(format!("{}/api/v1/IsLocal", broker.base_url())).await?.json().await?;
    assert_eq!(body["isLocal"], true);
    Ok(())
}

#[tokio::test]
async fn start_while_active_is_conflict() -> anyhow::Result<()> {
    let broker = BrokerProcess::start("sleep 30")?;
    broker.wait_healthy(TIMEOUT).await?;
    start_session(&broker).await?;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/v1/terminal/start", broker.base_url()))
        .json(&serde_json::json!({ "cli": "claude" }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 409);
    Ok(())
}

#[tokio::test]
async fn echo_session_replays_over_websocket() -> anyhow::Result<()> {
    let broker = BrokerProcess::start("echo spec-marker; cat")?;
    broker.wait_healthy(TIMEOUT).await?;
    let session_id = start_session(&broker).await?;
    assert!(session_id.len() >= 12);

    // Attach and wait for the marker: either in the replay frame or in a
    // live output frame, depending on timing.
    let (mut ws, _) = tokio_tungstenite::connect_async(broker.ws_url()).await?;
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("marker never arrived; saw {:?}", String::from_utf8_lossy(&seen));
        }
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("websocket went quiet"))?;
        match msg {
            Some(Ok(Message::Binary(data))) => {
                seen.extend_from_slice(&data);
                if String::from_utf8_lossy(&seen).contains("spec-marker") {
                    break;
                }
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => anyhow::bail!("websocket error: {e}"),
            None => anyhow::bail!("websocket closed early"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn second_viewer_evicts_the_first() -> anyhow::Result<()> {
    let broker = BrokerProcess::start("cat")?;
    broker.wait_healthy(TIMEOUT).await?;
    start_session(&broker).await?;

    let (mut viewer_a, _) = tokio_tungstenite::connect_async(broker.ws_url()).await?;
    // First frame: replay.
    let _ = tokio::time::timeout(TIMEOUT, viewer_a.next()).await;

    let (mut viewer_b, _) = tokio_tungstenite::connect_async(broker.ws_url()).await?;

    // Viewer A gets a close frame promptly.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("viewer A was never closed");
        }
        match tokio::time::timeout(TIMEOUT, viewer_a.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                assert_eq!(reason, "Session taken over");
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => anyhow::bail!("viewer A was never closed"),
        }
    }

    // Viewer B can still type.
    viewer_b.send(Message::Binary(b"hello-from-b\r".as_slice().into())).await?;
    Ok(())
}

#[tokio::test]
async fn resize_control_frame_is_accepted() -> anyhow::Result<()> {
    let broker = BrokerProcess::start("cat")?;
    broker.wait_healthy(TIMEOUT).await?;
    start_session(&broker).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(broker.ws_url()).await?;
    let frame = ControlFrame::Resize { cols: 100, rows: 40 }.build();
    ws.send(Message::Text(frame.into())).await?;

    // The frame is consumed as a control, not echoed back by cat.
    ws.send(Message::Binary(b"after-resize\r".as_slice().into())).await?;
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("input echo never arrived");
        }
        match tokio::time::timeout(TIMEOUT, ws.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => {
                seen.extend_from_slice(&data);
                let text = String::from_utf8_lossy(&seen);
                if text.contains("after-resize") {
                    assert!(!text.contains("__resize__"));
                    break;
                }
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => anyhow::bail!("websocket error: {e}"),
            Ok(None) => anyhow::bail!("websocket closed early"),
            Err(_) => anyhow::bail!("websocket went quiet"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn stop_ends_the_session() -> anyhow::Result<()> {
    let broker = BrokerProcess::start("sleep 30")?;
    broker.wait_healthy(TIMEOUT).await?;
    start_session(&broker).await?;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/v1/terminal/stop", broker.base_url()))
        .send()
        .await?;
    assert!(resp.status().is_success());

    // A fresh start succeeds once the old session is gone.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if start_session(&broker).await.is_ok() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("could not start a session after stop");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

// -- child bootstrap handshake ------------------------------------------------

#[tokio::test]
async fn child_announces_and_hands_out_cookie() -> anyhow::Result<()> {
    let (child, bootstrap_url) = BrokerProcess::start_child()?;
    assert!(bootstrap_url.starts_with("http://127.0.0.1:"));
    child.wait_healthy(TIMEOUT).await?;

    let resp = reqwest::get(&bootstrap_url).await?.error_for_status()?;
    let cookie = resp
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| anyhow::anyhow!("bootstrap did not set a cookie"))?;
    assert!(cookie.starts_with("viberails_session="));

    // Without the cookie, the terminal API refuses.
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/v1/terminal/stop", child.base_url()))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 401);
    Ok(())
}

// -- tab supervisor -----------------------------------------------------------

#[tokio::test]
async fn tab_lifecycle_create_list_delete() -> anyhow::Result<()> {
    let host = BrokerProcess::start_tab_host()?;
    host.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;
    let resp = client
        .post(format!("{}/api/v1/tabs", host.base_url()))
        .send()
        .await?
        .error_for_status()?;
    let tab: serde_json::Value = resp.json().await?;
    let tab_id = tab["tabId"].as_str().ok_or_else(|| anyhow::anyhow!("no tabId in {tab}"))?;
    assert!(tab["port"].as_u64().is_some());

    let tabs: Vec<serde_json::Value> =
        client.get(format!("{}/api/v1/tabs", host.base_url())).send().await?.json().await?;
    assert_eq!(tabs.len(), 1);

    // The proxy reaches the child: with no session there, the child closes
    // the socket with a policy frame, which proves the relay path works.
    let ws_url = format!("ws://127.0.0.1:{}/api/v1/tabs/{tab_id}/ws", host.port());
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url.as_str()).await?;
    match tokio::time::timeout(TIMEOUT, ws.next()).await {
        Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => {}
        Ok(Some(Ok(other))) => anyhow::bail!("expected close from empty child, got {other:?}"),
        Err(_) => anyhow::bail!("proxy never answered"),
    }

    let resp = client
        .delete(format!("{}/api/v1/tabs/{tab_id}", host.base_url()))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 204);

    let tabs: Vec<serde_json::Value> =
        client.get(format!("{}/api/v1/tabs", host.base_url())).send().await?.json().await?;
    assert!(tabs.is_empty());
    Ok(())
}
