// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser ⇄ tab-child WebSocket relay.
//!
//! Frames are copied verbatim in both directions, message boundaries
//! preserved. The first close seen in either direction closes the other.

use axum::extract::ws as browser_ws;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::debug;

use super::TabEntry;
use crate::protocol::MAX_MESSAGE_BYTES;
use crate::transport::SESSION_COOKIE;

/// Connect to the child's attach endpoint and relay until either side
/// closes.
pub async fn run(entry: &TabEntry, browser: browser_ws::WebSocket) -> anyhow::Result<()> {
    let url = format!("ws://127.0.0.1:{}/api/v1/terminal/ws", entry.port);
    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(SESSION_COOKIE, entry.session_token.parse()?);

    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(MAX_MESSAGE_BYTES))
        .max_frame_size(Some(MAX_MESSAGE_BYTES));
    let (upstream, _) =
        tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false).await?;

    let (mut up_tx, mut up_rx) = upstream.split();
    let (mut br_tx, mut br_rx) = browser.split();

    loop {
        tokio::select! {
            msg = br_rx.next() => match msg {
                Some(Ok(msg)) => {
                    let is_close = matches!(msg, browser_ws::Message::Close(_));
                    if up_tx.send(to_upstream(msg)).await.is_err() || is_close {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(tab_id = %entry.tab_id, err = %e, "browser side error");
                    let frame = CloseFrame { code: CloseCode::Normal, reason: "".into() };
                    let _ = up_tx.send(UpstreamMessage::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let frame = CloseFrame { code: CloseCode::Normal, reason: "".into() };
                    let _ = up_tx.send(UpstreamMessage::Close(Some(frame))).await;
                    break;
                }
            },

            msg = up_rx.next() => match msg {
                Some(Ok(msg)) => {
                    let is_close = matches!(msg, UpstreamMessage::Close(_));
                    if br_tx.send(to_browser(msg)).await.is_err() || is_close {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(tab_id = %entry.tab_id, err = %e, "child side error");
                    let frame = browser_ws::CloseFrame { code: 1000, reason: "".into() };
                    let _ = br_tx.send(browser_ws::Message::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let frame = browser_ws::CloseFrame { code: 1000, reason: "".into() };
                    let _ = br_tx.send(browser_ws::Message::Close(Some(frame))).await;
                    break;
                }
            },
        }
    }

    Ok(())
}

fn to_upstream(msg: browser_ws::Message) -> UpstreamMessage {
    match msg {
        browser_ws::Message::Binary(data) => UpstreamMessage::Binary(data),
        browser_ws::Message::Text(text) => UpstreamMessage::Text(text.as_str().into()),
        browser_ws::Message::Ping(data) => UpstreamMessage::Ping(data),
        browser_ws::Message::Pong(data) => UpstreamMessage::Pong(data),
        browser_ws::Message::Close(frame) => UpstreamMessage::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().into(),
        })),
    }
}

fn to_browser(msg: UpstreamMessage) -> browser_ws::Message {
    match msg {
        UpstreamMessage::Binary(data) => browser_ws::Message::Binary(data),
        UpstreamMessage::Text(text) => browser_ws::Message::Text(text.as_str().into()),
        UpstreamMessage::Ping(data) => browser_ws::Message::Ping(data),
        UpstreamMessage::Pong(data) => browser_ws::Message::Pong(data),
        UpstreamMessage::Close(frame) => {
            browser_ws::Message::Close(frame.map(|f| browser_ws::CloseFrame {
                code: f.code.into(),
                reason: f.reason.as_str().into(),
            }))
        }
        // Raw frames never surface from a configured client.
        UpstreamMessage::Frame(_) => browser_ws::Message::Binary(bytes::Bytes::new()),
    }
}
