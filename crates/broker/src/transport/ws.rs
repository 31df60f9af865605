// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local viewer attach endpoint.
//!
//! Binary frames are raw input bytes to the PTY; text frames are control
//! protocol strings, of which only `Resize` is meaningful from the local
//! viewer; everything else is forwarded as input. Socket errors here never
//! tear down the terminal.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::{authorized, HostState};
use crate::broker::AttachContext;
use crate::error::ErrorCode;
use crate::protocol::{self, ControlFrame, MAX_MESSAGE_BYTES};
use crate::session::InputSource;

/// WebSocket close code for a normal closure.
const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code for a policy violation (no active terminal).
const CLOSE_POLICY: u16 = 1008;

/// `GET /api/v1/terminal/ws`: upgrade and attach as the local viewer.
pub async fn ws_handler(
    State(state): State<Arc<HostState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !authorized(&headers, state.session_token.as_deref()) {
        return super::http::error_response(ErrorCode::Unauthorized);
    }

    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_attach(state, socket))
        .into_response()
}

async fn handle_attach(state: Arc<HostState>, mut socket: WebSocket) {
    let ctx = match state.broker.begin_local_attach() {
        Ok(ctx) => ctx,
        Err(code) => {
            let frame = CloseFrame { code: CLOSE_POLICY, reason: code.as_str().into() };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let owner_id = format!("ws-viewer-{}", ctx.viewer_id);
    state.watchdog.acquire(&owner_id);
    run_viewer(&state, ctx, socket).await;
    state.watchdog.release(&owner_id);
}

async fn run_viewer(state: &Arc<HostState>, ctx: AttachContext, socket: WebSocket) {
    let AttachContext {
        viewer_id,
        session_id,
        replay,
        mut data_rx,
        cancel,
        close_reason,
        router,
        resize,
        terminal,
        consumer_id,
    } = ctx;

    let (mut ws_tx, mut ws_rx) = socket.split();

    // The first frame a new viewer sees is the current screen state.
    if ws_tx.send(Message::Binary(replay.into())).await.is_err() {
        terminal.unsubscribe(consumer_id);
        state.broker.end_local_attach(viewer_id);
        return;
    }

    debug!(session_id = %session_id, viewer_id, "local viewer attached");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let reason = close_reason.lock().take().unwrap_or_default();
                let frame = CloseFrame { code: CLOSE_NORMAL, reason: reason.into() };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break;
            }

            data = data_rx.recv() => match data {
                Some(bytes) => {
                    if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if let Err(e) = router.route_input(&data, InputSource::LocalWebUi).await {
                        debug!(session_id = %session_id, err = %e, "viewer input dropped");
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    match protocol::parse(&text) {
                        Some(ControlFrame::Resize { cols, rows }) => {
                            if let Err(e) =
                                resize.apply_resize(cols, rows, InputSource::LocalWebUi)
                            {
                                debug!(session_id = %session_id, err = %e, "viewer resize rejected");
                            }
                        }
                        // Everything else, including unrecognized control
                        // strings, is plain input.
                        _ => {
                            if let Err(e) =
                                router.route_input(text.as_bytes(), InputSource::LocalWebUi).await
                            {
                                debug!(session_id = %session_id, err = %e, "viewer input dropped");
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong handled by axum
                Some(Err(e)) => {
                    // Oversize messages and protocol violations land here;
                    // the connection dies, the terminal does not.
                    warn!(session_id = %session_id, err = %e, "viewer socket error");
                    break;
                }
            },
        }
    }

    terminal.unsubscribe(consumer_id);
    state.broker.end_local_attach(viewer_id);
    debug!(session_id = %session_id, viewer_id, "local viewer detached");
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
