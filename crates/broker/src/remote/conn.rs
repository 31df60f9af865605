// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound WebSocket client for the remote relay.
//!
//! The relay forwards this session's PTY to remote browsers. One send loop
//! drains a bounded outbound queue; one receive loop demultiplexes control
//! frames from user input. Neither loop ever propagates an error out; they
//! log and end, and the terminal outlives them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::distributor::Consumer;
use crate::protocol::{self, ControlFrame, MAX_MESSAGE_BYTES};

/// Handshake must complete within this window.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue depth. A relay that cannot keep up loses output.
const OUTBOUND_QUEUE: usize = 256;

/// Connection settings for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Frontend base URL, e.g. `https://rails.example.com`.
    pub frontend_url: String,
    /// Pre-shared key sent as `X-Api-Key`.
    pub api_key: String,
}

/// Relay connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Callback slots the broker fills in before connecting. Plain function
/// values; cleared when the connection is disposed.
#[derive(Clone, Default)]
pub struct RemoteCallbacks {
    /// A browser attached upstream and asked for the current screen.
    pub on_replay_requested: Option<Arc<dyn Fn() + Send + Sync>>,
    /// The upstream browser went away.
    pub on_browser_disconnected: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_resize_requested: Option<Arc<dyn Fn(u16, u16) + Send + Sync>>,
    pub on_command_received: Option<Arc<dyn Fn(&str, Option<&str>) + Send + Sync>>,
    /// Raw user input from the remote viewer.
    pub on_input_received: Option<Arc<dyn Fn(Bytes) + Send + Sync>>,
}

enum OutboundFrame {
    Binary(Bytes),
    Text(String),
}

/// One outbound relay connection for one session.
pub struct RemoteConnection {
    outbound_tx: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
    state: Arc<Mutex<ConnState>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    session_id: String,
}

impl RemoteConnection {
    /// Build the relay WebSocket URL from the configured frontend URL:
    /// scheme-swapped, trailing slash trimmed, session ID url-encoded.
    pub fn build_relay_url(frontend_url: &str, session_id: &str) -> String {
        let base = frontend_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("wss://") || base.starts_with("ws://") {
            base.to_owned()
        } else {
            format!("wss://{base}")
        };
        let encoded: String =
            url::form_urlencoded::byte_serialize(session_id.as_bytes()).collect();
        format!("{ws_base}/ws/v1/terminal?sessionId={encoded}")
    }

    /// Connect to the relay and start the send/receive loops.
    pub async fn connect(
        config: &RelayConfig,
        session_id: &str,
        callbacks: RemoteCallbacks,
    ) -> anyhow::Result<Arc<Self>> {
        let url = Self::build_relay_url(&config.frontend_url, session_id);
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert("X-Api-Key", config.api_key.parse()?);

        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(MAX_MESSAGE_BYTES))
            .max_frame_size(Some(MAX_MESSAGE_BYTES));

        let state = Arc::new(Mutex::new(ConnState::Connecting));
        let (stream, _response) = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false),
        )
        .await
        .map_err(|_| anyhow::anyhow!("relay connect timed out after {CONNECT_TIMEOUT:?}"))??;
        *state.lock() = ConnState::Open;
        debug!(session_id = %session_id, url = %url, "relay connected");

        let (mut ws_tx, mut ws_rx) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE);
        let cancel = CancellationToken::new();

        // Send loop: drain the outbound queue until cancelled or the socket
        // dies. On cancel, a normal close frame is the last thing out.
        let send_cancel = cancel.clone();
        let send_state = Arc::clone(&state);
        let send_sid = session_id.to_owned();
        let send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = send_cancel.cancelled() => {
                        let frame = CloseFrame { code: CloseCode::Normal, reason: "".into() };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    frame = outbound_rx.recv() => {
                        let msg = match frame {
                            Some(OutboundFrame::Binary(data)) => Message::Binary(data),
                            Some(OutboundFrame::Text(text)) => Message::Text(text.into()),
                            None => break,
                        };
                        if let Err(e) = ws_tx.send(msg).await {
                            debug!(session_id = %send_sid, err = %e, "relay send failed");
                            break;
                        }
                    }
                }
            }
            *send_state.lock() = ConnState::Closed;
        });

        // Receive loop: reassembled messages only (the config caps them at
        // MAX_MESSAGE_BYTES; oversize kills the connection, never the PTY).
        let recv_cancel = cancel.clone();
        let recv_sid = session_id.to_owned();
        let recv_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = recv_cancel.cancelled() => break,
                    msg = ws_rx.next() => match msg {
                        Some(Ok(Message::Text(text))) => demux(&text, &callbacks),
                        Some(Ok(Message::Binary(data))) => {
                            if let Some(ref on_input) = callbacks.on_input_received {
                                on_input(data);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(session_id = %recv_sid, "relay closed");
                            break;
                        }
                        Some(Ok(_)) => {} // ping/pong
                        Some(Err(e)) => {
                            warn!(session_id = %recv_sid, err = %e, "relay receive failed");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Arc::new(Self {
            outbound_tx,
            cancel,
            state,
            tasks: Mutex::new(vec![send_task, recv_task]),
            session_id: session_id.to_owned(),
        }))
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue PTY output as a binary frame. Non-blocking: a stalled relay
    /// loses output rather than stalling the read loop.
    pub fn queue_output(&self, data: Bytes) {
        if let Err(e) = self.outbound_tx.try_send(OutboundFrame::Binary(data)) {
            debug!(session_id = %self.session_id, err = %e, "relay outbound queue full, dropping output");
        }
    }

    /// Queue a control frame as a text frame.
    pub async fn send_control(&self, frame: ControlFrame) {
        if self
            .outbound_tx
            .send(OutboundFrame::Text(frame.build()))
            .await
            .is_err()
        {
            debug!(session_id = %self.session_id, "relay gone, control frame dropped");
        }
    }

    /// Cancel both loops, close the socket, and wait for them to finish.
    pub async fn dispose(&self) {
        *self.state.lock() = ConnState::Closing;
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        *self.state.lock() = ConnState::Closed;
    }
}

/// Route one text frame from the relay to the right callback. Unknown text
/// is user input.
fn demux(text: &str, callbacks: &RemoteCallbacks) {
    match protocol::parse(text) {
        Some(ControlFrame::ReplayRequest) => {
            if let Some(ref f) = callbacks.on_replay_requested {
                f();
            }
        }
        Some(ControlFrame::BrowserDisconnected) => {
            if let Some(ref f) = callbacks.on_browser_disconnected {
                f();
            }
        }
        Some(ControlFrame::Resize { cols, rows }) => {
            if let Some(ref f) = callbacks.on_resize_requested {
                f(cols, rows);
            }
        }
        Some(ControlFrame::Command { ref name, ref payload }) => {
            if let Some(ref f) = callbacks.on_command_received {
                f(name, payload.as_deref());
            }
        }
        Some(ControlFrame::DisconnectBrowser { .. }) => {
            // Core-to-relay frame; ignore if echoed back.
            debug!("ignoring inbound disconnect_browser frame");
        }
        None => {
            if let Some(ref f) = callbacks.on_input_received {
                f(Bytes::copy_from_slice(text.as_bytes()));
            }
        }
    }
}

/// Consumer that forwards PTY output to the relay queue.
pub struct RemoteOutputConsumer {
    conn: Arc<RemoteConnection>,
}

impl RemoteOutputConsumer {
    pub fn new(conn: Arc<RemoteConnection>) -> Self {
        Self { conn }
    }
}

impl Consumer for RemoteOutputConsumer {
    fn name(&self) -> &'static str {
        "remote-output"
    }

    fn on_output(&self, data: &Bytes) -> anyhow::Result<()> {
        self.conn.queue_output(data.clone());
        Ok(())
    }
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
