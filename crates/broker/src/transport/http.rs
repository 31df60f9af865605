// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use super::{authorized, HostState, SESSION_COOKIE};
use crate::broker::StartRequest;
use crate::error::ErrorCode;
use crate::session::{CliKind, OwnerKind};

/// Turn a refusal code into a JSON error response.
pub fn error_response(code: ErrorCode) -> Response {
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": code.as_str() }))).into_response()
}

/// `GET /api/v1/IsLocal`: readiness probe used by the tab supervisor.
pub async fn is_local() -> Response {
    Json(serde_json::json!({ "isLocal": true })).into_response()
}

/// `GET /bootstrap`: hand out the per-process session cookie.
pub async fn bootstrap(State(state): State<Arc<HostState>>) -> Response {
    let mut response = Json(serde_json::json!({ "ok": true })).into_response();
    if let Some(ref token) = state.session_token {
        let cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly");
        if let Ok(value) = cookie.parse() {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub cli: String,
    pub working_directory: Option<String>,
    pub environment_name: Option<String>,
    pub title: Option<String>,
    pub initial_input: Option<String>,
    #[serde(default)]
    pub enable_remote: bool,
}

/// `POST /api/v1/terminal/start`: launch a session.
pub async fn start_terminal(
    State(state): State<Arc<HostState>>,
    headers: HeaderMap,
    Json(body): Json<StartBody>,
) -> Response {
    if !authorized(&headers, state.session_token.as_deref()) {
        return error_response(ErrorCode::Unauthorized);
    }

    let cli: CliKind = match body.cli.parse() {
        Ok(kind) => kind,
        Err(_) => return error_response(ErrorCode::BadRequest),
    };
    let working_dir = body
        .working_directory
        .map(Into::into)
        .unwrap_or_else(|| state.default_workdir.clone());

    let request = StartRequest {
        cli,
        working_dir,
        environment_name: body.environment_name,
        title: body.title,
        initial_input: body.initial_input,
        owner: OwnerKind::Local,
        enable_remote: body.enable_remote,
        command_override: state.command_override.clone(),
    };

    match state.broker.start(request).await {
        Ok(meta) => Json(serde_json::json!({ "sessionId": meta.session_id })).into_response(),
        Err(e) => {
            let code = e
                .downcast_ref::<ErrorCode>()
                .copied()
                .unwrap_or(ErrorCode::SpawnFailed);
            warn!(err = %e, "terminal start failed");
            error_response(code)
        }
    }
}

/// `POST /api/v1/terminal/stop`: stop the active session.
pub async fn stop_terminal(
    State(state): State<Arc<HostState>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers, state.session_token.as_deref()) {
        return error_response(ErrorCode::Unauthorized);
    }

    match state.broker.stop().await {
        Ok(()) => Json(serde_json::json!({ "stopped": true })).into_response(),
        Err(e) => {
            let code = e
                .downcast_ref::<ErrorCode>()
                .copied()
                .unwrap_or(ErrorCode::Internal);
            error_response(code)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub client: String,
}

/// `POST /api/v1/heartbeat`: pulse keeping the host alive while a page is
/// open.
pub async fn heartbeat(
    State(state): State<Arc<HostState>>,
    Json(body): Json<HeartbeatBody>,
) -> Response {
    state.watchdog.pulse(&body.client, state.pulse_ttl);
    StatusCode::NO_CONTENT.into_response()
}
