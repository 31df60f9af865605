// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reserved text-frame grammar shared by the local attach endpoint and the
//! remote relay.
//!
//! Control frames ride on WebSocket text frames; anything that does not
//! match a known prefix is plain terminal input and must be forwarded to
//! the PTY untouched.

use std::fmt;

/// Hard cap on any inbound WebSocket message. Exceeding it is fatal to the
/// offending connection (never to the terminal).
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Maximum payload carried by a custom command frame.
pub const MAX_COMMAND_PAYLOAD: usize = 8 * 1024;

/// Maximum length of a disconnect reason after sanitization.
pub const MAX_REASON_CHARS: usize = 120;

/// Reason used when a disconnect request carries none.
pub const DEFAULT_DISCONNECT_REASON: &str = "Session taken over by local viewer";

pub const COLS_RANGE: std::ops::RangeInclusive<u16> = 10..=1000;
pub const ROWS_RANGE: std::ops::RangeInclusive<u16> = 5..=500;

const REPLAY: &str = "__replay__";
const BROWSER_DISCONNECTED: &str = "__browser_disconnected__";
const RESIZE_PREFIX: &str = "__resize__:";
const DISCONNECT_PREFIX: &str = "__disconnect_browser__:";
const CMD_PREFIX: &str = "__cmd__:";

/// A parsed control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// A browser attached upstream and wants the current screen.
    ReplayRequest,
    /// The upstream browser went away.
    BrowserDisconnected,
    /// Resize the PTY. Both dimensions already range-checked.
    Resize { cols: u16, rows: u16 },
    /// Ask the relay to close its browser, with a sanitized reason.
    DisconnectBrowser { reason: String },
    /// Opaque custom command.
    Command { name: String, payload: Option<String> },
}

impl ControlFrame {
    /// Build a disconnect frame, sanitizing the reason so the result is
    /// always representable on the wire.
    pub fn disconnect_browser(reason: &str) -> Self {
        Self::DisconnectBrowser { reason: sanitize_reason(reason) }
    }

    /// Serialize to the wire string.
    pub fn build(&self) -> String {
        match self {
            Self::ReplayRequest => REPLAY.to_owned(),
            Self::BrowserDisconnected => BROWSER_DISCONNECTED.to_owned(),
            Self::Resize { cols, rows } => format!("{RESIZE_PREFIX}{cols},{rows}"),
            Self::DisconnectBrowser { reason } => format!("{DISCONNECT_PREFIX}{reason}"),
            Self::Command { name, payload } => match payload {
                Some(p) => format!("{CMD_PREFIX}{name}:{p}"),
                None => format!("{CMD_PREFIX}{name}"),
            },
        }
    }
}

impl fmt::Display for ControlFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

/// Parse a text frame. `None` means "not a control frame"; the caller
/// forwards the text to the PTY as input. Frames with a known prefix but an
/// invalid body also return `None`: a malformed control is plain input.
pub fn parse(text: &str) -> Option<ControlFrame> {
    if text == REPLAY {
        return Some(ControlFrame::ReplayRequest);
    }
    if text == BROWSER_DISCONNECTED {
        return Some(ControlFrame::BrowserDisconnected);
    }
    if let Some(body) = text.strip_prefix(RESIZE_PREFIX) {
        return parse_resize(body);
    }
    if let Some(body) = text.strip_prefix(DISCONNECT_PREFIX) {
        return Some(ControlFrame::DisconnectBrowser { reason: sanitize_reason(body) });
    }
    if let Some(body) = text.strip_prefix(CMD_PREFIX) {
        return parse_command(body);
    }
    None
}

fn parse_resize(body: &str) -> Option<ControlFrame> {
    let (cols, rows) = body.split_once(',')?;
    // Plain ASCII digits only; no locale, no signs, no whitespace.
    let cols: u16 = parse_ascii_u16(cols.trim())?;
    let rows: u16 = parse_ascii_u16(rows.trim())?;
    if !COLS_RANGE.contains(&cols) || !ROWS_RANGE.contains(&rows) {
        return None;
    }
    Some(ControlFrame::Resize { cols, rows })
}

fn parse_ascii_u16(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_command(body: &str) -> Option<ControlFrame> {
    let (name, payload) = match body.split_once(':') {
        Some((name, payload)) => (name, Some(payload)),
        None => (body, None),
    };
    if !is_valid_command_name(name) {
        return None;
    }
    if payload.is_some_and(|p| p.len() > MAX_COMMAND_PAYLOAD) {
        return None;
    }
    Some(ControlFrame::Command {
        name: name.to_owned(),
        payload: payload.map(str::to_owned),
    })
}

/// Command names are 1 to 64 chars of `[A-Za-z0-9._-]`.
pub fn is_valid_command_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

/// Strip control characters and truncate to the reason limit; empty input
/// falls back to the default takeover reason.
pub fn sanitize_reason(reason: &str) -> String {
    let cleaned: String = reason
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_REASON_CHARS)
        .collect();
    if cleaned.is_empty() {
        DEFAULT_DISCONNECT_REASON.to_owned()
    } else {
        cleaned
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
