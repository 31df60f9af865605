// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parses_replay_and_browser_disconnected() {
    assert_eq!(parse("__replay__"), Some(ControlFrame::ReplayRequest));
    assert_eq!(parse("__browser_disconnected__"), Some(ControlFrame::BrowserDisconnected));
}

#[yare::parameterized(
    minimum      = { "__resize__:10,5", Some((10, 5)) },
    typical      = { "__resize__:80,24", Some((80, 24)) },
    maximum      = { "__resize__:1000,500", Some((1000, 500)) },
    cols_too_low = { "__resize__:9,24", None },
    rows_too_low = { "__resize__:80,4", None },
    cols_too_big = { "__resize__:1001,24", None },
    rows_too_big = { "__resize__:80,501", None },
    negative     = { "__resize__:-80,24", None },
    not_numbers  = { "__resize__:a,b", None },
    missing_rows = { "__resize__:80", None },
)]
fn resize_bounds(input: &str, expected: Option<(u16, u16)>) {
    let parsed = parse(input);
    match expected {
        Some((cols, rows)) => assert_eq!(parsed, Some(ControlFrame::Resize { cols, rows })),
        None => assert_eq!(parsed, None, "out-of-range resize must fall through as input"),
    }
}

#[yare::parameterized(
    simple       = { "a.b-c_1", true },
    alphanumeric = { "restart", true },
    slash        = { "a/b", false },
    space        = { "a b", false },
    empty        = { "", false },
    unicode      = { "caf\u{e9}", false },
)]
fn command_name_charset(name: &str, valid: bool) {
    assert_eq!(is_valid_command_name(name), valid);
}

#[test]
fn command_name_length_limit() {
    assert!(is_valid_command_name(&"a".repeat(64)));
    assert!(!is_valid_command_name(&"a".repeat(65)));
}

#[test]
fn parses_command_with_and_without_payload() {
    assert_eq!(
        parse("__cmd__:restart"),
        Some(ControlFrame::Command { name: "restart".to_owned(), payload: None })
    );
    assert_eq!(
        parse("__cmd__:open:https://example.com/a:b"),
        Some(ControlFrame::Command {
            name: "open".to_owned(),
            payload: Some("https://example.com/a:b".to_owned()),
        })
    );
}

#[test]
fn rejects_oversize_command_payload() {
    let payload = "x".repeat(MAX_COMMAND_PAYLOAD + 1);
    assert_eq!(parse(&format!("__cmd__:big:{payload}")), None);

    let payload = "x".repeat(MAX_COMMAND_PAYLOAD);
    assert!(parse(&format!("__cmd__:big:{payload}")).is_some());
}

#[test]
fn disconnect_reason_is_sanitized() {
    let parsed = parse("__disconnect_browser__:bye\x07now");
    assert_eq!(parsed, Some(ControlFrame::DisconnectBrowser { reason: "byenow".to_owned() }));

    let parsed = parse("__disconnect_browser__:");
    assert_eq!(
        parsed,
        Some(ControlFrame::DisconnectBrowser { reason: DEFAULT_DISCONNECT_REASON.to_owned() })
    );

    let long = "r".repeat(300);
    let parsed = parse(&format!("__disconnect_browser__:{long}"));
    assert_eq!(
        parsed,
        Some(ControlFrame::DisconnectBrowser { reason: "r".repeat(MAX_REASON_CHARS) })
    );
}

#[test]
fn unknown_prefixes_are_plain_input() {
    assert_eq!(parse("ls -la"), None);
    assert_eq!(parse("__unknown__:x"), None);
    assert_eq!(parse("__replay__extra"), None);
}

#[yare::parameterized(
    replay     = { ControlFrame::ReplayRequest },
    browser    = { ControlFrame::BrowserDisconnected },
    resize     = { ControlFrame::Resize { cols: 132, rows: 43 } },
    disconnect = { ControlFrame::disconnect_browser("Session taken over by remote viewer") },
    command    = { ControlFrame::Command { name: "sync.state".to_owned(), payload: None } },
    cmd_body   = { ControlFrame::Command { name: "open".to_owned(), payload: Some("x:y".to_owned()) } },
)]
fn round_trips(frame: ControlFrame) {
    assert_eq!(parse(&frame.build()), Some(frame));
}
