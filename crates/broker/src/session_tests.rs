// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{new_session_id, CliKind, InputSource};

#[yare::parameterized(
    claude  = { "claude", CliKind::Claude },
    codex   = { "Codex", CliKind::Codex },
    gemini  = { "GEMINI", CliKind::Gemini },
    copilot = { "copilot", CliKind::Copilot },
)]
fn parses_cli_kind(input: &str, expected: CliKind) -> anyhow::Result<()> {
    let parsed: CliKind = input.parse()?;
    assert_eq!(parsed, expected);
    Ok(())
}

#[test]
fn rejects_unknown_cli_kind() {
    let result = "cursor".parse::<CliKind>();
    assert!(result.is_err());
}

#[test]
fn session_ids_are_long_and_unique() {
    let a = new_session_id();
    let b = new_session_id();
    assert!(a.len() >= 12);
    assert_ne!(a, b);
    assert!(a.chars().all(|c| c.is_ascii_graphic()));
}

#[test]
fn source_names_are_stable() {
    assert_eq!(InputSource::LocalWebUi.as_str(), "local_web_ui");
    assert_eq!(InputSource::RemoteWebUi.as_str(), "remote_web_ui");
    assert_eq!(InputSource::LocalCli.as_str(), "local_cli");
}
