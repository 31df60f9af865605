// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::ResizeCoordinator;
use crate::pty::PtyInput;
use crate::session::InputSource;
use crate::terminal::Terminal;
use crate::test_support::{MockPty, RecordingStore, StoreEvent};

const SID: &str = "sess-resize";

fn build(redraw: bool) -> (ResizeCoordinator, Arc<RecordingStore>, Arc<Terminal>, Arc<parking_lot::Mutex<Vec<PtyInput>>>) {
    let store = RecordingStore::new();
    let mock = MockPty::new().hold_open();
    let captured = mock.captured();
    let terminal = Arc::new(Terminal::new(mock, 1024));
    let coordinator = ResizeCoordinator::new(
        Arc::clone(&terminal),
        Arc::clone(&store) as _,
        SID.to_owned(),
        redraw,
    );
    (coordinator, store, terminal, captured)
}

#[tokio::test]
async fn resize_applies_and_records() -> anyhow::Result<()> {
    let (coordinator, store, terminal, captured) = build(false);
    terminal.start_read_loop()?;

    coordinator.apply_resize(100, 40, InputSource::LocalWebUi)?;
    terminal.dispose().await;

    assert!(matches!(captured.lock()[0], PtyInput::Resize { cols: 100, rows: 40 }));
    assert_eq!(
        store.events(),
        vec![StoreEvent::Resize { cols: 100, rows: 40, source: InputSource::LocalWebUi }]
    );
    Ok(())
}

#[tokio::test]
async fn no_redraw_when_policy_disabled() -> anyhow::Result<()> {
    let (coordinator, _store, terminal, captured) = build(false);
    terminal.start_read_loop()?;

    coordinator.apply_resize(90, 30, InputSource::RemoteWebUi)?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    terminal.dispose().await;

    assert_eq!(captured.lock().len(), 1, "only the resize should reach the PTY");
    Ok(())
}

#[tokio::test]
async fn redraw_sends_single_ctrl_l_after_debounce() -> anyhow::Result<()> {
    let (coordinator, _store, terminal, captured) = build(true);
    terminal.start_read_loop()?;

    // Rapid resizes: pending redraws are replaced, not stacked.
    coordinator.apply_resize(80, 24, InputSource::LocalWebUi)?;
    coordinator.apply_resize(81, 24, InputSource::LocalWebUi)?;
    coordinator.apply_resize(82, 24, InputSource::LocalWebUi)?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    terminal.dispose().await;

    let captured = captured.lock();
    let redraws: Vec<_> = captured
        .iter()
        .filter(|input| matches!(input, PtyInput::Write(data) if data.as_ref() == [0x0c]))
        .collect();
    assert_eq!(redraws.len(), 1, "debounce must collapse to one redraw");

    let resizes = captured
        .iter()
        .filter(|input| matches!(input, PtyInput::Resize { .. }))
        .count();
    assert_eq!(resizes, 3);
    Ok(())
}
