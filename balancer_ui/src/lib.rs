#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Plain-text rendering of control-loop status for the terminal display.
use std::fmt::Write as _;

use balancer_core::{ControllerPhase, StatusSnapshot};

pub const BAR_WIDTH: usize = 20;

/// `[=====               ] 25%`
pub fn progress_bar(progress: f32, width: usize) -> String {
    let p = if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        0.0
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let filled = ((width as f32) * p) as usize;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let pct = (p * 100.0) as u32;
    format!(
        "[{}{}] {pct}%",
        "=".repeat(filled),
        " ".repeat(width.saturating_sub(filled))
    )
}

/// One line per cell: `Cell 1:  20.15 V  HIGH`.
pub fn cell_line(id: usize, voltage: Option<f32>, high_alarm: bool, low_alarm: bool) -> String {
    let v = voltage.map_or_else(|| "  --.-- V".to_string(), |v| format!("{v:>7.2} V"));
    let marker = match (high_alarm, low_alarm) {
        (true, _) => "  HIGH",
        (_, true) => "  LOW",
        _ => "",
    };
    format!("Cell {}: {v}{marker}", id + 1)
}

fn secs(d: std::time::Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Full status screen for one snapshot. Lines end with `\n`; the caller
/// owns clearing the terminal.
pub fn render(s: &StatusSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Battery balancer  (cycle {})", s.cycle);
    let _ = writeln!(out);
    for c in &s.cells {
        let _ = writeln!(out, "{}", cell_line(c.id, c.voltage, c.high_alarm, c.low_alarm));
    }
    let total = s
        .total_voltage()
        .map_or_else(|| "unknown".to_string(), |v| format!("{v:.2} V"));
    let _ = writeln!(out, "Total: {total}");
    let _ = writeln!(out);

    match (s.phase, s.session) {
        (ControllerPhase::Balancing, Some(session)) => {
            let high = s.cells.get(session.high_cell).and_then(|c| c.voltage);
            let low = s.cells.get(session.low_cell).and_then(|c| c.voltage);
            let fmt_v = |v: Option<f32>| v.map_or_else(|| "?".to_string(), |v| format!("{v:.2}V"));
            let _ = writeln!(
                out,
                "Balancing cell {} ({}) -> cell {} ({})",
                session.high_cell + 1,
                fmt_v(high),
                session.low_cell + 1,
                fmt_v(low)
            );
            let _ = writeln!(out, "Progress: {}", progress_bar(session.progress, BAR_WIDTH));
        }
        (ControllerPhase::Resting, _) => {
            let left = s.rest_remaining.map_or(0, secs);
            let _ = writeln!(out, "Resting ({left}s left)");
        }
        (phase, _) => {
            let _ = writeln!(out, "State: {}", phase.label());
        }
    }
    if s.alarm_line {
        let _ = writeln!(out, "ALARM active");
    }
    let _ = writeln!(out, "Press q + Enter to quit");
    out
}
