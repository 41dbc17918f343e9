//! Over/undervoltage alarms with hysteresis, one shared alarm line and
//! throttled notifications.
//!
//! Each cell has an independent alarm per direction. The physical line is the
//! OR of all of them and is written only when that OR changes. Notifications
//! are throttled per direction: one message lists every active cell of that
//! direction, and the next one waits for `notify_interval`.
use std::fmt::Write as _;
use std::time::Instant;

use balancer_traits::{HardwareChannel, Notifier};
use tracing::{info, warn};

use crate::config::AlarmCfg;
use crate::error::{BalancerError, Result};
use crate::hw_error::hw;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    High,
    Low,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmState {
    pub active: bool,
    pub last_notified_at: Option<Instant>,
}

pub struct AlarmManager<N: Notifier> {
    cfg: AlarmCfg,
    high: Vec<AlarmState>,
    low: Vec<AlarmState>,
    last_voltage: Vec<Option<f32>>,
    line: bool,
    notifier: N,
}

impl<N: Notifier> AlarmManager<N> {
    pub fn new(cfg: AlarmCfg, cells: usize, notifier: N) -> Self {
        Self {
            cfg,
            high: vec![AlarmState::default(); cells],
            low: vec![AlarmState::default(); cells],
            last_voltage: vec![None; cells],
            line: false,
            notifier,
        }
    }

    pub fn state(&self, cell: usize, dir: Direction) -> Option<AlarmState> {
        self.states(dir).get(cell).copied()
    }

    pub fn any_active(&self) -> bool {
        self.high.iter().chain(&self.low).any(|s| s.active)
    }

    /// Level last written to the alarm line.
    pub fn line_asserted(&self) -> bool {
        self.line
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Update alarms from this cycle's readings, drive the line, notify.
    ///
    /// A line write failure is returned after notifications have been
    /// handled; the line is retried on the next cycle.
    pub fn evaluate<B: HardwareChannel + ?Sized>(
        &mut self,
        now: Instant,
        readings: &[Option<f32>],
        bus: &mut B,
    ) -> Result<()> {
        let (high_v, low_v, band) = (self.cfg.high_v, self.cfg.low_v, self.cfg.deadband_v);
        for (cell, reading) in readings.iter().enumerate() {
            let Some(v) = *reading else { continue };
            if let Some(slot) = self.last_voltage.get_mut(cell) {
                *slot = Some(v);
            }
            if let Some(h) = self.high.get_mut(cell) {
                if !h.active && v > high_v {
                    h.active = true;
                    warn!(cell, volts = v, threshold = high_v, "high voltage alarm raised");
                } else if h.active && v <= high_v - band {
                    h.active = false;
                    info!(cell, volts = v, "high voltage alarm cleared");
                }
            }
            if let Some(l) = self.low.get_mut(cell) {
                if !l.active && v < low_v {
                    l.active = true;
                    warn!(cell, volts = v, threshold = low_v, "low voltage alarm raised");
                } else if l.active && v >= low_v + band {
                    l.active = false;
                    info!(cell, volts = v, "low voltage alarm cleared");
                }
            }
        }

        let line_res = self.drive_line(bus, self.any_active());
        self.notify(now, Direction::High);
        self.notify(now, Direction::Low);
        line_res
    }

    /// Drive the line to `asserted` if it is not already there.
    pub fn drive_line<B: HardwareChannel + ?Sized>(
        &mut self,
        bus: &mut B,
        asserted: bool,
    ) -> Result<()> {
        if asserted == self.line {
            return Ok(());
        }
        self.write_line(bus, asserted)
    }

    /// Unconditional write, used at startup and shutdown.
    pub fn reset_line<B: HardwareChannel + ?Sized>(&mut self, bus: &mut B) -> Result<()> {
        self.write_line(bus, false)
    }

    fn write_line<B: HardwareChannel + ?Sized>(&mut self, bus: &mut B, asserted: bool) -> Result<()> {
        let pin = self.cfg.alarm_pin;
        bus.set_digital_output(pin, asserted)
            .map_err(hw(pin, "alarm_line"))?;
        self.line = asserted;
        info!(asserted, "alarm line");
        Ok(())
    }

    /// Send a one-off alert outside the per-direction throttle.
    pub fn send_report(&mut self, body: &str) -> Result<()> {
        self.notifier
            .send_alert(&self.cfg.subject, body)
            .map_err(|e| BalancerError::Notification(e.to_string()))
    }

    fn states(&self, dir: Direction) -> &[AlarmState] {
        match dir {
            Direction::High => &self.high,
            Direction::Low => &self.low,
        }
    }

    fn notify(&mut self, now: Instant, dir: Direction) {
        let active: Vec<usize> = self
            .states(dir)
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.active.then_some(i))
            .collect();
        if active.is_empty() {
            return;
        }
        let last = self.states(dir).iter().filter_map(|s| s.last_notified_at).max();
        if let Some(last) = last
            && now.saturating_duration_since(last) < self.cfg.notify_interval
        {
            return;
        }

        let body = self.body(dir, &active);
        if let Err(e) = self.notifier.send_alert(&self.cfg.subject, &body) {
            let e = BalancerError::Notification(e.to_string());
            warn!(direction = dir.label(), error = %e, "alert dropped");
        } else {
            info!(direction = dir.label(), cells = ?active, "alert dispatched");
        }
        let states = match dir {
            Direction::High => &mut self.high,
            Direction::Low => &mut self.low,
        };
        for &i in &active {
            if let Some(s) = states.get_mut(i) {
                s.last_notified_at = Some(now);
            }
        }
    }

    fn body(&self, dir: Direction, cells: &[usize]) -> String {
        let (what, threshold) = match dir {
            Direction::High => ("above the high", self.cfg.high_v),
            Direction::Low => ("below the low", self.cfg.low_v),
        };
        let mut body = format!("{} voltage alarm\n\n", capitalize(dir.label()));
        for &cell in cells {
            let v = self.last_voltage.get(cell).copied().flatten();
            let _ = match v {
                Some(v) => writeln!(
                    body,
                    "Cell {}: {v:.2} V is {what} threshold of {threshold:.2} V",
                    cell + 1
                ),
                None => writeln!(body, "Cell {}: voltage unknown this cycle", cell + 1),
            };
        }
        body
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
