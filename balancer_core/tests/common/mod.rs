#![allow(dead_code)]
//! Shared fixtures for balancer_core integration tests.

use balancer_config::{Config, load_toml};
use balancer_core::mocks::{BusScript, RecordingBus, RecordingClock, RecordingNotifier, Trace};
use balancer_core::Orchestrator;

pub const ADC: u8 = 0x48;
pub const CONVERSION_REG: u8 = 0x00;
pub const MUX: u8 = 0x70;
pub const RELAY_ADDR: u8 = 0x10;
pub const RELAY_REG: u8 = 0x11;
pub const DC_DC_PIN: u8 = 17;
pub const ALARM_PIN: u8 = 27;
pub const VOLTS_PER_COUNT: f32 = 0.01;

/// Three 5S-module "cells" around 20 V, 0.01 V per count.
pub const CONFIG: &str = r#"
[general]
number_of_batteries = 3
voltage_difference_to_balance = 0.1
balance_duration_seconds = 10
sleep_time_between_checks = 5.0
balance_rest_period_seconds = 30
low_voltage_threshold_per_battery = 18.0
high_voltage_threshold_per_battery = 21.0
email_alert_interval_seconds = 300

[sampling]
number_of_samples = 2
max_retries = 2
conversion_delay_ms = 50
voltage_divider_ratio = 0.01

[relays]
settle_ms = 100
table = [
  { high = 0, low = 1, mask = 0x21 },
  { high = 0, low = 2, mask = 0x41 },
  { high = 1, low = 0, mask = 0x12 },
  { high = 1, low = 2, mask = 0x42 },
  { high = 2, low = 0, mask = 0x14 },
  { high = 2, low = 1, mask = 0x24 },
]
"#;

pub fn config() -> Config {
    config_from(CONFIG)
}

pub fn config_from(text: &str) -> Config {
    let cfg = load_toml(text).expect("parse TOML");
    cfg.validate().expect("valid config");
    cfg
}

pub fn counts(volts: f32) -> i16 {
    (volts / VOLTS_PER_COUNT).round() as i16
}

/// Steady conversion results, cell `i` on channel `i`.
pub fn set_voltages(script: &BusScript, volts: &[f32]) {
    for (ch, v) in volts.iter().enumerate() {
        script.set_counts(ch as u8, counts(*v));
    }
}

pub struct Rig {
    pub orch: Orchestrator<RecordingBus, RecordingClock, RecordingNotifier>,
    pub trace: Trace,
    pub script: BusScript,
    pub clock: RecordingClock,
    pub notifier: RecordingNotifier,
}

pub fn rig_with(cfg: &Config, volts: &[f32]) -> Rig {
    let trace = Trace::default();
    let bus = RecordingBus::with_trace(ADC, CONVERSION_REG, trace.clone());
    let script = bus.script();
    set_voltages(&script, volts);
    let clock = RecordingClock::new(trace.clone());
    let notifier = RecordingNotifier::default();
    let mut orch = Orchestrator::from_config(cfg, bus, clock.clone(), notifier.clone())
        .expect("orchestrator");
    orch.startup().expect("startup");
    Rig {
        orch,
        trace,
        script,
        clock,
        notifier,
    }
}

pub fn rig(volts: &[f32]) -> Rig {
    rig_with(&config(), volts)
}
