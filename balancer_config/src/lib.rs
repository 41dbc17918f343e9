#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the cell balancer.
//!
//! - `Config` and its sections are deserialized from TOML and checked by
//!   `validate()`; any error there is fatal at startup.
//! - `[general]` keys also accept the PascalCase names used by the legacy INI
//!   file (`NumberOfBatteries`, `VoltageDifferenceToBalance`, ...).
//! - The relay table must cover every ordered (high, low) pair for the
//!   configured cell count; there is no built-in table because the mask bits
//!   depend on how the relay module is wired.
use std::collections::HashSet;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct General {
    #[serde(alias = "NumberOfBatteries")]
    pub number_of_batteries: usize,
    #[serde(alias = "VoltageDifferenceToBalance")]
    pub voltage_difference_to_balance: f32,
    #[serde(alias = "BalanceDurationSeconds")]
    pub balance_duration_seconds: u64,
    #[serde(alias = "SleepTimeBetweenChecks")]
    pub sleep_time_between_checks: f64,
    #[serde(alias = "BalanceRestPeriodSeconds")]
    pub balance_rest_period_seconds: u64,
    #[serde(alias = "LowVoltageThresholdPerBattery")]
    pub low_voltage_threshold_per_battery: f32,
    #[serde(alias = "HighVoltageThresholdPerBattery")]
    pub high_voltage_threshold_per_battery: f32,
    #[serde(alias = "EmailAlertIntervalSeconds")]
    pub email_alert_interval_seconds: u64,
    /// Deadband an alarmed voltage must clear before the alarm drops.
    #[serde(default = "default_hysteresis")]
    pub alarm_hysteresis_volts: f32,
}

fn default_hysteresis() -> f32 {
    0.05
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Sampling {
    /// ADC conversions per attempt
    pub number_of_samples: u32,
    /// Attempts per cell per cycle before giving up
    pub max_retries: u32,
    /// Wait between programming the ADC and reading the result
    pub conversion_delay_ms: u64,
    /// Volts at the cell terminals per ADC count.
    #[serde(alias = "VoltageDividerRatio")]
    pub voltage_divider_ratio: f32,
    /// Optional relative tolerance; readings further than this from the
    /// attempt's mean are discarded (e.g. 0.05 = 5%).
    pub outlier_tolerance: Option<f32>,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            number_of_samples: 2,
            max_retries: 2,
            conversion_delay_ms: 50,
            // ±6.144 V full scale over 32767 counts, behind a 0.01592 divider
            voltage_divider_ratio: 0.011_778,
            outlier_tolerance: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Adc {
    pub voltage_meter_address: u8,
    pub config_register: u8,
    pub conversion_register: u8,
    pub continuous_mode_config: u16,
    pub sample_rate_config: u16,
    pub gain_config: u16,
}

impl Default for Adc {
    fn default() -> Self {
        Self {
            voltage_meter_address: 0x48,
            config_register: 0x01,
            conversion_register: 0x00,
            continuous_mode_config: 0x4000,
            sample_rate_config: 0x1400,
            gain_config: 0x2000,
        }
    }
}

impl Adc {
    /// Word written to the config register before each conversion.
    pub fn config_word(&self) -> u16 {
        self.continuous_mode_config | self.sample_rate_config | self.gain_config
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Bus {
    #[serde(alias = "I2C_BusNumber")]
    pub i2c_bus_number: u8,
    pub multiplexer_address: u8,
    pub relay_address: u8,
    pub relay_register: u8,
    /// Multiplexer channel the relay module hangs off
    pub relay_channel: u8,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            i2c_bus_number: 1,
            multiplexer_address: 0x70,
            relay_address: 0x10,
            relay_register: 0x11,
            relay_channel: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Gpio {
    #[serde(alias = "DC_DC_RelayPin")]
    pub dc_dc_relay_pin: u8,
    #[serde(alias = "AlarmRelayPin")]
    pub alarm_relay_pin: u8,
}

impl Default for Gpio {
    fn default() -> Self {
        Self {
            dc_dc_relay_pin: 17,
            alarm_relay_pin: 27,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RelayEntry {
    pub high: usize,
    pub low: usize,
    pub mask: u8,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Relays {
    /// Quiet time around every relay movement
    pub settle_ms: u64,
    pub table: Vec<RelayEntry>,
}

impl Default for Relays {
    fn default() -> Self {
        Self {
            settle_ms: 100,
            table: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Cells {
    /// Multiplexer channel per cell; empty means cell `i` is on channel `i`.
    pub channels: Vec<u8>,
    /// Calibration multiplier per cell; empty means 1.0 for every cell.
    pub calibration: Vec<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Email {
    pub enabled: bool,
    #[serde(alias = "SMTP_Server")]
    pub smtp_server: String,
    #[serde(alias = "SMTP_Port")]
    pub smtp_port: u16,
    #[serde(alias = "SenderEmail")]
    pub sender_email: String,
    #[serde(alias = "RecipientEmail")]
    pub recipient_email: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub subject: String,
    /// Alerts waiting for the mail thread; extra alerts are dropped
    pub queue_capacity: usize,
}

impl Default for Email {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: "smtp.example.com".into(),
            smtp_port: 587,
            sender_email: "alert@example.com".into(),
            recipient_email: "admin@example.com".into(),
            username: None,
            password: None,
            subject: "Battery Monitor Alert".into(),
            queue_capacity: 8,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Watchdog {
    pub enabled: bool,
    /// Timeout as a multiple of the expected cycle time
    pub timeout_multiplier: f64,
    /// Lower bound on the timeout regardless of cycle time
    pub min_timeout_seconds: u64,
    pub poll_ms: u64,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_multiplier: 4.0,
            min_timeout_seconds: 30,
            poll_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Startup {
    pub test_balance_duration_seconds: u64,
    pub min_voltage_delta: f32,
    pub test_read_interval_seconds: f64,
    /// Rest between two pair tests of the balance check.
    pub test_pair_rest_seconds: f64,
}

impl Default for Startup {
    fn default() -> Self {
        Self {
            test_balance_duration_seconds: 15,
            min_voltage_delta: 0.01,
            test_read_interval_seconds: 2.0,
            test_pair_rest_seconds: 5.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub general: General,
    #[serde(default)]
    pub sampling: Sampling,
    #[serde(default)]
    pub adc: Adc,
    #[serde(default)]
    pub bus: Bus,
    #[serde(default)]
    pub gpio: Gpio,
    #[serde(default)]
    pub relays: Relays,
    #[serde(default)]
    pub cells: Cells,
    #[serde(default)]
    pub email: Email,
    #[serde(default)]
    pub watchdog: Watchdog,
    #[serde(default)]
    pub startup: Startup,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("invalid configuration: cannot read {}: {e}", path.display()))?;
    let cfg = load_toml(&text)
        .map_err(|e| eyre::eyre!("invalid configuration in {}: {e}", path.display()))?;
    cfg.validate()
        .map_err(|e| eyre::eyre!("invalid configuration in {}: {e}", path.display()))?;
    Ok(cfg)
}

impl Config {
    /// Multiplexer channel for `cell`.
    pub fn cell_channel(&self, cell: usize) -> u8 {
        self.cells
            .channels
            .get(cell)
            .copied()
            .unwrap_or_else(|| u8::try_from(cell).unwrap_or(u8::MAX))
    }

    /// Calibration multiplier for `cell`.
    pub fn cell_calibration(&self, cell: usize) -> f32 {
        self.cells.calibration.get(cell).copied().unwrap_or(1.0)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        let g = &self.general;
        let n = g.number_of_batteries;

        // General
        if n < 2 {
            eyre::bail!("general.number_of_batteries must be >= 2");
        }
        if n > 7 {
            eyre::bail!(
                "general.number_of_batteries must be <= 7 (the relay module takes one multiplexer channel)"
            );
        }
        if !(g.voltage_difference_to_balance.is_finite() && g.voltage_difference_to_balance > 0.0)
        {
            eyre::bail!("general.voltage_difference_to_balance must be > 0");
        }
        if g.balance_duration_seconds == 0 {
            eyre::bail!("general.balance_duration_seconds must be >= 1");
        }
        if !(g.sleep_time_between_checks.is_finite() && g.sleep_time_between_checks > 0.0) {
            eyre::bail!("general.sleep_time_between_checks must be > 0");
        }
        if g.sleep_time_between_checks > 3600.0 {
            eyre::bail!("general.sleep_time_between_checks is unreasonably large (>1h)");
        }
        if !g.low_voltage_threshold_per_battery.is_finite()
            || !g.high_voltage_threshold_per_battery.is_finite()
        {
            eyre::bail!("general voltage thresholds must be finite");
        }
        if g.low_voltage_threshold_per_battery >= g.high_voltage_threshold_per_battery {
            eyre::bail!(
                "general.low_voltage_threshold_per_battery must be below high_voltage_threshold_per_battery"
            );
        }
        if !(g.alarm_hysteresis_volts.is_finite() && g.alarm_hysteresis_volts >= 0.0) {
            eyre::bail!("general.alarm_hysteresis_volts must be >= 0");
        }
        if 2.0 * g.alarm_hysteresis_volts
            >= g.high_voltage_threshold_per_battery - g.low_voltage_threshold_per_battery
        {
            eyre::bail!("general.alarm_hysteresis_volts must be less than half the threshold span");
        }

        // Sampling
        if self.sampling.number_of_samples == 0 {
            eyre::bail!("sampling.number_of_samples must be >= 1");
        }
        if self.sampling.max_retries == 0 {
            eyre::bail!("sampling.max_retries must be >= 1");
        }
        if self.sampling.conversion_delay_ms > 10_000 {
            eyre::bail!("sampling.conversion_delay_ms is unreasonably large (>10s)");
        }
        if !(self.sampling.voltage_divider_ratio.is_finite()
            && self.sampling.voltage_divider_ratio > 0.0)
        {
            eyre::bail!("sampling.voltage_divider_ratio must be > 0");
        }
        if let Some(tol) = self.sampling.outlier_tolerance
            && !(tol > 0.0 && tol <= 1.0)
        {
            eyre::bail!("sampling.outlier_tolerance must be in (0.0, 1.0]");
        }

        // Bus / cells
        if self.bus.relay_channel > 7 {
            eyre::bail!("bus.relay_channel must be in 0..=7");
        }
        if !self.cells.channels.is_empty() && self.cells.channels.len() != n {
            eyre::bail!(
                "cells.channels has {} entries, expected {n}",
                self.cells.channels.len()
            );
        }
        let mut seen_channels = HashSet::new();
        for cell in 0..n {
            let ch = self.cell_channel(cell);
            if ch > 7 {
                eyre::bail!("cells.channels[{cell}] must be in 0..=7");
            }
            if ch == self.bus.relay_channel {
                eyre::bail!("cells.channels[{cell}] collides with bus.relay_channel");
            }
            if !seen_channels.insert(ch) {
                eyre::bail!("cells.channels[{cell}] duplicates another cell's channel");
            }
        }
        if !self.cells.calibration.is_empty() && self.cells.calibration.len() != n {
            eyre::bail!(
                "cells.calibration has {} entries, expected {n}",
                self.cells.calibration.len()
            );
        }
        for (i, c) in self.cells.calibration.iter().enumerate() {
            if !(c.is_finite() && *c > 0.0) {
                eyre::bail!("cells.calibration[{i}] must be > 0");
            }
        }

        // GPIO
        if self.gpio.dc_dc_relay_pin == self.gpio.alarm_relay_pin {
            eyre::bail!("gpio.dc_dc_relay_pin and gpio.alarm_relay_pin must differ");
        }

        // Relays: exhaustive (high, low) coverage, no ambiguity
        if self.relays.settle_ms == 0 {
            eyre::bail!("relays.settle_ms must be >= 1");
        }
        let mut pairs = HashSet::new();
        let mut masks = HashSet::new();
        for e in &self.relays.table {
            if e.high >= n || e.low >= n {
                eyre::bail!(
                    "relays.table entry {} -> {} references a cell outside 0..{n}",
                    e.high,
                    e.low
                );
            }
            if e.high == e.low {
                eyre::bail!("relays.table entry {} -> {} connects a cell to itself", e.high, e.low);
            }
            if e.mask == 0 {
                eyre::bail!("relays.table entry {} -> {} has an all-off mask", e.high, e.low);
            }
            if !pairs.insert((e.high, e.low)) {
                eyre::bail!("relays.table has duplicate entries for {} -> {}", e.high, e.low);
            }
            if !masks.insert(e.mask) {
                eyre::bail!(
                    "relays.table mask {:#010b} is used by more than one pair",
                    e.mask
                );
            }
        }
        for high in 0..n {
            for low in 0..n {
                if high != low && !pairs.contains(&(high, low)) {
                    eyre::bail!("relays.table is missing pair {high} -> {low}");
                }
            }
        }

        // Email
        if self.email.enabled {
            if self.email.smtp_server.trim().is_empty() {
                eyre::bail!("email.smtp_server must be set when email is enabled");
            }
            if self.email.smtp_port == 0 {
                eyre::bail!("email.smtp_port must be > 0");
            }
            if !self.email.sender_email.contains('@') || !self.email.recipient_email.contains('@')
            {
                eyre::bail!("email.sender_email and email.recipient_email must be addresses");
            }
            if self.email.username.is_some() != self.email.password.is_some() {
                eyre::bail!("email.username and email.password must be set together");
            }
        }
        if self.email.queue_capacity == 0 {
            eyre::bail!("email.queue_capacity must be >= 1");
        }

        // Watchdog
        if !(self.watchdog.timeout_multiplier.is_finite() && self.watchdog.timeout_multiplier >= 2.0)
        {
            eyre::bail!("watchdog.timeout_multiplier must be >= 2.0");
        }
        if self.watchdog.poll_ms == 0 {
            eyre::bail!("watchdog.poll_ms must be >= 1");
        }

        // Startup
        if self.startup.test_balance_duration_seconds == 0 {
            eyre::bail!("startup.test_balance_duration_seconds must be >= 1");
        }
        if !(self.startup.min_voltage_delta.is_finite() && self.startup.min_voltage_delta >= 0.0) {
            eyre::bail!("startup.min_voltage_delta must be >= 0");
        }
        if !(self.startup.test_read_interval_seconds.is_finite()
            && self.startup.test_read_interval_seconds > 0.0)
        {
            eyre::bail!("startup.test_read_interval_seconds must be > 0");
        }
        if !(self.startup.test_pair_rest_seconds.is_finite()
            && self.startup.test_pair_rest_seconds >= 0.0)
        {
            eyre::bail!("startup.test_pair_rest_seconds must be >= 0");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        Ok(())
    }
}
