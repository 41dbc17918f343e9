//! `From` implementations bridging `balancer_config` types to `balancer_core` types.
//!
//! Several runtime structs draw from more than one TOML section (the ADC
//! address sits in `[adc]`, its multiplexer in `[bus]`), so most conversions
//! start from the whole `Config`.

use std::time::Duration;

use balancer_config::Config;

use crate::config::{AdcCfg, AlarmCfg, BalanceCfg, RelayCfg, SamplerCfg, SelfCheckCfg, WatchdogCfg};
use crate::error::BalancerError;
use crate::relay::RelayMap;
use crate::sampler::Cell;
use crate::util::duration_from_secs_f64;

// ── SamplerCfg ───────────────────────────────────────────────────────────────

impl From<&balancer_config::Sampling> for SamplerCfg {
    fn from(c: &balancer_config::Sampling) -> Self {
        Self {
            samples_per_attempt: c.number_of_samples,
            max_attempts: c.max_retries,
            conversion_delay: Duration::from_millis(c.conversion_delay_ms),
            volts_per_count: c.voltage_divider_ratio,
            outlier_tolerance: c.outlier_tolerance,
        }
    }
}

// ── AdcCfg ───────────────────────────────────────────────────────────────────

impl From<&Config> for AdcCfg {
    fn from(c: &Config) -> Self {
        Self {
            mux_addr: c.bus.multiplexer_address,
            adc_addr: c.adc.voltage_meter_address,
            config_reg: c.adc.config_register,
            conversion_reg: c.adc.conversion_register,
            config_word: c.adc.config_word(),
        }
    }
}

// ── RelayCfg ─────────────────────────────────────────────────────────────────

impl From<&Config> for RelayCfg {
    fn from(c: &Config) -> Self {
        Self {
            mux_addr: c.bus.multiplexer_address,
            relay_addr: c.bus.relay_address,
            relay_reg: c.bus.relay_register,
            relay_channel: c.bus.relay_channel,
            dc_dc_pin: c.gpio.dc_dc_relay_pin,
            settle: Duration::from_millis(c.relays.settle_ms),
        }
    }
}

// ── RelayMap ─────────────────────────────────────────────────────────────────

impl TryFrom<&Config> for RelayMap {
    type Error = BalancerError;

    fn try_from(c: &Config) -> Result<Self, Self::Error> {
        RelayMap::new(
            c.general.number_of_batteries,
            c.relays.table.iter().map(|e| ((e.high, e.low), e.mask)),
        )
    }
}

// ── BalanceCfg ───────────────────────────────────────────────────────────────

impl From<&balancer_config::General> for BalanceCfg {
    fn from(g: &balancer_config::General) -> Self {
        Self {
            threshold_v: g.voltage_difference_to_balance,
            duration: Duration::from_secs(g.balance_duration_seconds),
            rest: Duration::from_secs(g.balance_rest_period_seconds),
        }
    }
}

// ── AlarmCfg ─────────────────────────────────────────────────────────────────

impl From<&Config> for AlarmCfg {
    fn from(c: &Config) -> Self {
        Self {
            high_v: c.general.high_voltage_threshold_per_battery,
            low_v: c.general.low_voltage_threshold_per_battery,
            deadband_v: c.general.alarm_hysteresis_volts,
            notify_interval: Duration::from_secs(c.general.email_alert_interval_seconds),
            alarm_pin: c.gpio.alarm_relay_pin,
            subject: c.email.subject.clone(),
        }
    }
}

// ── WatchdogCfg ──────────────────────────────────────────────────────────────

impl From<&Config> for WatchdogCfg {
    /// Timeout is a multiple of the worst-case cycle: the loop sleep, every
    /// ADC conversion of every attempt, and a full relay reconnect.
    fn from(c: &Config) -> Self {
        let s = &c.sampling;
        let conversions = u64::try_from(c.general.number_of_batteries)
            .unwrap_or(u64::MAX)
            .saturating_mul(u64::from(s.max_retries))
            .saturating_mul(u64::from(s.number_of_samples));
        let sampling_ms = conversions.saturating_mul(s.conversion_delay_ms);
        let relay_ms = c.relays.settle_ms.saturating_mul(3);
        let cycle = duration_from_secs_f64(c.general.sleep_time_between_checks)
            + Duration::from_millis(sampling_ms.saturating_add(relay_ms));
        let scaled = duration_from_secs_f64(cycle.as_secs_f64() * c.watchdog.timeout_multiplier);
        Self {
            enabled: c.watchdog.enabled,
            timeout: scaled.max(Duration::from_secs(c.watchdog.min_timeout_seconds)),
            poll: Duration::from_millis(c.watchdog.poll_ms),
        }
    }
}

// ── SelfCheckCfg ─────────────────────────────────────────────────────────────

impl From<&balancer_config::Startup> for SelfCheckCfg {
    fn from(s: &balancer_config::Startup) -> Self {
        Self {
            test_duration: Duration::from_secs(s.test_balance_duration_seconds),
            read_interval: duration_from_secs_f64(s.test_read_interval_seconds),
            min_voltage_delta: s.min_voltage_delta,
            pair_rest: duration_from_secs_f64(s.test_pair_rest_seconds),
        }
    }
}

// ── Cells ────────────────────────────────────────────────────────────────────

/// Cell records for every configured battery.
pub fn cells_from_config(c: &Config) -> Vec<Cell> {
    (0..c.general.number_of_batteries)
        .map(|id| Cell::new(id, c.cell_channel(id), c.cell_calibration(id)))
        .collect()
}
