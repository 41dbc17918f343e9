//! Runtime configuration for the control engine.
//!
//! These are separate from the TOML-deserialized config in `balancer_config`;
//! `conversions` bridges the two. All durations are resolved here so the
//! engine never deals with raw seconds or milliseconds.
use std::time::Duration;

/// Voltage acquisition policy.
#[derive(Debug, Clone)]
pub struct SamplerCfg {
    /// ADC reads per attempt.
    pub samples_per_attempt: u32,
    /// Attempts per cell per cycle.
    pub max_attempts: u32,
    /// Wait between programming the ADC and reading the conversion.
    pub conversion_delay: Duration,
    /// Volts at the cell per ADC count.
    pub volts_per_count: f32,
    /// Relative outlier tolerance; `None` keeps every reading.
    pub outlier_tolerance: Option<f32>,
}

impl Default for SamplerCfg {
    fn default() -> Self {
        Self {
            samples_per_attempt: 2,
            max_attempts: 2,
            conversion_delay: Duration::from_millis(50),
            volts_per_count: 0.011_778,
            outlier_tolerance: None,
        }
    }
}

/// Where the ADC lives and how to program it.
#[derive(Debug, Clone, Copy)]
pub struct AdcCfg {
    pub mux_addr: u8,
    pub adc_addr: u8,
    pub config_reg: u8,
    pub conversion_reg: u8,
    pub config_word: u16,
}

impl Default for AdcCfg {
    fn default() -> Self {
        Self {
            mux_addr: 0x70,
            adc_addr: 0x48,
            config_reg: 0x01,
            conversion_reg: 0x00,
            config_word: 0x7400,
        }
    }
}

/// Relay module and DC-DC enable line.
#[derive(Debug, Clone, Copy)]
pub struct RelayCfg {
    pub mux_addr: u8,
    pub relay_addr: u8,
    pub relay_reg: u8,
    /// Multiplexer channel of the relay module.
    pub relay_channel: u8,
    pub dc_dc_pin: u8,
    /// Quiet time around every relay movement.
    pub settle: Duration,
}

impl Default for RelayCfg {
    fn default() -> Self {
        Self {
            mux_addr: 0x70,
            relay_addr: 0x10,
            relay_reg: 0x11,
            relay_channel: 3,
            dc_dc_pin: 17,
            settle: Duration::from_millis(100),
        }
    }
}

/// Balance decision and session timing.
#[derive(Debug, Clone, Copy)]
pub struct BalanceCfg {
    /// Minimum max-min spread that starts a session.
    pub threshold_v: f32,
    pub duration: Duration,
    pub rest: Duration,
}

impl Default for BalanceCfg {
    fn default() -> Self {
        Self {
            threshold_v: 0.1,
            duration: Duration::from_secs(10),
            rest: Duration::from_secs(30),
        }
    }
}

/// Alarm thresholds, hysteresis and notification throttle.
#[derive(Debug, Clone)]
pub struct AlarmCfg {
    pub high_v: f32,
    pub low_v: f32,
    pub deadband_v: f32,
    /// Minimum spacing between two notifications of the same direction.
    pub notify_interval: Duration,
    pub alarm_pin: u8,
    pub subject: String,
}

impl Default for AlarmCfg {
    fn default() -> Self {
        Self {
            high_v: 4.2,
            low_v: 3.0,
            deadband_v: 0.05,
            notify_interval: Duration::from_secs(300),
            alarm_pin: 27,
            subject: "Battery Monitor Alert".into(),
        }
    }
}

/// Liveness supervision of the control loop.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogCfg {
    pub enabled: bool,
    pub timeout: Duration,
    pub poll: Duration,
}

impl Default for WatchdogCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(30),
            poll: Duration::from_millis(500),
        }
    }
}

/// Startup self-check balance test.
#[derive(Debug, Clone, Copy)]
pub struct SelfCheckCfg {
    pub test_duration: Duration,
    pub read_interval: Duration,
    /// Fall of the high cell and rise of the low cell each pair must show.
    pub min_voltage_delta: f32,
    /// Pause between pair tests.
    pub pair_rest: Duration,
}

impl Default for SelfCheckCfg {
    fn default() -> Self {
        Self {
            test_duration: Duration::from_secs(15),
            read_interval: Duration::from_secs(2),
            min_voltage_delta: 0.01,
            pair_rest: Duration::from_secs(5),
        }
    }
}
