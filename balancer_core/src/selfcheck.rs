//! Startup self-check: device probes, a full sampling pass and an optional
//! short balance on every relay pair to prove each mapping moves charge in
//! the right direction.
use std::time::Duration;

use balancer_traits::{Clock, HardwareChannel, Notifier};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::hw_error::hw;
use crate::orchestrator::Orchestrator;

const MIN_STEP: Duration = Duration::from_millis(1);

/// Fewer trend readings than this cannot show a direction.
pub const MIN_TREND_READINGS: usize = 3;

/// Result of balancing one directional pair during the self-check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceTestOutcome {
    pub high_cell: usize,
    pub low_cell: usize,
    /// Trend points where both cells could be read.
    pub readings: usize,
    /// How far the high cell fell from the first to the last reading.
    pub high_delta: f32,
    /// How far the low cell rose from the first to the last reading.
    pub low_delta: f32,
}

impl BalanceTestOutcome {
    fn from_trends(high_cell: usize, low_cell: usize, high: &[f32], low: &[f32]) -> Self {
        let span = |t: &[f32]| match (t.first(), t.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        };
        Self {
            high_cell,
            low_cell,
            readings: high.len().min(low.len()),
            high_delta: -span(high),
            low_delta: span(low),
        }
    }

    /// Why this pair fails, if it does.
    pub fn failure(&self, min_delta: f32) -> Option<String> {
        let (h, l) = (self.high_cell + 1, self.low_cell + 1);
        if self.readings < MIN_TREND_READINGS {
            return Some(format!(
                "balance test cell {h} -> cell {l}: only {} trend readings (need {MIN_TREND_READINGS})",
                self.readings
            ));
        }
        if self.high_delta < min_delta || self.low_delta < min_delta {
            return Some(format!(
                "balance test cell {h} -> cell {l} moved too little (high fell {:.3} V, low rose {:.3} V, need {min_delta:.3} V)",
                self.high_delta, self.low_delta
            ));
        }
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelfCheckReport {
    pub voltages: Vec<Option<f32>>,
    /// One entry per pair tested, in relay table order.
    pub balance: Vec<BalanceTestOutcome>,
    pub failures: Vec<String>,
}

impl SelfCheckReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

impl<B, C, N> Orchestrator<B, C, N>
where
    B: HardwareChannel,
    C: Clock + Clone,
    N: Notifier,
{
    /// Run the self-check. A failed check asserts the alarm line and leaves
    /// it asserted; the relays are always left open.
    pub fn self_check(&mut self, balance_test: bool) -> SelfCheckReport {
        let mut report = SelfCheckReport::default();

        if let Err(e) = self.startup() {
            report.failures.push(format!("neutral drive failed: {e}"));
        }
        if let Err(e) = self.probe_devices() {
            report.failures.push(format!("device probe failed: {e}"));
        }

        report.voltages = self.sampler.sample_all(&mut self.bus);
        for (cell, v) in report.voltages.iter().enumerate() {
            if v.is_none() {
                report.failures.push(format!("cell {} could not be sampled", cell + 1));
            }
        }

        if balance_test && report.passed() {
            match self.balance_test() {
                Ok(outcomes) => {
                    let min = self.self_check.min_voltage_delta;
                    report
                        .failures
                        .extend(outcomes.iter().filter_map(|o| o.failure(min)));
                    report.balance = outcomes;
                }
                Err(e) => report.failures.push(format!("balance test failed: {e}")),
            }
        }

        if report.passed() {
            info!("self-check passed");
        } else {
            error!(failures = ?report.failures, "self-check failed");
            if let Err(e) = self.alarms.drive_line(&mut self.bus, true) {
                error!(error = %e, "could not assert alarm line");
            }
            let body = format!("Startup self-test failures:\n{}", report.failures.join("\n"));
            if let Err(e) = self.alarms.send_report(&body) {
                warn!(error = %e, "self-check alert dropped");
            }
        }
        report
    }

    /// Touch every device once: each cell's multiplexer channel and the ADC
    /// behind it, then the relay module.
    fn probe_devices(&mut self) -> Result<()> {
        let adc = *self.sampler.adc();
        for cell in self.sampler.cells() {
            self.bus
                .select_channel(adc.mux_addr, cell.channel)
                .map_err(hw(adc.mux_addr, "probe_mux"))?;
            self.bus
                .read_register(adc.adc_addr, adc.config_reg)
                .map_err(hw(adc.adc_addr, "probe_adc"))?;
        }
        let relay = *self.relay.cfg();
        self.bus
            .select_channel(relay.mux_addr, relay.relay_channel)
            .map_err(hw(relay.mux_addr, "probe_mux"))?;
        self.bus
            .read_register(relay.relay_addr, relay.relay_reg)
            .map_err(hw(relay.relay_addr, "probe_relays"))?;
        debug!("all devices answered");
        Ok(())
    }

    /// Balance every directional pair of the relay table in turn, resting
    /// between pairs.
    fn balance_test(&mut self) -> Result<Vec<BalanceTestOutcome>> {
        let pairs: Vec<(usize, usize)> = self.relay.map().iter().map(|(pair, _)| pair).collect();
        let mut outcomes = Vec::with_capacity(pairs.len());
        for (i, (high, low)) in pairs.into_iter().enumerate() {
            if i > 0 {
                self.clock.sleep(self.self_check.pair_rest);
            }
            outcomes.push(self.test_pair(high, low)?);
        }
        Ok(outcomes)
    }

    fn test_pair(&mut self, high: usize, low: usize) -> Result<BalanceTestOutcome> {
        let cfg = self.self_check;
        info!(
            high,
            low,
            secs = cfg.test_duration.as_secs_f32(),
            "testing balance pair"
        );

        self.relay.connect(&mut self.bus, high, low)?;
        let mut high_trend = Vec::new();
        let mut low_trend = Vec::new();
        let started = self.clock.now();
        while self.clock.since(started) < cfg.test_duration {
            let remaining = cfg.test_duration.saturating_sub(self.clock.since(started));
            self.clock
                .sleep(remaining.min(cfg.read_interval).max(MIN_STEP));
            let h = self.sampler.sample(&mut self.bus, high);
            let l = self.sampler.sample(&mut self.bus, low);
            match (h, l) {
                (Ok(h), Ok(l)) => {
                    debug!(high_v = h, low_v = l, "trend reading");
                    high_trend.push(h);
                    low_trend.push(l);
                }
                (h, l) => debug!(high = ?h.err(), low = ?l.err(), "trend reading skipped"),
            }
        }
        self.relay.disconnect(&mut self.bus)?;

        let outcome = BalanceTestOutcome::from_trends(high, low, &high_trend, &low_trend);
        info!(
            high,
            low,
            readings = outcome.readings,
            high_delta = outcome.high_delta,
            low_delta = outcome.low_delta,
            "pair test finished"
        );
        Ok(outcome)
    }
}
