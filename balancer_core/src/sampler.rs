//! Per-cell voltage acquisition.
//!
//! One attempt reads the ADC `samples_per_attempt` times through the
//! multiplexer, discards failed reads (and outliers when configured) and
//! averages the rest. An attempt with nothing left is retried, up to
//! `max_attempts`; only then is the cell reported as unknown for this cycle.
use std::time::Instant;

use balancer_traits::{Clock, HardwareChannel};
use tracing::{debug, trace, warn};

use crate::config::{AdcCfg, SamplerCfg};
use crate::error::{BalancerError, Result};
use crate::hw_error::hw;

/// One series cell as seen by the sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: usize,
    /// Multiplexer channel the cell's divider is wired to.
    pub channel: u8,
    pub calibration: f32,
    /// Last averaged, calibrated voltage.
    pub voltage: Option<f32>,
    pub sampled_at: Option<Instant>,
}

impl Cell {
    pub fn new(id: usize, channel: u8, calibration: f32) -> Self {
        Self {
            id,
            channel,
            calibration,
            voltage: None,
            sampled_at: None,
        }
    }
}

pub struct VoltageSampler<C: Clock> {
    cfg: SamplerCfg,
    adc: AdcCfg,
    cells: Vec<Cell>,
    clock: C,
}

impl<C: Clock> VoltageSampler<C> {
    pub fn new(cfg: SamplerCfg, adc: AdcCfg, cells: Vec<Cell>, clock: C) -> Self {
        Self {
            cfg,
            adc,
            cells,
            clock,
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn adc(&self) -> &AdcCfg {
        &self.adc
    }

    pub fn max_attempts(&self) -> u32 {
        self.cfg.max_attempts
    }

    /// Sample `cell`, updating its record only on success.
    pub fn sample<B: HardwareChannel + ?Sized>(&mut self, bus: &mut B, cell: usize) -> Result<f32> {
        let (channel, calibration) = match self.cells.get(cell) {
            Some(c) => (c.channel, c.calibration),
            None => return Err(BalancerError::Config(format!("unknown cell {cell}"))),
        };

        for attempt in 1..=self.cfg.max_attempts {
            if let Some(mean_raw) = self.attempt(bus, cell, channel) {
                let volts = mean_raw * self.cfg.volts_per_count * calibration;
                let now = self.clock.now();
                if let Some(c) = self.cells.get_mut(cell) {
                    c.voltage = Some(volts);
                    c.sampled_at = Some(now);
                }
                debug!(cell, attempt, volts, "cell sampled");
                return Ok(volts);
            }
            debug!(cell, attempt, "sampling attempt produced no usable reads");
        }

        Err(BalancerError::Sensor {
            cell,
            attempts: self.cfg.max_attempts,
        })
    }

    /// Sample every cell in order. Failures become `None` and are logged.
    pub fn sample_all<B: HardwareChannel + ?Sized>(&mut self, bus: &mut B) -> Vec<Option<f32>> {
        (0..self.cells.len())
            .map(|cell| match self.sample(bus, cell) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(cell, error = %e, "voltage unknown this cycle");
                    None
                }
            })
            .collect()
    }

    /// One batch. Returns the mean raw count of the reads that survived.
    fn attempt<B: HardwareChannel + ?Sized>(
        &self,
        bus: &mut B,
        cell: usize,
        channel: u8,
    ) -> Option<f32> {
        let mut raws = Vec::with_capacity(self.cfg.samples_per_attempt as usize);
        for _ in 0..self.cfg.samples_per_attempt {
            match self.read_once(bus, channel) {
                Ok(raw) => {
                    trace!(cell, channel, raw, "adc read");
                    raws.push(f32::from(raw));
                }
                Err(e) => debug!(cell, channel, error = %e, "adc read failed"),
            }
        }
        if let Some(tol) = self.cfg.outlier_tolerance {
            raws = reject_outliers(&raws, tol);
        }
        mean(&raws)
    }

    fn read_once<B: HardwareChannel + ?Sized>(&self, bus: &mut B, channel: u8) -> Result<i16> {
        let adc = &self.adc;
        bus.select_channel(adc.mux_addr, channel)
            .map_err(hw(adc.mux_addr, "select_channel"))?;
        bus.write_register(adc.adc_addr, adc.config_reg, &adc.config_word.to_be_bytes())
            .map_err(hw(adc.adc_addr, "write_config"))?;
        self.clock.sleep(self.cfg.conversion_delay);
        let bytes = bus
            .read_register(adc.adc_addr, adc.conversion_reg)
            .map_err(hw(adc.adc_addr, "read_conversion"))?;
        Ok(i16::from_be_bytes(bytes))
    }
}

fn mean(xs: &[f32]) -> Option<f32> {
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().sum::<f32>() / xs.len() as f32)
}

/// Keep the reads within `tol` (relative) of the batch mean.
fn reject_outliers(raws: &[f32], tol: f32) -> Vec<f32> {
    let Some(m) = mean(raws) else {
        return Vec::new();
    };
    let limit = m.abs() * tol;
    raws.iter().copied().filter(|r| (r - m).abs() <= limit).collect()
}
