//! In-process stand-in for the multiplexer, ADC, relay module and GPIO lines.
//!
//! Cells hold a voltage; an ADC read returns the counts the real divider would
//! produce for the currently selected cell. While the converter line is high
//! and the relay mask encodes a known pair, every conversion moves a little
//! charge from the high cell to the low one.
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use balancer_traits::{BoxError, HardwareChannel};
use tracing::{debug, trace};

use crate::error::HwError;

/// Addresses and pins the simulated pack answers on.
#[derive(Debug, Clone)]
pub struct SimLayout {
    pub mux_addr: u8,
    pub adc_addr: u8,
    pub conversion_reg: u8,
    pub relay_addr: u8,
    pub relay_reg: u8,
    pub relay_channel: u8,
    pub dc_dc_pin: u8,
    pub alarm_pin: u8,
    /// Volts per ADC count at the cell terminals.
    pub volts_per_count: f32,
    /// Multiplexer channel of each cell, indexed by cell id.
    pub cell_channels: Vec<u8>,
    /// Relay mask to (high, low) pair, used to simulate charge transfer.
    pub pairs: Vec<(u8, (usize, usize))>,
}

#[derive(Debug)]
pub struct SimState {
    pub voltages: Vec<f32>,
    pub failing_cells: BTreeSet<usize>,
    pub selected_channel: Option<u8>,
    pub relay_mask: u8,
    pub dc_dc_on: bool,
    pub alarm_on: bool,
    /// Volts moved from high to low per conversion while balancing.
    pub transfer_per_read: f32,
    pub reads: u64,
}

/// Cheap cloneable view on the simulated pack's state.
#[derive(Debug, Clone)]
pub struct SimHandle(Arc<Mutex<SimState>>);

impl SimHandle {
    pub fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.0.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn voltages(&self) -> Vec<f32> {
        self.lock().voltages.clone()
    }

    pub fn set_voltage(&self, cell: usize, volts: f32) {
        if let Some(v) = self.lock().voltages.get_mut(cell) {
            *v = volts;
        }
    }

    pub fn set_failing(&self, cell: usize, failing: bool) {
        let mut st = self.lock();
        if failing {
            st.failing_cells.insert(cell);
        } else {
            st.failing_cells.remove(&cell);
        }
    }

    pub fn dc_dc_on(&self) -> bool {
        self.lock().dc_dc_on
    }

    pub fn alarm_on(&self) -> bool {
        self.lock().alarm_on
    }

    pub fn relay_mask(&self) -> u8 {
        self.lock().relay_mask
    }
}

#[derive(Debug)]
pub struct SimulatedPack {
    layout: SimLayout,
    pair_by_mask: HashMap<u8, (usize, usize)>,
    state: SimHandle,
}

impl SimulatedPack {
    pub fn new(layout: SimLayout, voltages: Vec<f32>) -> Self {
        let pair_by_mask = layout.pairs.iter().copied().collect();
        let state = SimHandle(Arc::new(Mutex::new(SimState {
            voltages,
            failing_cells: BTreeSet::new(),
            selected_channel: None,
            relay_mask: 0,
            dc_dc_on: false,
            alarm_on: false,
            transfer_per_read: 0.002,
            reads: 0,
        })));
        Self {
            layout,
            pair_by_mask,
            state,
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.state.clone()
    }

    fn cell_for_channel(&self, channel: u8) -> Option<usize> {
        self.layout.cell_channels.iter().position(|&c| c == channel)
    }

    fn convert(&self, st: &mut SimState) -> Result<[u8; 2], HwError> {
        let channel = st.selected_channel.ok_or(HwError::NoDevice {
            addr: self.layout.adc_addr,
        })?;
        let cell = self.cell_for_channel(channel).ok_or(HwError::NoDevice {
            addr: self.layout.adc_addr,
        })?;
        if st.failing_cells.contains(&cell) {
            return Err(HwError::Timeout {
                addr: self.layout.adc_addr,
            });
        }
        if st.dc_dc_on
            && let Some(&(high, low)) = self.pair_by_mask.get(&st.relay_mask)
            && high < st.voltages.len()
            && low < st.voltages.len()
        {
            let dv = st.transfer_per_read;
            st.voltages[high] -= dv;
            st.voltages[low] += dv;
        }
        st.reads += 1;
        let volts = st.voltages.get(cell).copied().unwrap_or(0.0);
        let counts = if self.layout.volts_per_count > 0.0 {
            (volts / self.layout.volts_per_count).round()
        } else {
            0.0
        };
        let counts = counts.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
        trace!(cell, volts, counts, "sim conversion");
        Ok(counts.to_be_bytes())
    }
}

impl HardwareChannel for SimulatedPack {
    fn select_channel(&mut self, mux_addr: u8, channel: u8) -> Result<(), BoxError> {
        if mux_addr != self.layout.mux_addr {
            return Err(Box::new(HwError::NoDevice { addr: mux_addr }));
        }
        self.state.lock().selected_channel = Some(channel);
        Ok(())
    }

    fn read_register(&mut self, device_addr: u8, reg: u8) -> Result<[u8; 2], BoxError> {
        if device_addr == self.layout.adc_addr && reg == self.layout.conversion_reg {
            let mut st = self.state.lock();
            return Ok(self.convert(&mut st)?);
        }
        if device_addr == self.layout.adc_addr || device_addr == self.layout.relay_addr {
            return Ok([0, 0]);
        }
        Err(Box::new(HwError::NoDevice { addr: device_addr }))
    }

    fn write_register(&mut self, device_addr: u8, reg: u8, data: &[u8]) -> Result<(), BoxError> {
        if device_addr == self.layout.adc_addr {
            return Ok(());
        }
        if device_addr == self.layout.relay_addr && reg == self.layout.relay_reg {
            let mut st = self.state.lock();
            if st.selected_channel != Some(self.layout.relay_channel) {
                return Err(Box::new(HwError::NoDevice { addr: device_addr }));
            }
            let mask = data.first().copied().unwrap_or(0);
            debug!(mask = format_args!("{mask:#010b}"), "sim relay mask");
            st.relay_mask = mask;
            return Ok(());
        }
        Err(Box::new(HwError::NoDevice { addr: device_addr }))
    }

    fn set_digital_output(&mut self, pin: u8, high: bool) -> Result<(), BoxError> {
        let mut st = self.state.lock();
        if pin == self.layout.dc_dc_pin {
            st.dc_dc_on = high;
        } else if pin == self.layout.alarm_pin {
            st.alarm_on = high;
        } else {
            return Err(Box::new(HwError::Gpio {
                pin,
                message: "pin not wired in simulation".into(),
            }));
        }
        debug!(pin, high, "sim gpio");
        Ok(())
    }
}
