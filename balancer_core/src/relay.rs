//! Relay routing and DC-DC enable, with break-before-make ordering.
//!
//! `RelaySequencer` is the only writer of the relay register and the converter
//! enable line. The converter is enabled only after a mask for the requested
//! pair has been written and has settled; a new mask, including the all-off
//! mask, is written only after the converter has been disabled and the relays
//! have had time to settle. If the enable line cannot be cleared the relays
//! are left where they are.
use std::collections::BTreeMap;

use balancer_traits::{Clock, HardwareChannel};
use tracing::{debug, error, info, warn};

use crate::config::RelayCfg;
use crate::error::{BalancerError, Result};
use crate::hw_error::hw;

/// Mask written to the relay register to open every relay.
pub const ALL_OFF: u8 = 0;

/// Tries at clearing the enable line before a disconnect gives up.
const DISABLE_ATTEMPTS: u32 = 3;

/// Validated (high, low) → relay mask table for a fixed cell count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMap {
    cells: usize,
    masks: BTreeMap<(usize, usize), u8>,
}

impl RelayMap {
    /// Build the map, rejecting anything but a complete and unambiguous
    /// table for `cells` cells.
    pub fn new(
        cells: usize,
        entries: impl IntoIterator<Item = ((usize, usize), u8)>,
    ) -> Result<Self> {
        let mut masks = BTreeMap::new();
        for ((high, low), mask) in entries {
            if high >= cells || low >= cells || high == low {
                return Err(BalancerError::Config(format!(
                    "relay pair {high} -> {low} is not valid for {cells} cells"
                )));
            }
            if mask == ALL_OFF {
                return Err(BalancerError::Config(format!(
                    "relay pair {high} -> {low} maps to the all-off mask"
                )));
            }
            if masks.values().any(|&m| m == mask) {
                return Err(BalancerError::Config(format!(
                    "relay mask {mask:#010b} is used by more than one pair"
                )));
            }
            if masks.insert((high, low), mask).is_some() {
                return Err(BalancerError::Config(format!(
                    "relay pair {high} -> {low} is listed twice"
                )));
            }
        }
        for high in 0..cells {
            for low in (0..cells).filter(|&l| l != high) {
                if !masks.contains_key(&(high, low)) {
                    return Err(BalancerError::Config(format!(
                        "relay pair {high} -> {low} has no mapping"
                    )));
                }
            }
        }
        Ok(Self { cells, masks })
    }

    pub fn cells(&self) -> usize {
        self.cells
    }

    pub fn mask(&self, high: usize, low: usize) -> Option<u8> {
        self.masks.get(&(high, low)).copied()
    }

    /// Reverse lookup; `None` for the all-off mask or unknown masks.
    pub fn pair_for(&self, mask: u8) -> Option<(usize, usize)> {
        self.masks
            .iter()
            .find_map(|(&pair, &m)| (m == mask).then_some(pair))
    }

    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), u8)> + '_ {
        self.masks.iter().map(|(&p, &m)| (p, m))
    }
}

/// What the sequencer last commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayState {
    pub mask: u8,
    /// Pair the mask encodes, `None` when open or unknown.
    pub pair: Option<(usize, usize)>,
    /// The mask has been held for a full settle delay.
    pub settled: bool,
    pub converter_enabled: bool,
}

impl RelayState {
    pub fn is_neutral(&self) -> bool {
        self.mask == ALL_OFF && !self.converter_enabled
    }
}

pub struct RelaySequencer<C: Clock> {
    cfg: RelayCfg,
    map: RelayMap,
    state: RelayState,
    clock: C,
}

impl<C: Clock> RelaySequencer<C> {
    pub fn new(cfg: RelayCfg, map: RelayMap, clock: C) -> Self {
        Self {
            cfg,
            map,
            state: RelayState::default(),
            clock,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn cfg(&self) -> &RelayCfg {
        &self.cfg
    }

    pub fn map(&self) -> &RelayMap {
        &self.map
    }

    /// Converter may be moving charge.
    pub fn is_energized(&self) -> bool {
        self.state.converter_enabled
    }

    /// Route `high` onto the converter input and `low` onto its output, then
    /// enable the converter. Any failure leaves the relays driven to neutral
    /// on a best-effort basis.
    pub fn connect<B: HardwareChannel + ?Sized>(
        &mut self,
        bus: &mut B,
        high: usize,
        low: usize,
    ) -> Result<()> {
        match self.try_connect(bus, high, low) {
            Ok(()) => {
                info!(high, low, mask = self.state.mask, "balancing path connected");
                Ok(())
            }
            Err(e) => {
                match &e {
                    BalancerError::SequencingViolation(_) => {
                        error!(high, low, error = %e, "connect aborted");
                    }
                    _ => warn!(high, low, error = %e, "connect failed"),
                }
                if let Err(e2) = self.disconnect(bus) {
                    error!(error = %e2, "neutral drive after failed connect also failed");
                }
                Err(e)
            }
        }
    }

    fn try_connect<B: HardwareChannel + ?Sized>(
        &mut self,
        bus: &mut B,
        high: usize,
        low: usize,
    ) -> Result<()> {
        if self.state.converter_enabled {
            self.disable_converter(bus)?;
            self.clock.sleep(self.cfg.settle);
        }
        let mask = self.map.mask(high, low).ok_or_else(|| {
            BalancerError::Config(format!("relay pair {high} -> {low} has no mapping"))
        })?;
        self.write_mask(bus, mask)?;
        self.clock.sleep(self.cfg.settle);
        self.state.settled = true;
        if self.state.pair != Some((high, low)) {
            return Err(BalancerError::SequencingViolation(format!(
                "settled mask {:#010b} does not encode {high} -> {low}",
                self.state.mask
            )));
        }
        self.set_converter(bus, true)
    }

    /// Disable the converter, wait, open every relay.
    ///
    /// The enable line is always driven low, whatever the sequencer believes.
    /// If that fails the relays are not touched and the error is returned;
    /// the converter stays marked as energized so the next disconnect or
    /// connect tries again.
    pub fn disconnect<B: HardwareChannel + ?Sized>(&mut self, bus: &mut B) -> Result<()> {
        self.disable_converter(bus)?;
        self.clock.sleep(self.cfg.settle);
        if let Err(e) = self.write_mask(bus, ALL_OFF) {
            warn!(error = %e, "relay release failed");
            return Err(e);
        }
        debug!("relays open");
        Ok(())
    }

    /// Startup drive to a known neutral state regardless of what we believe
    /// the hardware is doing.
    pub fn force_neutral<B: HardwareChannel + ?Sized>(&mut self, bus: &mut B) -> Result<()> {
        let res = self.disconnect(bus);
        if res.is_ok() {
            info!("relays driven to neutral");
        }
        res
    }

    fn disable_converter<B: HardwareChannel + ?Sized>(&mut self, bus: &mut B) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.set_converter(bus, false) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < DISABLE_ATTEMPTS => {
                    warn!(attempt, error = %e, "converter disable failed; retrying");
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempts = attempt, error = %e, "converter disable failed; relays left in place");
                    return Err(e);
                }
            }
        }
    }

    fn set_converter<B: HardwareChannel + ?Sized>(&mut self, bus: &mut B, on: bool) -> Result<()> {
        if on && !(self.state.settled && self.state.pair.is_some()) {
            return Err(BalancerError::SequencingViolation(
                "converter enable requested without a settled pair".into(),
            ));
        }
        let pin = self.cfg.dc_dc_pin;
        match bus.set_digital_output(pin, on) {
            Ok(()) => {
                self.state.converter_enabled = on;
                debug!(pin, on, "dc-dc enable");
                Ok(())
            }
            Err(e) => {
                // Level unknown after a failed enable; a failed disable
                // leaves the previous level in place.
                self.state.converter_enabled |= on;
                Err(hw(pin, "set_converter")(e))
            }
        }
    }

    fn write_mask<B: HardwareChannel + ?Sized>(&mut self, bus: &mut B, mask: u8) -> Result<()> {
        if self.state.converter_enabled {
            return Err(BalancerError::SequencingViolation(format!(
                "relay mask {mask:#010b} requested while the converter is enabled"
            )));
        }
        self.state.settled = false;
        self.state.pair = None;
        let cfg = self.cfg;
        bus.select_channel(cfg.mux_addr, cfg.relay_channel)
            .map_err(hw(cfg.mux_addr, "select_channel"))?;
        bus.write_register(cfg.relay_addr, cfg.relay_reg, &[mask])
            .map_err(hw(cfg.relay_addr, "write_relays"))?;
        self.state.mask = mask;
        self.state.pair = self.map.pair_for(mask);
        debug!(mask = format_args!("{mask:#010b}"), "relay mask written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_cell_entries() -> Vec<((usize, usize), u8)> {
        vec![
            ((0, 1), 0x21),
            ((0, 2), 0x41),
            ((1, 0), 0x12),
            ((1, 2), 0x42),
            ((2, 0), 0x14),
            ((2, 1), 0x24),
        ]
    }

    #[test]
    fn map_round_trips_pairs() {
        let map = RelayMap::new(3, three_cell_entries()).unwrap();
        assert_eq!(map.mask(2, 0), Some(0x14));
        assert_eq!(map.pair_for(0x14), Some((2, 0)));
        assert_eq!(map.pair_for(ALL_OFF), None);
    }

    #[test]
    fn map_rejects_missing_pair() {
        let mut entries = three_cell_entries();
        entries.pop();
        let err = RelayMap::new(3, entries).unwrap_err();
        assert!(err.to_string().contains("2 -> 1 has no mapping"));
    }

    #[test]
    fn map_rejects_shared_mask() {
        let mut entries = three_cell_entries();
        entries[5].1 = 0x21;
        assert!(RelayMap::new(3, entries).is_err());
    }
}
