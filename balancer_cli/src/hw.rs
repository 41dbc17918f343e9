//! Bus assembly: the Raspberry Pi bus with `--features hardware` on Linux,
//! otherwise the simulated pack.

use balancer_config::Config;
use balancer_hardware::{SimLayout, SimulatedPack};
use balancer_traits::HardwareChannel;
use eyre::WrapErr;

pub type Bus = Box<dyn HardwareChannel + Send>;

/// Comma-separated starting voltages, one per cell.
pub const SIM_VOLTAGES_ENV: &str = "BALANCER_SIM_VOLTAGES";
/// Comma-separated 1-based cell numbers whose reads time out.
pub const SIM_FAIL_CELLS_ENV: &str = "BALANCER_SIM_FAIL_CELLS";

pub fn open_bus(cfg: &Config) -> eyre::Result<Bus> {
    #[cfg(all(feature = "hardware", target_os = "linux"))]
    {
        let pins = [cfg.gpio.dc_dc_relay_pin, cfg.gpio.alarm_relay_pin];
        let bus = balancer_hardware::PiBus::open(cfg.bus.i2c_bus_number, &pins)
            .wrap_err_with(|| format!("open I2C bus {}", cfg.bus.i2c_bus_number))?;
        tracing::info!(bus = cfg.bus.i2c_bus_number, "hardware bus opened");
        Ok(Box::new(bus))
    }
    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    {
        let pack = simulated_pack(
            cfg,
            std::env::var(SIM_VOLTAGES_ENV).ok().as_deref(),
            std::env::var(SIM_FAIL_CELLS_ENV).ok().as_deref(),
        )?;
        Ok(Box::new(pack))
    }
}

pub fn sim_layout(cfg: &Config) -> SimLayout {
    SimLayout {
        mux_addr: cfg.bus.multiplexer_address,
        adc_addr: cfg.adc.voltage_meter_address,
        conversion_reg: cfg.adc.conversion_register,
        relay_addr: cfg.bus.relay_address,
        relay_reg: cfg.bus.relay_register,
        relay_channel: cfg.bus.relay_channel,
        dc_dc_pin: cfg.gpio.dc_dc_relay_pin,
        alarm_pin: cfg.gpio.alarm_relay_pin,
        volts_per_count: cfg.sampling.voltage_divider_ratio,
        cell_channels: (0..cfg.general.number_of_batteries)
            .map(|i| cfg.cell_channel(i))
            .collect(),
        pairs: cfg
            .relays
            .table
            .iter()
            .map(|e| (e.mask, (e.high, e.low)))
            .collect(),
    }
}

/// Build the simulated pack. Without explicit voltages every cell sits in
/// the middle of the alarm window.
pub fn simulated_pack(
    cfg: &Config,
    voltages: Option<&str>,
    fail_cells: Option<&str>,
) -> eyre::Result<SimulatedPack> {
    let n = cfg.general.number_of_batteries;
    let g = &cfg.general;
    let volts = match voltages {
        Some(list) => {
            let v = list
                .split(',')
                .map(|s| s.trim().parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
                .wrap_err_with(|| format!("{SIM_VOLTAGES_ENV} must be a list of numbers"))?;
            if v.len() != n {
                eyre::bail!("{SIM_VOLTAGES_ENV} has {} values, expected {n}", v.len());
            }
            v
        }
        None => vec![
            f32::midpoint(
                g.low_voltage_threshold_per_battery,
                g.high_voltage_threshold_per_battery
            );
            n
        ],
    };

    let pack = SimulatedPack::new(sim_layout(cfg), volts);
    if let Some(list) = fail_cells.filter(|s| !s.trim().is_empty()) {
        let handle = pack.handle();
        for item in list.split(',') {
            let cell: usize = item
                .trim()
                .parse()
                .wrap_err_with(|| format!("{SIM_FAIL_CELLS_ENV} must list cell numbers"))?;
            if cell == 0 || cell > n {
                eyre::bail!("{SIM_FAIL_CELLS_ENV}: cell {cell} is outside 1..={n}");
            }
            handle.set_failing(cell - 1, true);
        }
    }
    tracing::info!(cells = n, "using simulated battery pack");
    Ok(pack)
}
