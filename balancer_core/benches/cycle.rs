use balancer_config::{Config, load_toml};
use balancer_core::Orchestrator;
use balancer_core::mocks::RecordingNotifier;
use balancer_core::util::extremes;
use balancer_hardware::{SimLayout, SimulatedPack};
use balancer_traits::ManualClock;
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

const CELLS: usize = 6;

// Six cells around the relay module's channel 3, every ordered pair routed
// with its own mask.
fn config() -> Config {
    let mut table = String::new();
    let mut mask = 1u8;
    for h in 0..CELLS {
        for l in (0..CELLS).filter(|&l| l != h) {
            table.push_str(&format!("  {{ high = {h}, low = {l}, mask = {mask} }},\n"));
            mask = mask.wrapping_add(1);
        }
    }
    let text = format!(
        r#"
[general]
number_of_batteries = {CELLS}
voltage_difference_to_balance = 0.05
balance_duration_seconds = 10
sleep_time_between_checks = 1.0
balance_rest_period_seconds = 5
low_voltage_threshold_per_battery = 3.0
high_voltage_threshold_per_battery = 4.3
email_alert_interval_seconds = 300

[sampling]
voltage_divider_ratio = 0.001

[cells]
channels = [0, 1, 2, 4, 5, 6]

[relays]
table = [
{table}]
"#
    );
    match load_toml(&text) {
        Ok(cfg) => cfg,
        Err(e) => panic!("bench config: {e}"),
    }
}

fn layout(cfg: &Config) -> SimLayout {
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
        cell_channels: (0..CELLS).map(|i| cfg.cell_channel(i)).collect(),
        pairs: cfg
            .relays
            .table
            .iter()
            .map(|e| (e.mask, (e.high, e.low)))
            .collect(),
    }
}

fn voltages() -> Vec<f32> {
    (0..CELLS).map(|i| 3.6 + 0.03 * i as f32).collect()
}

pub fn bench_cycle(c: &mut Criterion) {
    let mut g = c.benchmark_group("cycle");
    // BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p balancer_core --bench cycle
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }

    let cfg = config();
    g.bench_function("run_cycle_6_cells", |b| {
        b.iter_batched(
            || {
                let pack = SimulatedPack::new(layout(&cfg), voltages());
                let mut orch = Orchestrator::from_config(
                    &cfg,
                    pack,
                    ManualClock::new(),
                    RecordingNotifier::default(),
                )
                .ok()?;
                orch.startup().ok()?;
                Some(orch)
            },
            |orch| {
                if let Some(mut orch) = orch {
                    for _ in 0..10 {
                        black_box(orch.run_cycle());
                    }
                }
            },
            BatchSize::SmallInput,
        )
    });

    let readings: Vec<Option<f32>> = voltages().into_iter().map(Some).collect();
    g.bench_function("extremes_6_cells", |b| {
        b.iter(|| black_box(extremes(black_box(&readings))))
    });
    g.finish();
}

criterion_group!(cycle, bench_cycle);
criterion_main!(cycle);
