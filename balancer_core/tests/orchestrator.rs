//! End-to-end cycles against the simulated pack and the recording bus.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use balancer_config::Config;
use balancer_core::mocks::RecordingNotifier;
use balancer_core::selfcheck::MIN_TREND_READINGS;
use balancer_core::{ControllerPhase, ControllerState, Orchestrator};
use balancer_hardware::{SimHandle, SimLayout, SimulatedPack};
use balancer_traits::ManualClock;
use common::{ALARM_PIN, CONFIG, DC_DC_PIN, RELAY_ADDR, RELAY_REG, config, rig};

type SimOrchestrator = Orchestrator<SimulatedPack, ManualClock, RecordingNotifier>;

fn sim_layout(cfg: &Config) -> SimLayout {
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

fn sim(volts: &[f32]) -> (SimOrchestrator, SimHandle, ManualClock) {
    let cfg = config();
    let pack = SimulatedPack::new(sim_layout(&cfg), volts.to_vec());
    let handle = pack.handle();
    let clock = ManualClock::new();
    let mut orch =
        Orchestrator::from_config(&cfg, pack, clock.clone(), RecordingNotifier::default())
            .unwrap();
    orch.startup().unwrap();
    (orch, handle, clock)
}

fn spread(v: &[f32]) -> f32 {
    let max = v.iter().copied().fold(f32::MIN, f32::max);
    let min = v.iter().copied().fold(f32::MAX, f32::min);
    max - min
}

#[test]
fn loop_converges_on_simulated_pack() {
    let (mut orch, handle, _) = sim(&[20.0, 20.3, 19.9]);
    let ran = orch.run(Some(400));
    assert_eq!(ran, 400);
    let v = handle.voltages();
    assert!(spread(&v) < 0.15, "spread still {} in {v:?}", spread(&v));
    orch.shutdown().unwrap();
    assert!(!handle.dc_dc_on());
    assert_eq!(handle.relay_mask(), 0);
}

#[test]
fn first_cycle_starts_a_session_on_widest_pair() {
    let (mut orch, handle, _) = sim(&[20.0, 20.2, 19.9]);
    let snap = orch.run_cycle();
    assert_eq!(snap.phase, ControllerPhase::Balancing);
    let session = snap.session.unwrap();
    assert_eq!((session.high_cell, session.low_cell), (1, 2));
    assert!(handle.dc_dc_on());
    assert_eq!(handle.relay_mask(), 0x42);
}

#[test]
fn status_board_tracks_rest_period() {
    let (mut orch, _, clock) = sim(&[20.0, 20.2, 19.9]);
    let board = orch.status_board();
    orch.run_cycle();
    clock.advance(Duration::from_secs(10));
    orch.run_cycle();
    let snap = board.latest();
    assert_eq!(snap.phase, ControllerPhase::Resting);
    assert!(snap.rest_remaining.unwrap() <= Duration::from_secs(30));
    assert_eq!(snap.cycle, 2);
    assert!(snap.total_voltage().is_some());
}

#[test]
fn quit_flag_stops_before_first_cycle() {
    let quit = Arc::new(AtomicBool::new(true));
    let (orch, _, _) = sim(&[20.0, 20.0, 20.0]);
    let mut orch = orch.with_quit_flag(quit);
    assert_eq!(orch.run(None), 0);
}

#[test]
fn zero_cycle_limit_runs_nothing() {
    let (mut orch, handle, _) = sim(&[20.0, 20.5, 19.9]);
    let board = orch.status_board();
    assert_eq!(orch.run(Some(0)), 0);
    assert_eq!(orch.cycle(), 0);
    assert_eq!(board.latest().cycle, 0);
    assert!(!handle.dc_dc_on());
}

#[test]
fn run_beats_heartbeat_between_cycles() {
    let (mut orch, _, _) = sim(&[20.0, 20.0, 20.0]);
    let hb = orch.heartbeat();
    orch.run(Some(5));
    assert_eq!(hb.count(), 4);
}

#[test]
fn drop_while_balancing_opens_relays() {
    let (mut orch, handle, _) = sim(&[20.0, 20.5, 19.9]);
    orch.run_cycle();
    assert!(handle.dc_dc_on());
    drop(orch);
    assert!(!handle.dc_dc_on());
    assert_eq!(handle.relay_mask(), 0);
}

#[test]
fn shutdown_releases_every_output() {
    let mut r = rig(&[21.5, 20.4, 20.0]);
    r.orch.run_cycle();
    assert!(r.orch.alarms().line_asserted());
    r.orch.shutdown().unwrap();
    assert_eq!(r.trace.outputs(ALARM_PIN).last(), Some(&false));
    assert_eq!(r.trace.outputs(DC_DC_PIN).last(), Some(&false));
    assert_eq!(r.trace.writes(RELAY_ADDR, RELAY_REG).last(), Some(&vec![0]));
}

#[test]
fn unreadable_cell_is_unknown_not_fatal() {
    let (mut orch, handle, _) = sim(&[20.0, 20.5, 19.9]);
    handle.set_failing(2, true);
    let snap = orch.run_cycle();
    assert_eq!(snap.cells[2].voltage, None);
    // The remaining two still balance.
    let s = snap.session.unwrap();
    assert_eq!((s.high_cell, s.low_cell), (1, 0));
}

#[test]
fn alarm_ends_session_and_inhibits_restart() {
    let (mut orch, handle, clock) = sim(&[20.0, 20.5, 19.9]);
    orch.run_cycle();
    assert!(matches!(orch.controller_state(), ControllerState::Balancing(_)));

    handle.set_voltage(1, 21.4);
    clock.advance(Duration::from_secs(1));
    let snap = orch.run_cycle();
    assert_eq!(snap.phase, ControllerPhase::Resting);
    assert!(snap.alarm_line);
    assert!(!handle.dc_dc_on());
    assert!(handle.alarm_on());
}

#[test]
fn self_check_passes_and_moves_charge() {
    let (mut orch, handle, _) = sim(&[20.0, 20.4, 19.8]);
    let report = orch.self_check(true);
    assert!(report.passed(), "{:?}", report.failures);
    assert_eq!(report.balance.len(), 6, "one outcome per relay pair");
    for outcome in &report.balance {
        assert!(outcome.failure(0.01).is_none(), "{outcome:?}");
        assert!(outcome.readings >= MIN_TREND_READINGS);
    }
    let widest = report
        .balance
        .iter()
        .find(|o| (o.high_cell, o.low_cell) == (1, 2))
        .unwrap();
    assert!(widest.high_delta > 0.01);
    assert!(widest.low_delta > 0.01);
    assert!(!handle.dc_dc_on());
    assert_eq!(handle.relay_mask(), 0);
    assert!(!handle.alarm_on());
    assert!(orch.alarms().notifier().sent().is_empty());
}

#[test]
fn self_check_on_equal_cells_tests_every_pair() {
    let (mut orch, handle, _) = sim(&[20.0, 20.0, 20.0]);
    let report = orch.self_check(true);
    assert!(report.passed(), "{:?}", report.failures);
    let pairs: Vec<_> = report
        .balance
        .iter()
        .map(|o| (o.high_cell, o.low_cell))
        .collect();
    assert_eq!(pairs, [(0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1)]);
    assert!(!handle.dc_dc_on());
}

#[test]
fn self_check_flags_the_one_miswired_pair() {
    let cfg = config();
    let mut layout = sim_layout(&cfg);
    // Mask 0x24 closes contacts that connect nothing.
    layout.pairs.retain(|&(mask, _)| mask != 0x24);
    let pack = SimulatedPack::new(layout, vec![20.0, 20.4, 19.8]);
    let handle = pack.handle();
    let mut orch =
        Orchestrator::from_config(&cfg, pack, ManualClock::new(), RecordingNotifier::default())
            .unwrap();
    orch.startup().unwrap();

    let report = orch.self_check(true);
    assert!(!report.passed());
    assert_eq!(report.balance.len(), 6);
    assert_eq!(report.failures.len(), 1, "{:?}", report.failures);
    assert!(
        report.failures[0].contains("cell 3 -> cell 2 moved too little"),
        "{}",
        report.failures[0]
    );
    let failed: Vec<_> = report
        .balance
        .iter()
        .filter(|o| o.failure(0.01).is_some())
        .map(|o| (o.high_cell, o.low_cell))
        .collect();
    assert_eq!(failed, [(2, 1)]);
    assert!(handle.alarm_on());
    assert!(!handle.dc_dc_on());

    let sent = orch.alarms().notifier().sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.starts_with("Startup self-test failures:\n"));
    assert!(sent[0].1.contains("cell 3 -> cell 2"));
}

#[test]
fn self_check_fails_on_dead_cell_and_asserts_alarm() {
    let (mut orch, handle, _) = sim(&[20.0, 20.4, 19.8]);
    handle.set_failing(0, true);
    let report = orch.self_check(true);
    assert!(!report.passed());
    assert!(report.balance.is_empty(), "balance test skipped after a failed sampling pass");
    assert!(handle.alarm_on());
    let sent = orch.alarms().notifier().sent();
    assert!(sent[0].1.contains("cell 1 could not be sampled"));
}

#[test]
fn self_check_fails_when_gap_does_not_shrink() {
    // Recording bus returns fixed counts, so no charge ever moves.
    let mut r = rig(&[20.0, 20.4, 19.8]);
    let report = r.orch.self_check(true);
    assert!(!report.passed());
    assert_eq!(report.failures.len(), 6);
    assert!(report.failures[0].contains("cell 1 -> cell 2 moved too little"));
    assert!(r.orch.alarms().line_asserted());
    assert_eq!(r.trace.outputs(ALARM_PIN).last(), Some(&true));
    let sent = r.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.starts_with("Startup self-test failures:"));
}

#[test]
fn self_check_needs_enough_trend_readings() {
    let text = format!(
        "{CONFIG}\n[startup]\ntest_balance_duration_seconds = 3\ntest_read_interval_seconds = 2.0\n"
    );
    let cfg = common::config_from(&text);
    let mut r = common::rig_with(&cfg, &[20.0, 20.4, 19.8]);
    let report = r.orch.self_check(true);
    assert!(!report.passed());
    assert!(report.balance.iter().all(|o| o.readings == 2));
    assert!(report.failures[0].contains("only 2 trend readings"), "{}", report.failures[0]);
}

#[test]
fn sample_once_does_not_touch_relays() {
    let mut r = rig(&[20.0, 20.4, 19.8]);
    r.trace.clear();
    let v = r.orch.sample_once();
    assert_eq!(v.len(), 3);
    assert!(v.iter().all(Option::is_some));
    assert!(r.trace.outputs(DC_DC_PIN).is_empty());
    assert!(r.trace.writes(RELAY_ADDR, RELAY_REG).is_empty());
}

#[test]
fn notifier_is_driven_through_the_cycle() {
    let (mut orch, handle, _) = sim(&[17.5, 20.0, 20.0]);
    orch.run_cycle();
    assert!(handle.alarm_on());
    assert_eq!(orch.alarms().notifier().sent().len(), 1);
}
