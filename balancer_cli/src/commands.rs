//! Command bodies: wiring config, bus, notifier and threads around the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use balancer_config::Config;
use balancer_core::{
    LogNotifier, NotificationDispatcher, Orchestrator, SelfCheckReport, Watchdog, WatchdogCfg,
};
use balancer_traits::MonotonicClock;
use eyre::WrapErr;
use serde_json::json;

use crate::display::Display;
use crate::error_fmt::{CliError, EXIT_WATCHDOG};
use crate::hw::{Bus, open_bus};
use crate::mailer::SmtpNotifier;

const DISPLAY_REFRESH: Duration = Duration::from_secs(1);

/// Mail goes through the dispatcher thread; with email disabled alerts are
/// only logged.
fn notifier(cfg: &Config) -> eyre::Result<NotificationDispatcher> {
    let capacity = cfg.email.queue_capacity;
    if cfg.email.enabled {
        let smtp = SmtpNotifier::from_config(&cfg.email)?;
        Ok(NotificationDispatcher::spawn(smtp, capacity))
    } else {
        Ok(NotificationDispatcher::spawn(LogNotifier, capacity))
    }
}

fn orchestrator<N: balancer_traits::Notifier>(
    cfg: &Config,
    notifier: N,
) -> eyre::Result<Orchestrator<Bus, MonotonicClock, N>> {
    let bus = open_bus(cfg)?;
    Ok(Orchestrator::from_config(
        cfg,
        bus,
        MonotonicClock::new(),
        notifier,
    )?)
}

fn voltages_json(readings: &[Option<f32>]) -> serde_json::Value {
    readings
        .iter()
        .enumerate()
        .map(|(i, v)| json!({ "cell": i + 1, "voltage": v }))
        .collect()
}

pub fn run(cfg: &Config, cycles: Option<u64>, no_display: bool, json_mode: bool) -> eyre::Result<()> {
    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        ctrlc::set_handler(move || quit.store(true, Ordering::Relaxed))
            .wrap_err("install Ctrl-C handler")?;
    }

    let mut orch = orchestrator(cfg, notifier(cfg)?)?.with_quit_flag(quit.clone());
    orch.startup()?;

    let wd_cfg = WatchdogCfg::from(cfg);
    let watchdog = wd_cfg.enabled.then(|| {
        tracing::info!(timeout_s = wd_cfg.timeout.as_secs_f32(), "watchdog armed");
        Watchdog::spawn(orch.heartbeat(), wd_cfg, MonotonicClock::new(), |stalled| {
            eprintln!(
                "watchdog: control loop stalled for {:.1}s; exiting for restart",
                stalled.as_secs_f32()
            );
            std::process::exit(EXIT_WATCHDOG);
        })
    });
    let display = (!no_display && !json_mode)
        .then(|| Display::spawn(orch.status_board(), quit.clone(), DISPLAY_REFRESH));

    let ran = orch.run(cycles);
    drop(display);
    drop(watchdog);
    let last = orch.status_board().latest();
    orch.shutdown()?;

    if json_mode {
        let readings: Vec<_> = last.cells.iter().map(|c| c.voltage).collect();
        println!(
            "{}",
            json!({
                "cycles": ran,
                "phase": last.phase.label(),
                "alarm": last.any_alarm(),
                "cells": voltages_json(&readings),
            })
        );
    } else {
        println!("Stopped after {ran} cycles; relays open.");
    }
    Ok(())
}

fn print_report(report: &SelfCheckReport, min_delta: f32, json_mode: bool) {
    if json_mode {
        let balance: Vec<_> = report
            .balance
            .iter()
            .map(|b| {
                json!({
                    "high_cell": b.high_cell + 1,
                    "low_cell": b.low_cell + 1,
                    "readings": b.readings,
                    "high_delta": b.high_delta,
                    "low_delta": b.low_delta,
                    "passed": b.failure(min_delta).is_none(),
                })
            })
            .collect();
        println!(
            "{}",
            json!({
                "passed": report.passed(),
                "cells": voltages_json(&report.voltages),
                "balance_test": balance,
                "failures": report.failures,
            })
        );
        return;
    }
    for (i, v) in report.voltages.iter().enumerate() {
        println!("{}", balancer_ui::cell_line(i, *v, false, false));
    }
    for b in &report.balance {
        let verdict = if b.failure(min_delta).is_none() { "ok" } else { "FAILED" };
        println!(
            "Balance test: cell {} -> cell {}, high fell {:.3} V, low rose {:.3} V over {} readings: {verdict}",
            b.high_cell + 1,
            b.low_cell + 1,
            b.high_delta,
            b.low_delta,
            b.readings
        );
    }
    if report.passed() {
        println!("Self-check passed");
    }
}

pub fn self_check(cfg: &Config, balance_test: bool, json_mode: bool) -> eyre::Result<()> {
    let mut orch = orchestrator(cfg, notifier(cfg)?)?;
    let report = orch.self_check(balance_test);
    print_report(&report, cfg.startup.min_voltage_delta, json_mode);
    if !report.passed() {
        // Alarm line stays asserted for the operator.
        return Err(CliError::SelfCheck(report.failures).into());
    }
    orch.shutdown()?;
    Ok(())
}

pub fn sample(cfg: &Config, json_mode: bool) -> eyre::Result<()> {
    let mut orch = orchestrator(cfg, LogNotifier)?;
    orch.startup()?;
    let readings = orch.sample_once();
    orch.shutdown()?;

    if json_mode {
        println!("{}", json!({ "cells": voltages_json(&readings) }));
        return Ok(());
    }
    for (i, v) in readings.iter().enumerate() {
        println!("{}", balancer_ui::cell_line(i, *v, false, false));
    }
    let total: Option<f32> = readings.iter().copied().sum();
    match total {
        Some(t) => println!("Total: {t:.2} V"),
        None => println!("Total: unknown"),
    }
    Ok(())
}
