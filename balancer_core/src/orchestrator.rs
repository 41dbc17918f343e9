//! The periodic control cycle.
//!
//! Each cycle samples every cell, updates alarms, lets the controller act
//! (inhibited while any alarm is active) and publishes a `StatusSnapshot`.
//! Between cycles the loop sleeps and bumps the watchdog heartbeat. The
//! orchestrator owns the bus and lends it to the sampler and sequencer.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use balancer_config::Config;
use balancer_traits::{Clock, HardwareChannel, Notifier};
use tracing::{debug, error, info, warn};

use crate::alarm::{AlarmManager, Direction};
use crate::config::{BalanceCfg, SamplerCfg, SelfCheckCfg};
use crate::controller::{BalanceController, ControllerState};
use crate::conversions::cells_from_config;
use crate::error::{BalancerError, Result};
use crate::relay::{RelayMap, RelaySequencer, RelayState};
use crate::sampler::{Cell, VoltageSampler};
use crate::status::{CellStatus, ControllerPhase, SessionStatus, StatusBoard, StatusSnapshot};
use crate::util::duration_from_secs_f64;
use crate::watchdog::Heartbeat;

/// Longest uninterrupted sleep between quit-flag checks.
const QUIT_POLL: Duration = Duration::from_millis(100);

pub struct Orchestrator<B, C, N>
where
    B: HardwareChannel,
    C: Clock + Clone,
    N: Notifier,
{
    pub(crate) bus: B,
    pub(crate) clock: C,
    pub(crate) sampler: VoltageSampler<C>,
    pub(crate) relay: RelaySequencer<C>,
    pub(crate) controller: BalanceController,
    pub(crate) alarms: AlarmManager<N>,
    pub(crate) self_check: SelfCheckCfg,
    status: StatusBoard,
    heartbeat: Heartbeat,
    quit: Arc<AtomicBool>,
    period: Duration,
    cycle: u64,
    shut_down: bool,
}

impl<B, C, N> Orchestrator<B, C, N>
where
    B: HardwareChannel,
    C: Clock + Clone,
    N: Notifier,
{
    /// Wire the engine from a validated config.
    pub fn from_config(cfg: &Config, bus: B, clock: C, notifier: N) -> Result<Self> {
        let map = RelayMap::try_from(cfg)?;
        let cells = cells_from_config(cfg);
        let n = cells.len();
        if map.cells() != n {
            return Err(BalancerError::Config(format!(
                "relay map covers {} cells, expected {n}",
                map.cells()
            )));
        }
        let sampler = VoltageSampler::new(
            SamplerCfg::from(&cfg.sampling),
            cfg.into(),
            cells,
            clock.clone(),
        );
        let relay = RelaySequencer::new(cfg.into(), map, clock.clone());
        Ok(Self {
            bus,
            sampler,
            relay,
            controller: BalanceController::new(BalanceCfg::from(&cfg.general)),
            alarms: AlarmManager::new(cfg.into(), n, notifier),
            self_check: SelfCheckCfg::from(&cfg.startup),
            status: StatusBoard::new(StatusSnapshot::empty(n)),
            heartbeat: Heartbeat::new(),
            quit: Arc::new(AtomicBool::new(false)),
            period: duration_from_secs_f64(cfg.general.sleep_time_between_checks),
            cycle: 0,
            shut_down: false,
            clock,
        })
    }

    /// Share an externally owned quit flag (Ctrl-C handler, display thread).
    pub fn with_quit_flag(mut self, quit: Arc<AtomicBool>) -> Self {
        self.quit = quit;
        self
    }

    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    pub fn status_board(&self) -> StatusBoard {
        self.status.clone()
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    pub fn controller_state(&self) -> ControllerState {
        self.controller.state()
    }

    pub fn relay_state(&self) -> RelayState {
        self.relay.state()
    }

    pub fn alarms(&self) -> &AlarmManager<N> {
        &self.alarms
    }

    pub fn cells(&self) -> &[Cell] {
        self.sampler.cells()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Put the outputs into a known state: relays open, converter off,
    /// alarm line low. Both steps are attempted.
    pub fn startup(&mut self) -> Result<()> {
        let relay_res = self.relay.force_neutral(&mut self.bus);
        let line_res = self.alarms.reset_line(&mut self.bus);
        relay_res.and(line_res)?;
        info!(cells = self.sampler.cell_count(), "balancer ready");
        Ok(())
    }

    /// Sample every cell once without running the controller.
    pub fn sample_once(&mut self) -> Vec<Option<f32>> {
        self.sampler.sample_all(&mut self.bus)
    }

    /// One control cycle. Faults are logged and absorbed here.
    pub fn run_cycle(&mut self) -> Arc<StatusSnapshot> {
        let readings = self.sampler.sample_all(&mut self.bus);
        let now = self.clock.now();

        if let Err(e) = self.alarms.evaluate(now, &readings, &mut self.bus) {
            warn!(error = %e, "alarm line update failed");
        }
        let inhibit = self.alarms.any_active();
        if let Err(e) = self
            .controller
            .tick(now, &readings, inhibit, &mut self.relay, &mut self.bus)
        {
            debug!(error = %e, "controller tick failed");
        }

        self.cycle += 1;
        let snapshot = self.snapshot(now, &readings);
        debug!(
            cycle = self.cycle,
            phase = snapshot.phase.label(),
            ?readings,
            "cycle complete"
        );
        self.status.publish(snapshot);
        self.status.latest()
    }

    /// Run cycles until the quit flag is set or `max_cycles` have run.
    /// Returns the number of cycles run.
    pub fn run(&mut self, max_cycles: Option<u64>) -> u64 {
        let mut ran = 0u64;
        while !self.quit.load(Ordering::Relaxed) && max_cycles.is_none_or(|m| ran < m) {
            self.run_cycle();
            ran += 1;
            if max_cycles.is_some_and(|m| ran >= m) {
                break;
            }
            self.sleep_unless_quit(self.period);
            self.heartbeat.beat();
        }
        info!(cycles = ran, "control loop stopped");
        ran
    }

    /// End any session, open the relays and release the alarm line. Every
    /// step is attempted; the first error is returned.
    pub fn shutdown(mut self) -> Result<()> {
        self.controller.abort();
        let relay_res = self.relay.disconnect(&mut self.bus);
        let line_res = self.alarms.reset_line(&mut self.bus);
        self.shut_down = true;
        match relay_res.and(line_res) {
            Ok(()) => {
                info!("balancer shut down cleanly");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "shutdown left outputs in an unknown state");
                Err(e)
            }
        }
    }

    fn sleep_unless_quit(&self, total: Duration) {
        let deadline = self.clock.now() + total;
        loop {
            if self.quit.load(Ordering::Relaxed) {
                return;
            }
            let now = self.clock.now();
            if now >= deadline {
                return;
            }
            self.clock.sleep((deadline - now).min(QUIT_POLL));
        }
    }

    fn snapshot(&self, now: Instant, readings: &[Option<f32>]) -> StatusSnapshot {
        let cells = readings
            .iter()
            .enumerate()
            .map(|(id, &voltage)| CellStatus {
                id,
                voltage,
                high_alarm: self
                    .alarms
                    .state(id, Direction::High)
                    .is_some_and(|s| s.active),
                low_alarm: self
                    .alarms
                    .state(id, Direction::Low)
                    .is_some_and(|s| s.active),
            })
            .collect();
        let (phase, session, rest_remaining) = match self.controller.state() {
            ControllerState::Idle => (ControllerPhase::Idle, None, None),
            ControllerState::Balancing(s) => (
                ControllerPhase::Balancing,
                Some(SessionStatus {
                    high_cell: s.high_cell,
                    low_cell: s.low_cell,
                    elapsed: s.elapsed(now),
                    planned: s.planned_duration,
                    progress: s.progress(now),
                }),
                None,
            ),
            ControllerState::Resting { until } => (
                ControllerPhase::Resting,
                None,
                Some(until.saturating_duration_since(now)),
            ),
        };
        StatusSnapshot {
            cycle: self.cycle,
            cells,
            phase,
            session,
            rest_remaining,
            alarm_line: self.alarms.line_asserted(),
            converter_enabled: self.relay.is_energized(),
        }
    }
}

impl<B, C, N> Drop for Orchestrator<B, C, N>
where
    B: HardwareChannel,
    C: Clock + Clone,
    N: Notifier,
{
    fn drop(&mut self) {
        if self.shut_down || !self.relay.is_energized() {
            return;
        }
        warn!("orchestrator dropped while balancing; opening relays");
        if let Err(e) = self.relay.disconnect(&mut self.bus) {
            error!(error = %e, "safety disconnect failed");
        }
    }
}
