//! Balance decision state machine: Idle → Balancing → Resting → Idle.
use std::time::{Duration, Instant};

use balancer_traits::{Clock, HardwareChannel};
use tracing::{debug, error, info, warn};

use crate::config::BalanceCfg;
use crate::error::{BalancerError, Result};
use crate::relay::RelaySequencer;
use crate::util::extremes;

/// One high → low charge transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSession {
    pub high_cell: usize,
    pub low_cell: usize,
    pub started_at: Instant,
    pub planned_duration: Duration,
}

impl BalanceSession {
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.elapsed(now) >= self.planned_duration
    }

    /// Fraction of the planned duration already spent, clamped to 0..=1.
    pub fn progress(&self, now: Instant) -> f32 {
        if self.planned_duration.is_zero() {
            return 1.0;
        }
        (self.elapsed(now).as_secs_f32() / self.planned_duration.as_secs_f32()).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Balancing(BalanceSession),
    Resting { until: Instant },
}

pub struct BalanceController {
    cfg: BalanceCfg,
    state: ControllerState,
}

impl BalanceController {
    pub fn new(cfg: BalanceCfg) -> Self {
        Self {
            cfg,
            state: ControllerState::Idle,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn session(&self) -> Option<BalanceSession> {
        match self.state {
            ControllerState::Balancing(s) => Some(s),
            _ => None,
        }
    }

    /// Advance the state machine with this cycle's readings.
    ///
    /// `inhibit` blocks new sessions and ends a running one early. On any
    /// relay error the converter path is forced open and the controller
    /// returns to `Idle`; the error is still reported to the caller.
    pub fn tick<B, C>(
        &mut self,
        now: Instant,
        readings: &[Option<f32>],
        inhibit: bool,
        relay: &mut RelaySequencer<C>,
        bus: &mut B,
    ) -> Result<()>
    where
        B: HardwareChannel + ?Sized,
        C: Clock,
    {
        let res = match self.state {
            ControllerState::Idle if relay.is_energized() => {
                // An earlier disconnect could not clear the enable line.
                warn!("converter still enabled while idle; retrying disconnect");
                relay.disconnect(bus)
            }
            ControllerState::Idle => self.evaluate(now, readings, inhibit, relay, bus),
            ControllerState::Balancing(session) => {
                if inhibit {
                    info!(
                        high = session.high_cell,
                        low = session.low_cell,
                        "alarm active; ending balance session early"
                    );
                    self.finish(now, session, relay, bus)
                } else if session.is_due(now) {
                    self.finish(now, session, relay, bus)
                } else {
                    Ok(())
                }
            }
            ControllerState::Resting { until } => {
                if now >= until {
                    debug!("rest period over");
                    self.state = ControllerState::Idle;
                }
                Ok(())
            }
        };

        if let Err(e) = &res {
            match e {
                BalancerError::SequencingViolation(_) => error!(error = %e, "balancing paused"),
                _ => warn!(error = %e, "balancing paused"),
            }
            if let Err(e2) = relay.disconnect(bus) {
                error!(error = %e2, "forced disconnect failed");
            }
            self.state = ControllerState::Idle;
        }
        res
    }

    /// Drop any running session without touching the relays; the caller
    /// owns the disconnect (shutdown path).
    pub fn abort(&mut self) -> Option<BalanceSession> {
        let session = self.session();
        self.state = ControllerState::Idle;
        if let Some(s) = session {
            info!(high = s.high_cell, low = s.low_cell, "balance session aborted");
        }
        session
    }

    fn evaluate<B, C>(
        &mut self,
        now: Instant,
        readings: &[Option<f32>],
        inhibit: bool,
        relay: &mut RelaySequencer<C>,
        bus: &mut B,
    ) -> Result<()>
    where
        B: HardwareChannel + ?Sized,
        C: Clock,
    {
        let Some(ext) = extremes(readings) else {
            debug!("fewer than two valid readings; no balance decision");
            return Ok(());
        };
        if ext.spread() < self.cfg.threshold_v {
            return Ok(());
        }
        if inhibit {
            debug!(spread = ext.spread(), "imbalance found but balancing is inhibited");
            return Ok(());
        }

        relay.connect(bus, ext.high_cell, ext.low_cell)?;
        let session = BalanceSession {
            high_cell: ext.high_cell,
            low_cell: ext.low_cell,
            started_at: now,
            planned_duration: self.cfg.duration,
        };
        info!(
            high = ext.high_cell,
            high_v = ext.high_v,
            low = ext.low_cell,
            low_v = ext.low_v,
            secs = self.cfg.duration.as_secs_f32(),
            "balancing started"
        );
        self.state = ControllerState::Balancing(session);
        Ok(())
    }

    fn finish<B, C>(
        &mut self,
        now: Instant,
        session: BalanceSession,
        relay: &mut RelaySequencer<C>,
        bus: &mut B,
    ) -> Result<()>
    where
        B: HardwareChannel + ?Sized,
        C: Clock,
    {
        relay.disconnect(bus)?;
        let until = now + self.cfg.rest;
        info!(
            high = session.high_cell,
            low = session.low_cell,
            rest_secs = self.cfg.rest.as_secs_f32(),
            "balancing finished; resting"
        );
        self.state = ControllerState::Resting { until };
        Ok(())
    }
}
