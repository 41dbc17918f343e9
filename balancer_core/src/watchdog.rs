//! Liveness supervision of the control loop.
//!
//! The loop bumps a `Heartbeat` once per cycle. `Watchdog` runs on its own
//! thread, sees only the counter, and calls its expiry action once the
//! counter has been still for the configured timeout. It never touches the
//! bus; its only authority is over process lifetime, via the callback.
//!
//! Safety: the thread stops when the `Watchdog` is dropped.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use balancer_traits::Clock;

use crate::config::WatchdogCfg;

/// Shared cycle counter.
#[derive(Debug, Clone, Default)]
pub struct Heartbeat(Arc<AtomicU64>);

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn beat(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Clock-driven stall detector; no threads, so it is easy to test.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last_count: u64,
    last_change: Instant,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration, count: u64, now: Instant) -> Self {
        Self {
            timeout,
            last_count: count,
            last_change: now,
        }
    }

    /// Record an observation; returns true once the counter has been still
    /// for at least the timeout.
    pub fn observe(&mut self, count: u64, now: Instant) -> bool {
        if count != self.last_count {
            self.last_count = count;
            self.last_change = now;
            return false;
        }
        self.stalled_for(now) >= self.timeout
    }

    pub fn stalled_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_change)
    }
}

pub struct Watchdog {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Watchdog {
    /// Start supervising `heartbeat`. `on_expire` runs at most once, on the
    /// watchdog thread, with the observed stall duration.
    pub fn spawn<C, F>(heartbeat: Heartbeat, cfg: WatchdogCfg, clock: C, on_expire: F) -> Self
    where
        C: Clock + Send + 'static,
        F: FnOnce(Duration) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let join_handle = std::thread::spawn(move || {
            let mut monitor = HeartbeatMonitor::new(cfg.timeout, heartbeat.count(), clock.now());
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("watchdog received shutdown signal");
                    break;
                }
                let now = clock.now();
                if monitor.observe(heartbeat.count(), now) {
                    let stalled = monitor.stalled_for(now);
                    tracing::error!(
                        stalled_ms = u64::try_from(stalled.as_millis()).unwrap_or(u64::MAX),
                        timeout_ms = u64::try_from(cfg.timeout.as_millis()).unwrap_or(u64::MAX),
                        "control loop stalled; watchdog expired"
                    );
                    on_expire(stalled);
                    break;
                }
                clock.sleep(cfg.poll);
            }
            tracing::trace!("watchdog thread exiting cleanly");
        });
        Self {
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// The watchdog thread has exited (expired or stopped).
    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_none_or(std::thread::JoinHandle::is_finished)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("watchdog thread joined successfully"),
                Err(e) => tracing::warn!(?e, "watchdog thread panicked during shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balancer_traits::ManualClock;

    #[test]
    fn monitor_expires_only_after_silence() {
        let clock = ManualClock::new();
        let hb = Heartbeat::new();
        let mut m = HeartbeatMonitor::new(Duration::from_secs(10), hb.count(), clock.now());

        clock.advance(Duration::from_secs(9));
        assert!(!m.observe(hb.count(), clock.now()));

        hb.beat();
        clock.advance(Duration::from_secs(5));
        assert!(!m.observe(hb.count(), clock.now()));

        clock.advance(Duration::from_secs(9));
        assert!(!m.observe(hb.count(), clock.now()));
        clock.advance(Duration::from_secs(1));
        assert!(m.observe(hb.count(), clock.now()));
    }
}
