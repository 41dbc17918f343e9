//! Test and helper mocks for balancer_core.
//!
//! `RecordingBus` and `RecordingClock` share one `Trace`, so a test sees bus
//! operations and settle sleeps interleaved in the order they happened.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use balancer_traits::{BoxError, Clock, HardwareChannel, ManualClock, Notifier};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Select { mux: u8, channel: u8 },
    Write { addr: u8, reg: u8, data: Vec<u8> },
    Read { addr: u8, reg: u8 },
    Output { pin: u8, high: bool },
    Sleep(Duration),
    /// The bus call recorded just before this one returned an error.
    Fault,
}

#[derive(Debug, Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<BusEvent>>>);

impl Trace {
    pub fn push(&self, ev: BusEvent) {
        lock(&self.0).push(ev);
    }

    pub fn events(&self) -> Vec<BusEvent> {
        lock(&self.0).clone()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }

    /// Levels written to `pin`, in order.
    pub fn outputs(&self, pin: u8) -> Vec<bool> {
        lock(&self.0)
            .iter()
            .filter_map(|e| match e {
                BusEvent::Output { pin: p, high } if *p == pin => Some(*high),
                _ => None,
            })
            .collect()
    }

    /// Payloads written to register `reg` of `addr`, in order.
    pub fn writes(&self, addr: u8, reg: u8) -> Vec<Vec<u8>> {
        lock(&self.0)
            .iter()
            .filter_map(|e| match e {
                BusEvent::Write { addr: a, reg: r, data } if *a == addr && *r == reg => {
                    Some(data.clone())
                }
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    steady: HashMap<u8, i16>,
    queued: HashMap<u8, VecDeque<i16>>,
    /// Remaining failing conversions per channel; `None` fails forever.
    failing_reads: HashMap<u8, Option<u32>>,
    failing_writes: HashSet<u8>,
    failing_pins: HashSet<u8>,
}

/// Programmable behavior of a `RecordingBus`, shared with the test.
#[derive(Debug, Clone, Default)]
pub struct BusScript(Arc<Mutex<ScriptState>>);

impl BusScript {
    /// Conversion result for `channel` once any queued values are used up.
    pub fn set_counts(&self, channel: u8, counts: i16) {
        lock(&self.0).steady.insert(channel, counts);
    }

    /// Values returned by the next conversions on `channel`, in order.
    pub fn push_counts(&self, channel: u8, seq: impl IntoIterator<Item = i16>) {
        lock(&self.0)
            .queued
            .entry(channel)
            .or_default()
            .extend(seq);
    }

    /// Fail the next `n` conversions on `channel`, or all of them with `None`.
    pub fn fail_reads(&self, channel: u8, n: Option<u32>) {
        lock(&self.0).failing_reads.insert(channel, n);
    }

    pub fn heal_reads(&self, channel: u8) {
        lock(&self.0).failing_reads.remove(&channel);
    }

    pub fn fail_writes_to(&self, addr: u8, failing: bool) {
        let mut st = lock(&self.0);
        if failing {
            st.failing_writes.insert(addr);
        } else {
            st.failing_writes.remove(&addr);
        }
    }

    pub fn fail_output(&self, pin: u8, failing: bool) {
        let mut st = lock(&self.0);
        if failing {
            st.failing_pins.insert(pin);
        } else {
            st.failing_pins.remove(&pin);
        }
    }
}

/// Bus double that records every call and answers from a `BusScript`.
pub struct RecordingBus {
    adc_addr: u8,
    conversion_reg: u8,
    selected: Option<u8>,
    trace: Trace,
    script: BusScript,
}

impl RecordingBus {
    pub fn new(adc_addr: u8, conversion_reg: u8) -> Self {
        Self::with_trace(adc_addr, conversion_reg, Trace::default())
    }

    pub fn with_trace(adc_addr: u8, conversion_reg: u8, trace: Trace) -> Self {
        Self {
            adc_addr,
            conversion_reg,
            selected: None,
            trace,
            script: BusScript::default(),
        }
    }

    pub fn trace(&self) -> Trace {
        self.trace.clone()
    }

    pub fn script(&self) -> BusScript {
        self.script.clone()
    }
}

impl HardwareChannel for RecordingBus {
    fn select_channel(&mut self, mux: u8, channel: u8) -> Result<(), BoxError> {
        self.trace.push(BusEvent::Select { mux, channel });
        self.selected = Some(channel);
        Ok(())
    }

    fn read_register(&mut self, addr: u8, reg: u8) -> Result<[u8; 2], BoxError> {
        self.trace.push(BusEvent::Read { addr, reg });
        if addr != self.adc_addr || reg != self.conversion_reg {
            return Ok([0, 0]);
        }
        let Some(ch) = self.selected else {
            return Err(Box::new(std::io::Error::other("no channel selected")));
        };
        let mut st = lock(&self.script.0);
        let failing = match st.failing_reads.get_mut(&ch) {
            Some(None) => true,
            Some(Some(n)) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        };
        if failing {
            self.trace.push(BusEvent::Fault);
            return Err(Box::new(std::io::Error::other("read timeout")));
        }
        let queued = st.queued.get_mut(&ch).and_then(VecDeque::pop_front);
        let counts = queued.or_else(|| st.steady.get(&ch).copied()).unwrap_or(0);
        Ok(counts.to_be_bytes())
    }

    fn write_register(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<(), BoxError> {
        self.trace.push(BusEvent::Write {
            addr,
            reg,
            data: data.to_vec(),
        });
        if lock(&self.script.0).failing_writes.contains(&addr) {
            self.trace.push(BusEvent::Fault);
            return Err(Box::new(std::io::Error::other("write nack")));
        }
        Ok(())
    }

    fn set_digital_output(&mut self, pin: u8, high: bool) -> Result<(), BoxError> {
        self.trace.push(BusEvent::Output { pin, high });
        if lock(&self.script.0).failing_pins.contains(&pin) {
            self.trace.push(BusEvent::Fault);
            return Err(Box::new(std::io::Error::other("gpio busy")));
        }
        Ok(())
    }
}

/// `ManualClock` that also logs each sleep into a `Trace`.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    clock: ManualClock,
    trace: Trace,
}

impl RecordingClock {
    pub fn new(trace: Trace) -> Self {
        Self {
            clock: ManualClock::new(),
            trace,
        }
    }

    pub fn advance(&self, d: Duration) {
        self.clock.advance(d);
    }
}

impl Clock for RecordingClock {
    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn sleep(&self, d: Duration) {
        self.trace.push(BusEvent::Sleep(d));
        self.clock.advance(d);
    }
}

/// Notifier that stores alerts; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }
}

impl Notifier for RecordingNotifier {
    fn send_alert(&mut self, subject: &str, body: &str) -> Result<(), BoxError> {
        lock(&self.sent).push((subject.to_string(), body.to_string()));
        if *lock(&self.failing) {
            return Err(Box::new(std::io::Error::other("smtp unavailable")));
        }
        Ok(())
    }
}
