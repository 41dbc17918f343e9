//! Relay ordering: break-before-make, settle delays, neutral on failure.

mod common;

use std::time::Duration;

use balancer_core::mocks::{BusEvent, RecordingBus, RecordingClock, Trace};
use balancer_core::{BalancerError, RelayCfg, RelayMap, RelaySequencer};
use common::{ADC, CONVERSION_REG, DC_DC_PIN, MUX, RELAY_ADDR, RELAY_REG};
use proptest::prelude::*;

const SETTLE: Duration = Duration::from_millis(100);

fn map(cells: usize) -> RelayMap {
    let mut entries = Vec::new();
    for high in 0..cells {
        for low in (0..cells).filter(|&l| l != high) {
            // bits 0-3 route the source cell, bits 4-7 the destination
            entries.push(((high, low), (1u8 << high) | (1u8 << (4 + low))));
        }
    }
    RelayMap::new(cells, entries).unwrap()
}

fn rig(cells: usize) -> (RelaySequencer<RecordingClock>, RecordingBus, Trace) {
    let trace = Trace::default();
    let bus = RecordingBus::with_trace(ADC, CONVERSION_REG, trace.clone());
    let seq = RelaySequencer::new(
        RelayCfg::default(),
        map(cells),
        RecordingClock::new(trace.clone()),
    );
    (seq, bus, trace)
}

fn relay_write(mask: u8) -> [BusEvent; 2] {
    [
        BusEvent::Select { mux: MUX, channel: 3 },
        BusEvent::Write {
            addr: RELAY_ADDR,
            reg: RELAY_REG,
            data: vec![mask],
        },
    ]
}

#[test]
fn connect_from_neutral_writes_settles_then_enables() {
    let (mut seq, mut bus, trace) = rig(3);
    seq.connect(&mut bus, 1, 2).unwrap();

    let mut expected = relay_write(0x42).to_vec();
    expected.push(BusEvent::Sleep(SETTLE));
    expected.push(BusEvent::Output {
        pin: DC_DC_PIN,
        high: true,
    });
    assert_eq!(trace.events(), expected);

    let st = seq.state();
    assert_eq!(st.pair, Some((1, 2)));
    assert!(st.settled && st.converter_enabled);
}

#[test]
fn reconnect_breaks_before_make() {
    let (mut seq, mut bus, trace) = rig(3);
    seq.connect(&mut bus, 0, 1).unwrap();
    trace.clear();
    seq.connect(&mut bus, 2, 0).unwrap();

    let mut expected = vec![
        BusEvent::Output {
            pin: DC_DC_PIN,
            high: false,
        },
        BusEvent::Sleep(SETTLE),
    ];
    expected.extend(relay_write(0x14));
    expected.push(BusEvent::Sleep(SETTLE));
    expected.push(BusEvent::Output {
        pin: DC_DC_PIN,
        high: true,
    });
    assert_eq!(trace.events(), expected);
}

#[test]
fn disconnect_disables_waits_then_opens() {
    let (mut seq, mut bus, trace) = rig(2);
    seq.connect(&mut bus, 0, 1).unwrap();
    trace.clear();
    seq.disconnect(&mut bus).unwrap();

    let mut expected = vec![
        BusEvent::Output {
            pin: DC_DC_PIN,
            high: false,
        },
        BusEvent::Sleep(SETTLE),
    ];
    expected.extend(relay_write(0));
    assert_eq!(trace.events(), expected);
    assert!(seq.state().is_neutral());
}

#[test]
fn failed_disable_leaves_relays_in_place() {
    let (mut seq, mut bus, trace) = rig(2);
    seq.connect(&mut bus, 0, 1).unwrap();
    let script = bus.script();
    script.fail_output(DC_DC_PIN, true);
    trace.clear();

    let err = seq.disconnect(&mut bus).unwrap_err();
    assert!(matches!(err, BalancerError::Hardware { op: "set_converter", .. }), "{err:?}");
    assert!(trace.writes(RELAY_ADDR, RELAY_REG).is_empty(), "{:?}", trace.events());
    assert_eq!(trace.outputs(DC_DC_PIN), vec![false; 3]);
    let st = seq.state();
    assert!(st.converter_enabled);
    assert_eq!(st.pair, Some((0, 1)));
    assert!(st.settled);

    script.fail_output(DC_DC_PIN, false);
    trace.clear();
    seq.disconnect(&mut bus).unwrap();
    assert_eq!(trace.writes(RELAY_ADDR, RELAY_REG), vec![vec![0]]);
    assert!(seq.state().is_neutral());
}

#[test]
fn relay_release_failure_is_reported_with_converter_off() {
    let (mut seq, mut bus, _trace) = rig(2);
    seq.connect(&mut bus, 0, 1).unwrap();
    bus.script().fail_writes_to(RELAY_ADDR, true);

    let err = seq.disconnect(&mut bus).unwrap_err();
    assert!(matches!(err, BalancerError::Hardware { addr: RELAY_ADDR, .. }), "{err:?}");
    assert!(!seq.is_energized());
    assert_eq!(seq.state().pair, None);
}

#[test]
fn failed_relay_write_never_enables_converter() {
    let (mut seq, mut bus, trace) = rig(3);
    bus.script().fail_writes_to(RELAY_ADDR, true);

    let err = seq.connect(&mut bus, 0, 2).unwrap_err();
    assert!(matches!(err, BalancerError::Hardware { addr: RELAY_ADDR, .. }));
    assert!(!trace.outputs(DC_DC_PIN).contains(&true));
    assert!(!seq.is_energized());
}

#[test]
fn unmapped_pair_is_a_config_error_and_leaves_neutral() {
    let (mut seq, mut bus, trace) = rig(3);
    seq.connect(&mut bus, 0, 1).unwrap();

    let err = seq.connect(&mut bus, 1, 1).unwrap_err();
    assert!(matches!(err, BalancerError::Config(_)));
    assert!(seq.state().is_neutral());
    assert_eq!(trace.outputs(DC_DC_PIN).last(), Some(&false));
}

#[test]
fn force_neutral_drives_outputs_even_when_believed_idle() {
    let (mut seq, mut bus, trace) = rig(2);
    seq.force_neutral(&mut bus).unwrap();
    assert_eq!(trace.outputs(DC_DC_PIN), vec![false]);
    assert_eq!(trace.writes(RELAY_ADDR, RELAY_REG), vec![vec![0]]);
}

#[derive(Debug, Clone)]
enum Op {
    Connect(usize, usize),
    Disconnect,
    ForceNeutral,
    FailOutput(bool),
    FailRelayWrite(bool),
}

fn op(cells: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..cells, 0..cells).prop_map(|(h, l)| Op::Connect(h, l)),
        2 => Just(Op::Disconnect),
        1 => Just(Op::ForceNeutral),
        1 => any::<bool>().prop_map(Op::FailOutput),
        1 => any::<bool>().prop_map(Op::FailRelayWrite),
    ]
}

fn is_relay_write(ev: &BusEvent) -> bool {
    matches!(ev, BusEvent::Write { addr, reg, .. } if *addr == RELAY_ADDR && *reg == RELAY_REG)
}

/// Walk a trace and check the converter/relay ordering rules. A failed
/// enable counts as the converter being on, a failed disable leaves the
/// previous level, and a failed relay write leaves no usable mapping.
fn check_trace(events: &[BusEvent]) -> Result<(), String> {
    let mut enabled = false;
    // Relay write seen and then held for a settle delay
    let mut written = false;
    let mut write_settled = false;
    // Since the last enable: disable seen, then a settle delay
    let mut broken = true;
    let mut disable_pending_settle = false;
    let mut prev: Option<&BusEvent> = None;
    // Converter bookkeeping from just before the last enable-line write
    let mut before_output = (enabled, broken, disable_pending_settle);

    for (i, ev) in events.iter().enumerate() {
        match ev {
            BusEvent::Write { data, .. } if is_relay_write(ev) => {
                if !broken {
                    return Err(format!("event {i}: relay write without break: {events:?}"));
                }
                written = data != &vec![0];
                write_settled = false;
            }
            BusEvent::Sleep(d) if *d >= SETTLE => {
                if written {
                    write_settled = true;
                }
                if disable_pending_settle {
                    broken = true;
                    disable_pending_settle = false;
                }
            }
            BusEvent::Output { pin, high: true } if *pin == DC_DC_PIN => {
                before_output = (enabled, broken, disable_pending_settle);
                if !(written && write_settled) {
                    return Err(format!("event {i}: enable before settled write: {events:?}"));
                }
                if enabled {
                    return Err(format!("event {i}: double enable: {events:?}"));
                }
                enabled = true;
                broken = false;
            }
            BusEvent::Output { pin, high: false } if *pin == DC_DC_PIN => {
                before_output = (enabled, broken, disable_pending_settle);
                enabled = false;
                disable_pending_settle = true;
            }
            BusEvent::Fault => match prev {
                Some(BusEvent::Output { pin, high: true }) if *pin == DC_DC_PIN => {
                    enabled = true;
                    broken = false;
                    disable_pending_settle = false;
                }
                Some(BusEvent::Output { pin, high: false }) if *pin == DC_DC_PIN => {
                    (enabled, broken, disable_pending_settle) = before_output;
                }
                Some(p) if is_relay_write(p) => written = false,
                _ => {}
            },
            _ => {}
        }
        prev = Some(ev);
    }
    Ok(())
}

#[test]
fn trace_check_rejects_release_after_failed_disable() {
    let events = vec![
        BusEvent::Write {
            addr: RELAY_ADDR,
            reg: RELAY_REG,
            data: vec![0x21],
        },
        BusEvent::Sleep(SETTLE),
        BusEvent::Output {
            pin: DC_DC_PIN,
            high: true,
        },
        BusEvent::Output {
            pin: DC_DC_PIN,
            high: false,
        },
        BusEvent::Fault,
        BusEvent::Sleep(SETTLE),
        BusEvent::Write {
            addr: RELAY_ADDR,
            reg: RELAY_REG,
            data: vec![0],
        },
    ];
    assert!(check_trace(&events).is_err());
}

proptest! {
    #[test]
    fn random_sequences_respect_break_before_make(
        cells in 2usize..=4,
        seed_ops in proptest::collection::vec(op(4), 1..40),
    ) {
        let (mut seq, mut bus, trace) = rig(cells);
        let script = bus.script();
        for o in seed_ops {
            let _ = match o {
                Op::Connect(h, l) => seq.connect(&mut bus, h % cells, l % cells),
                Op::Disconnect => seq.disconnect(&mut bus),
                Op::ForceNeutral => seq.force_neutral(&mut bus),
                Op::FailOutput(on) => {
                    script.fail_output(DC_DC_PIN, on);
                    Ok(())
                }
                Op::FailRelayWrite(on) => {
                    script.fail_writes_to(RELAY_ADDR, on);
                    Ok(())
                }
            };
            let st = seq.state();
            if st.converter_enabled {
                prop_assert!(st.settled);
                prop_assert!(st.pair.is_some());
            }
        }
        let events = trace.events();
        prop_assert!(check_trace(&events).is_ok(), "{:?}", check_trace(&events));
    }
}
