#![no_main]
use balancer_core::mocks::{BusEvent, RecordingBus, RecordingClock, Trace};
use balancer_core::{RelayCfg, RelayMap, RelaySequencer};
use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;

const CELLS: usize = 4;
const DC_DC_PIN: u8 = 17;

#[derive(Arbitrary, Debug)]
enum Op {
    Connect(u8, u8),
    Disconnect,
    ForceNeutral,
    FailRelayWrites(bool),
    FailConverterPin(bool),
}

fuzz_target!(|ops: Vec<Op>| {
    let trace = Trace::default();
    let clock = RecordingClock::new(trace.clone());
    let mut bus = RecordingBus::with_trace(0x48, 0x00, trace.clone());
    let script = bus.script();
    let cfg = RelayCfg::default();
    let pairs = (0..CELLS).flat_map(|h| (0..CELLS).filter(move |&l| l != h).map(move |l| (h, l)));
    let Ok(map) = RelayMap::new(CELLS, pairs.zip(1u8..)) else {
        return;
    };
    let mut seq = RelaySequencer::new(cfg, map, clock);

    for op in ops.into_iter().take(256) {
        let _ = match op {
            Op::Connect(h, l) => seq.connect(&mut bus, usize::from(h) % CELLS, usize::from(l) % CELLS),
            Op::Disconnect => seq.disconnect(&mut bus),
            Op::ForceNeutral => seq.force_neutral(&mut bus),
            Op::FailRelayWrites(on) => {
                script.fail_writes_to(cfg.relay_addr, on);
                Ok(())
            }
            Op::FailConverterPin(on) => {
                script.fail_output(DC_DC_PIN, on);
                Ok(())
            }
        };
        let st = seq.state();
        if st.converter_enabled {
            assert!(st.settled && st.pair.is_some(), "converter on without a settled pair: {st:?}");
        }
    }

    // No relay write, all-off included, happens while the converter may be on.
    // A failed enable counts as on; a failed disable keeps the previous level.
    let mut enabled = false;
    let mut before = false;
    let mut last_output: Option<bool> = None;
    for ev in trace.events() {
        match ev {
            BusEvent::Output { pin, high } if pin == DC_DC_PIN => {
                before = enabled;
                enabled = high;
                last_output = Some(high);
                continue;
            }
            BusEvent::Fault => match last_output {
                Some(true) => enabled = true,
                Some(false) => enabled = before,
                None => {}
            },
            BusEvent::Write { addr, .. } if addr == cfg.relay_addr => {
                assert!(!enabled, "relay mask changed while converter on");
            }
            _ => {}
        }
        last_output = None;
    }
});
