#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parsing and validation may reject anything, but must never panic.
    let Ok(cfg) = toml::from_str::<balancer_config::Config>(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        // A validated relay table always yields a relay map.
        let map = balancer_core::RelayMap::try_from(&cfg);
        assert!(map.is_ok(), "validated config rejected by relay map: {map:?}");
        let _ = balancer_core::WatchdogCfg::from(&cfg);
    }
});
