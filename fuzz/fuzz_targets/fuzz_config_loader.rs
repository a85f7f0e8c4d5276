#![no_main]
use libfuzzer_sys::fuzz_target;

// Any TOML either fails to parse or yields a config whose validation returns
// normally; neither path may panic.
fuzz_target!(|data: &str| {
    if let Ok(cfg) = ecu_config::load_toml(data) {
        let _ = cfg.validate();
    }
});
