//! Fuzz target for `.encfs6.xml` parsing.
//!
//! Parsing must never panic, and any config that loads must survive a
//! serialize/load round trip unchanged.

#![no_main]

use encfs_core::vault::VolumeConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 64 * 1024 {
        return;
    }
    if let Ok(config) = VolumeConfig::load(data) {
        let reloaded = VolumeConfig::load(config.to_xml().as_bytes()).expect("serialized config must load");
        assert_eq!(reloaded, config);
    }
});
