//! Fuzz target for volume key unwrapping.
//!
//! Uses a fixed key-encryption key and fuzzes the wrapped blob. Unwrapping
//! must reject malformed input with an error, never a panic.

#![no_main]

use encfs_core::crypto::VolumeKey;
use encfs_core::crypto::key_wrap::{unwrap_key, wrap_key};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 4096 {
        return;
    }
    let kek_material: Vec<u8> = (0u8..48).collect();
    let kek = VolumeKey::from_material(&kek_material, 32).expect("fixed KEK material is valid");

    for key_len in [16, 24, 32] {
        let _ = unwrap_key(&kek, data, key_len);
    }

    // A well-formed key must survive wrapping
    if data.len() == 24 + 16 {
        let key = VolumeKey::from_material(data, 24).expect("length checked above");
        let wrapped = wrap_key(&kek, &key);
        let unwrapped = unwrap_key(&kek, &wrapped, 24).expect("freshly wrapped key must unwrap");
        assert_eq!(*unwrapped.material(), *key.material());
    }
});
