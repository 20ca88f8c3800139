//! Fuzz target for encoded name decoding.
//!
//! Arbitrary strings must decode to an error, never a panic. A name that
//! does decode must encode to a string that decodes to the same name.

#![no_main]

use std::sync::Arc;

use encfs_core::crypto::VolumeKey;
use encfs_core::fs::{DirectoryIv, NameAlgorithm, NameCodec};
use libfuzzer_sys::fuzz_target;

fn codec(algorithm: NameAlgorithm) -> NameCodec {
    let material: Vec<u8> = (0u8..40).collect();
    let key = Arc::new(VolumeKey::from_material(&material, 24).expect("fixed key material is valid"));
    NameCodec::new(key, algorithm, algorithm.current_interface().0, true)
}

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let Ok(encoded) = std::str::from_utf8(rest) else {
        return;
    };
    let algorithm = if selector & 1 == 0 {
        NameAlgorithm::Block
    } else {
        NameAlgorithm::Stream
    };
    let codec = codec(algorithm);
    let iv = DirectoryIv::Chained(u64::from(selector));

    if let Ok((plain, child)) = codec.decode(encoded, iv) {
        // Decoded bytes may still be an unusable plaintext name (e.g. "..")
        if let Ok((again, _)) = codec.encode(&plain, iv) {
            let (replain, rechild) = codec.decode(&again, iv).expect("fresh encoding must decode");
            assert_eq!(replain, plain);
            assert_eq!(rechild, child);
        }
    }
});
