//! Property tests for name and content round-trips.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::{TEST_KDF_ITERATIONS, memory_volume, test_options};
use encfs_core::crypto::VolumeKey;
use encfs_core::fs::{DirectoryIv, MAX_ENCODED_NAME_LEN, NameAlgorithm, NameCodec};
use encfs_core::vault::VolumeOptions;
use proptest::prelude::*;

fn codec(algorithm: NameAlgorithm, chained: bool) -> NameCodec {
    let key = Arc::new(VolumeKey::random(24).unwrap());
    let interface = algorithm.current_interface().0;
    NameCodec::new(key, algorithm, interface, chained)
}

fn segment() -> impl Strategy<Value = String> {
    "[^/\\x00]{1,40}".prop_filter("dot segments are reserved", |s| s != "." && s != "..")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_block_names_roundtrip(name in segment(), chain in any::<u64>()) {
        let codec = codec(NameAlgorithm::Block, true);
        let iv = DirectoryIv::Chained(chain);
        let (encoded, child) = codec.encode(&name, iv).unwrap();
        prop_assert!(encoded.len() <= MAX_ENCODED_NAME_LEN);
        prop_assert!(encoded.bytes().all(|b| b == b',' || b == b'-' || b.is_ascii_alphanumeric()));
        let (decoded, decoded_child) = codec.decode(&encoded, iv).unwrap();
        prop_assert_eq!(decoded, name);
        prop_assert_eq!(decoded_child, child);
    }

    #[test]
    fn prop_stream_names_roundtrip(name in segment()) {
        let codec = codec(NameAlgorithm::Stream, false);
        let (encoded, _) = codec.encode(&name, DirectoryIv::Unchained).unwrap();
        let (decoded, _) = codec.decode(&encoded, DirectoryIv::Unchained).unwrap();
        prop_assert_eq!(decoded, name);
    }

    #[test]
    fn prop_names_are_deterministic(name in segment()) {
        let codec = codec(NameAlgorithm::Block, true);
        let a = codec.encode(&name, codec.root_iv()).unwrap();
        let b = codec.encode(&name, codec.root_iv()).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_decode_never_panics(encoded in "[,\\-0-9A-Za-z]{0,80}") {
        let codec = codec(NameAlgorithm::Block, true);
        let _ = codec.decode(&encoded, codec.root_iv());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_content_roundtrip(
        data in proptest::collection::vec(any::<u8>(), 0..4000),
        chunk in 1usize..700,
        mac in prop_oneof![Just(0usize), Just(8usize)],
        unique_iv in any::<bool>(),
    ) {
        let options = VolumeOptions {
            block_size: 256,
            block_mac_bytes: mac,
            unique_iv,
            chained_name_iv: true,
            kdf_iterations: TEST_KDF_ITERATIONS,
            ..VolumeOptions::standard()
        };
        let (_provider, volume) = memory_volume(options);

        let mut writer = volume.open_write("/p").unwrap();
        for piece in data.chunks(chunk) {
            writer.write_all(piece).unwrap();
        }
        prop_assert_eq!(writer.finish().unwrap(), data.len() as u64);

        let entry = volume.file_info("/p").unwrap();
        prop_assert_eq!(entry.size(), data.len() as u64);
        prop_assert_eq!(volume.read_file("/p").unwrap(), data);
    }

    #[test]
    fn prop_read_range_matches_slice(
        len in 0usize..3000,
        offset in 0u64..3500,
        want in 0usize..1200,
    ) {
        let (_provider, volume) = memory_volume(test_options());
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        volume.write_file("/r", &data).unwrap();

        let mut reader = volume.open_read("/r").unwrap();
        let got = reader.read_range(offset, want).unwrap();
        let start = usize::try_from(offset).unwrap().min(len);
        let end = (start + want).min(len);
        prop_assert_eq!(got, &data[start..end]);
    }
}
