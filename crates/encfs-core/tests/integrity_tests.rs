//! Tamper detection and corrupt-entry handling.

mod common;

use std::io::{Read, Write};

use common::{TEST_KDF_ITERATIONS, memory_volume, sized_content, test_options};
use encfs_core::fs::NameError;
use encfs_core::provider::{FileProvider, MemoryFileProvider};
use encfs_core::vault::{VolumeError, VolumeOptions};

fn raw_bytes(provider: &MemoryFileProvider, path: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    provider.open_input(path).unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}

fn overwrite_raw(provider: &MemoryFileProvider, path: &str, bytes: &[u8]) {
    let mut out = provider.open_output(path).unwrap();
    out.write_all(bytes).unwrap();
    out.flush().unwrap();
}

fn mac_options() -> VolumeOptions {
    VolumeOptions {
        block_mac_bytes: 8,
        kdf_iterations: TEST_KDF_ITERATIONS,
        ..VolumeOptions::standard()
    }
}

#[test]
fn test_block_mac_detects_bit_flip() {
    let (provider, volume) = memory_volume(mac_options());
    volume.write_file("/f", &sized_content(3000)).unwrap();
    let (encoded, _) = volume.encode_path("/f").unwrap();

    let mut raw = raw_bytes(&provider, &encoded);
    raw[8 + 1024 + 40] ^= 0x01;
    overwrite_raw(&provider, &encoded, &raw);

    let err = volume.read_file("/f").unwrap_err();
    assert!(err.is_corruption(), "{err}");

    // Blocks before the damaged one are still readable
    let mut reader = volume.open_read("/f").unwrap();
    assert_eq!(reader.read_range(0, 100).unwrap(), &sized_content(3000)[..100]);
    assert!(reader.read_range(1016, 10).is_err());
}

#[test]
fn test_block_mac_detects_tampered_final_block() {
    let (provider, volume) = memory_volume(mac_options());
    volume.write_file("/f", b"a short file").unwrap();
    let (encoded, _) = volume.encode_path("/f").unwrap();

    let mut raw = raw_bytes(&provider, &encoded);
    let last = raw.len() - 1;
    raw[last] ^= 0x80;
    overwrite_raw(&provider, &encoded, &raw);

    assert!(volume.read_file("/f").unwrap_err().is_corruption());
}

#[test]
fn test_truncated_header_is_corruption() {
    let (provider, volume) = memory_volume(test_options());
    volume.write_file("/f", b"content").unwrap();
    let (encoded, _) = volume.encode_path("/f").unwrap();

    let raw = raw_bytes(&provider, &encoded);
    overwrite_raw(&provider, &encoded, &raw[..5]);

    let err = volume.open_read("/f").unwrap_err();
    assert!(matches!(err, VolumeError::CorruptData { .. }), "{err}");
}

#[test]
fn test_holes_read_as_zeros() {
    let (provider, volume) = memory_volume(test_options());
    let content = sized_content(3000);
    volume.write_file("/sparse", &content).unwrap();
    let (encoded, _) = volume.encode_path("/sparse").unwrap();

    // Zero the second full raw block, as a sparse write would leave it
    let mut raw = raw_bytes(&provider, &encoded);
    raw[8 + 1024..8 + 2048].fill(0);
    overwrite_raw(&provider, &encoded, &raw);

    let read = volume.read_file("/sparse").unwrap();
    assert_eq!(&read[..1024], &content[..1024]);
    assert!(read[1024..2048].iter().all(|&b| b == 0));
    assert_eq!(&read[2048..], &content[2048..]);
}

#[test]
fn test_corrupt_name_fails_lazily() {
    let (provider, volume) = memory_volume(test_options());
    volume.write_file("/good.txt", b"ok").unwrap();
    provider.create_file("/AAAAAAAAAAAAAAAAAAAAAAAA").unwrap();

    let entries = volume.list_children("/").unwrap();
    assert_eq!(entries.len(), 2);

    let mut good = 0;
    let mut bad = 0;
    for entry in &entries {
        match entry.name() {
            Ok(name) => {
                assert_eq!(name, "good.txt");
                good += 1;
            }
            Err(e) => {
                assert!(e.is_corruption());
                assert!(matches!(e, NameError::ChecksumMismatch { .. } | NameError::InvalidPadding { .. }));
                // The failure is cached, not recomputed differently
                assert_eq!(entry.name().unwrap_err().to_string(), e.to_string());
                bad += 1;
            }
        }
    }
    assert_eq!((good, bad), (1, 1));
}

#[test]
fn test_invalid_alphabet_name() {
    let (provider, volume) = memory_volume(test_options());
    provider.create_file("/not*valid").unwrap();
    let entries = volume.list_children("/").unwrap();
    let err = entries[0].name().unwrap_err();
    assert!(matches!(err, NameError::InvalidEncoding { .. }));
    assert!(volume.decode_path("/not*valid").unwrap_err().is_corruption());
}

#[test]
fn test_walk_skips_undecodable_directory() {
    let (provider, volume) = memory_volume(test_options());
    volume.mkdir("/ok").unwrap();
    volume.write_file("/ok/f", b"1").unwrap();
    provider.mkdir("/AAAAAAAAAAAAAAAAAAAAAAAA").unwrap();
    provider.create_file("/AAAAAAAAAAAAAAAAAAAAAAAA/child").unwrap();

    let entries = volume.walk("/").unwrap();
    // ok, ok/f and the corrupt directory itself; its child is not visited
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.iter().filter(|e| e.name().is_err()).count(), 1);
    assert!(entries[2].name().is_err());
}

#[test]
fn test_delete_all_removes_corrupt_entries() {
    let (provider, volume) = memory_volume(test_options());
    volume.mkdir("/d").unwrap();
    let (encoded, _) = volume.encode_path("/d").unwrap();
    provider.create_file(&format!("{encoded}/garbage")).unwrap();

    assert!(volume.delete_all("/d").unwrap());
    assert!(!provider.exists(&encoded).unwrap());
}

#[test]
fn test_move_with_corrupt_descendant_changes_nothing() {
    let (provider, volume) = memory_volume(test_options());
    volume.mkdir("/d").unwrap();
    volume.write_file("/d/f", b"1").unwrap();
    let (encoded, _) = volume.encode_path("/d").unwrap();
    provider.create_file(&format!("{encoded}/garbage")).unwrap();

    let err = volume.move_entry("/d", "/e").unwrap_err();
    assert!(err.is_corruption());
    assert!(volume.exists("/d").unwrap());
    assert!(!volume.exists("/e").unwrap());
}

#[test]
fn test_corrupt_config_is_reported() {
    let (provider, _volume) = memory_volume(test_options());
    overwrite_raw(&provider, "/.encfs6.xml", b"<boost_serialization></boost_serialization>");
    let result = encfs_core::Volume::open(std::sync::Arc::new(provider), common::TEST_PASSWORD);
    assert!(matches!(result, Err(VolumeError::InvalidConfig { .. })));
}
