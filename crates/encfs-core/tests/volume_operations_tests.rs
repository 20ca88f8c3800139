//! Integration tests for volume tree and content operations.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::{TEST_PASSWORD, local_volume, memory_volume, sized_content, test_options};
use encfs_core::fs::NameAlgorithm;
use encfs_core::provider::{FileProvider, LocalFileProvider};
use encfs_core::vault::{Volume, VolumeError, VolumeOptions};

fn sorted_names(volume: &Volume, dir: &str) -> Vec<String> {
    let mut names: Vec<String> = volume
        .list_children(dir)
        .unwrap()
        .iter()
        .map(|e| e.name().unwrap().to_owned())
        .collect();
    names.sort();
    names
}

// ==================== write_file() / read_file() ====================

#[test]
fn test_write_read_sizes_around_block_boundaries() {
    let (_provider, volume) = memory_volume(test_options());
    for size in [0, 1, 15, 16, 1023, 1024, 1025, 2048, 5000] {
        let path = format!("/file-{size}.bin");
        let content = sized_content(size);
        assert_eq!(volume.write_file(&path, &content).unwrap(), size as u64);
        assert_eq!(volume.read_file(&path).unwrap(), content, "size {size}");
        assert_eq!(volume.file_info(&path).unwrap().size(), size as u64);
    }
}

#[test]
fn test_empty_file_has_no_header() {
    let (provider, volume) = memory_volume(test_options());
    volume.write_file("/empty", b"").unwrap();
    let (encoded, _) = volume.encode_path("/empty").unwrap();
    assert_eq!(provider.file_info(&encoded).unwrap().size, 0);
    assert!(volume.read_file("/empty").unwrap().is_empty());
}

#[test]
fn test_overwrite_truncates() {
    let (_provider, volume) = memory_volume(test_options());
    volume.write_file("/f", &sized_content(3000)).unwrap();
    volume.write_file("/f", b"short").unwrap();
    assert_eq!(volume.read_file("/f").unwrap(), b"short");
}

#[test]
fn test_streaming_writer_through_volume() {
    let (_provider, volume) = memory_volume(test_options());
    let mut writer = volume.open_write("/streamed").unwrap();
    for chunk in sized_content(4000).chunks(333) {
        writer.write_all(chunk).unwrap();
    }
    assert_eq!(writer.finish().unwrap(), 4000);
    assert_eq!(volume.read_file("/streamed").unwrap(), sized_content(4000));
}

#[test]
fn test_read_range_and_seek() {
    let (_provider, volume) = memory_volume(test_options());
    let content = sized_content(5000);
    volume.write_file("/data", &content).unwrap();

    let mut reader = volume.open_read("/data").unwrap();
    assert_eq!(reader.plaintext_size(), 5000);
    assert_eq!(reader.read_range(1000, 100).unwrap(), &content[1000..1100]);
    assert_eq!(reader.read_range(4990, 100).unwrap(), &content[4990..]);
    assert!(reader.read_range(6000, 10).unwrap().is_empty());

    reader.seek_to(2048).unwrap();
    let mut buf = vec![0u8; 10];
    let n = reader.read_block_chunk(&mut buf).unwrap();
    assert_eq!(&buf[..n], &content[2048..2048 + n]);
    assert!(reader.seek_to(100).is_err());
}

#[test]
fn test_local_provider_volume_reopens() {
    let (temp, volume) = local_volume(test_options());
    volume.mkdirs("/a/b").unwrap();
    volume.write_file("/a/b/c.txt", b"persisted").unwrap();
    drop(volume);

    let reopened = Volume::open(Arc::new(LocalFileProvider::new(temp.path())), TEST_PASSWORD).unwrap();
    assert_eq!(reopened.read_file("/a/b/c.txt").unwrap(), b"persisted");
    // Nothing in the backend carries a plaintext name
    for entry in walkdir::WalkDir::new(temp.path()).min_depth(1) {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        assert!(!["a", "b", "c.txt"].contains(&name.as_str()));
    }
}

// ==================== Names ====================

#[test]
fn test_chained_names_depend_on_parent() {
    let (_provider, volume) = memory_volume(test_options());
    volume.mkdir("/x").unwrap();
    volume.mkdir("/y").unwrap();
    let (in_x, _) = volume.encode_path("/x/same").unwrap();
    let (in_y, _) = volume.encode_path("/y/same").unwrap();
    assert_ne!(in_x.rsplit('/').next(), in_y.rsplit('/').next());
}

#[test]
fn test_unchained_names_independent_of_parent() {
    let options = VolumeOptions {
        chained_name_iv: false,
        ..test_options()
    };
    let (_provider, volume) = memory_volume(options);
    let (in_x, _) = volume.encode_path("/x/same").unwrap();
    let (in_y, _) = volume.encode_path("/y/same").unwrap();
    assert_eq!(in_x.rsplit('/').next(), in_y.rsplit('/').next());
}

#[test]
fn test_stream_name_volume_roundtrip() {
    let options = VolumeOptions {
        name_algorithm: NameAlgorithm::Stream,
        ..test_options()
    };
    let (_provider, volume) = memory_volume(options);
    volume.mkdir("/dir").unwrap();
    volume.write_file("/dir/file with spaces.txt", b"ok").unwrap();
    assert_eq!(sorted_names(&volume, "/dir"), vec!["file with spaces.txt"]);
}

#[test]
fn test_name_too_long_fails_before_backend() {
    let (provider, volume) = memory_volume(test_options());
    let long = "n".repeat(250);
    let err = volume.write_file(format!("/{long}"), b"x").unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");
    assert_eq!(provider.list("/").unwrap().len(), 1);
}

#[test]
fn test_unicode_names() {
    let (_provider, volume) = memory_volume(test_options());
    for name in ["résumé.txt", "日本語", "emoji-🚀", ".hidden"] {
        volume.write_file(format!("/{name}"), name.as_bytes()).unwrap();
    }
    assert_eq!(sorted_names(&volume, "/").len(), 4);
    assert_eq!(volume.read_file("/日本語").unwrap(), "日本語".as_bytes());
}

// ==================== Directories ====================

#[test]
fn test_mkdir_semantics() {
    let (_provider, volume) = memory_volume(test_options());
    assert!(volume.mkdir("/d").unwrap());
    assert!(!volume.mkdir("/d").unwrap());
    assert!(matches!(volume.mkdir("/missing/d"), Err(VolumeError::NotFound { .. })));
    assert!(volume.mkdirs("/p/q/r").unwrap());
    assert!(volume.is_directory("/p/q").unwrap());
}

#[test]
fn test_delete_semantics() {
    let (_provider, volume) = memory_volume(test_options());
    volume.mkdir("/d").unwrap();
    volume.write_file("/d/f", b"1").unwrap();
    assert!(!volume.delete("/d").unwrap());
    assert!(volume.delete("/d/f").unwrap());
    assert!(volume.delete("/d").unwrap());
    assert!(!volume.delete("/d").unwrap());
    assert!(volume.delete("/").is_err());
}

#[test]
fn test_walk_is_preorder() {
    let (_provider, volume) = memory_volume(test_options());
    volume.mkdir("/Dir1").unwrap();
    volume.write_file("/Dir1/file2.txt", b"2").unwrap();
    volume.write_file("/file1.txt", b"1").unwrap();
    volume.mkdir("/Dir0").unwrap();
    volume.write_file("/Dir0/a", b"a").unwrap();

    let paths: Vec<String> = volume.walk("/").unwrap().iter().map(|e| e.path().unwrap()).collect();
    assert_eq!(paths, vec!["/Dir0", "/Dir0/a", "/Dir1", "/Dir1/file2.txt", "/file1.txt"]);

    let nested: Vec<String> = volume.walk("/Dir1").unwrap().iter().map(|e| e.path().unwrap()).collect();
    assert_eq!(nested, vec!["/Dir1/file2.txt"]);
}

// ==================== move_entry() / copy() ====================

fn populate(volume: &Volume) {
    volume.mkdirs("/src/inner").unwrap();
    volume.write_file("/src/a.txt", b"alpha").unwrap();
    volume.write_file("/src/inner/b.txt", &sized_content(3000)).unwrap();
    volume.mkdir("/dst").unwrap();
}

fn assert_moved_tree(volume: &Volume, root: &str) {
    assert_eq!(sorted_names(volume, root), vec!["a.txt", "inner"]);
    assert_eq!(volume.read_file(format!("{root}/a.txt")).unwrap(), b"alpha");
    assert_eq!(volume.read_file(format!("{root}/inner/b.txt")).unwrap(), sized_content(3000));
}

#[test]
fn test_move_directory_chained() {
    let (_provider, volume) = memory_volume(test_options());
    populate(&volume);
    assert!(volume.move_entry("/src", "/dst/moved").unwrap());
    assert!(!volume.exists("/src").unwrap());
    assert_moved_tree(&volume, "/dst/moved");
}

#[test]
fn test_move_directory_unchained() {
    let options = VolumeOptions {
        chained_name_iv: false,
        ..test_options()
    };
    let (_provider, volume) = memory_volume(options);
    populate(&volume);
    assert!(volume.move_entry("/src", "/dst/moved").unwrap());
    assert_moved_tree(&volume, "/dst/moved");
}

#[test]
fn test_move_with_external_iv_chaining() {
    let options = VolumeOptions {
        kdf_iterations: common::TEST_KDF_ITERATIONS,
        ..VolumeOptions::paranoia()
    };
    let (_provider, volume) = memory_volume(options);
    populate(&volume);

    assert!(volume.move_entry("/src/a.txt", "/dst/renamed.txt").unwrap());
    assert_eq!(volume.read_file("/dst/renamed.txt").unwrap(), b"alpha");

    assert!(volume.move_entry("/src", "/dst/moved").unwrap());
    assert_eq!(sorted_names(&volume, "/dst/moved"), vec!["inner"]);
    assert_eq!(volume.read_file("/dst/moved/inner/b.txt").unwrap(), sized_content(3000));
}

#[test]
fn test_external_iv_header_bound_to_path() {
    let options = VolumeOptions {
        kdf_iterations: common::TEST_KDF_ITERATIONS,
        ..VolumeOptions::paranoia()
    };
    let (provider, volume) = memory_volume(options);
    volume.write_file("/one", b"content").unwrap();
    let (one, _) = volume.encode_path("/one").unwrap();
    let (two, _) = volume.encode_path("/two").unwrap();

    // A raw backend rename leaves the header keyed to the old path
    assert!(provider.move_entry(&one, &two).unwrap());
    let err = volume.read_file("/two").unwrap_err();
    assert!(err.is_corruption(), "{err}");
}

#[test]
fn test_move_with_corrupt_header_reports_corruption() {
    let options = VolumeOptions {
        kdf_iterations: common::TEST_KDF_ITERATIONS,
        ..VolumeOptions::paranoia()
    };
    let (provider, volume) = memory_volume(options);
    volume.write_file("/victim", b"content").unwrap();
    let (encoded, _) = volume.encode_path("/victim").unwrap();

    // Keep only a truncated header
    let mut raw = provider.open_output(&encoded).unwrap();
    raw.write_all(&[0x5a; 3]).unwrap();
    raw.flush().unwrap();
    drop(raw);
    let err = volume.move_entry("/victim", "/moved").unwrap_err();
    assert!(err.is_corruption(), "{err}");
    assert!(volume.exists("/victim").unwrap());
    assert!(!volume.exists("/moved").unwrap());

    let err = volume.copy("/victim", "/copied").unwrap_err();
    assert!(err.is_corruption(), "{err}");
}

#[test]
fn test_copy_directory() {
    let (_provider, volume) = memory_volume(test_options());
    populate(&volume);
    assert!(volume.copy("/src", "/dst/copy").unwrap());
    assert_moved_tree(&volume, "/src");
    assert_moved_tree(&volume, "/dst/copy");
}

#[test]
fn test_copy_with_external_iv_chaining() {
    let options = VolumeOptions {
        kdf_iterations: common::TEST_KDF_ITERATIONS,
        ..VolumeOptions::paranoia()
    };
    let (_provider, volume) = memory_volume(options);
    populate(&volume);
    assert!(volume.copy("/src", "/dst/copy").unwrap());
    assert_moved_tree(&volume, "/src");
    assert_moved_tree(&volume, "/dst/copy");
}

#[test]
fn test_copy_empty_file_with_external_iv() {
    let options = VolumeOptions {
        kdf_iterations: common::TEST_KDF_ITERATIONS,
        ..VolumeOptions::paranoia()
    };
    let (_provider, volume) = memory_volume(options);
    volume.write_file("/empty", b"").unwrap();
    assert!(volume.copy("/empty", "/copy").unwrap());
    assert!(volume.read_file("/copy").unwrap().is_empty());
}

#[test]
fn test_transfer_refusals() {
    let (_provider, volume) = memory_volume(test_options());
    populate(&volume);
    assert!(!volume.move_entry("/nope", "/dst/x").unwrap());
    assert!(!volume.move_entry("/src", "/dst").unwrap());
    assert!(!volume.copy("/src/a.txt", "/missing/a.txt").unwrap());
    assert!(volume.move_entry("/src", "/src/inner/loop").is_err());
    assert!(volume.move_entry("/", "/dst/root").is_err());
}

// ==================== Password change ====================

#[test]
fn test_change_password_keeps_data() {
    let (temp, volume) = local_volume(test_options());
    volume.write_file("/secret", b"still here").unwrap();
    volume.change_password(TEST_PASSWORD, "new password").unwrap();

    let provider = Arc::new(LocalFileProvider::new(temp.path()));
    assert!(matches!(
        Volume::open(provider.clone(), TEST_PASSWORD),
        Err(VolumeError::InvalidPassword)
    ));
    let reopened = Volume::open(provider, "new password").unwrap();
    assert_eq!(reopened.read_file("/secret").unwrap(), b"still here");
}

#[test]
fn test_change_password_wrong_old_password() {
    let (_provider, volume) = memory_volume(test_options());
    let before = volume.config();
    assert!(matches!(
        volume.change_password("wrong", "new"),
        Err(VolumeError::InvalidPassword)
    ));
    assert_eq!(volume.config(), before);
}

// ==================== Creation ====================

#[test]
fn test_create_over_existing_volume_fails() {
    let (provider, _volume) = memory_volume(test_options());
    let result = Volume::create(Arc::new(provider), test_options(), "other");
    assert!(matches!(result, Err(VolumeError::AlreadyExists { .. })));
}

#[test]
fn test_open_without_config() {
    let provider = encfs_core::provider::MemoryFileProvider::new();
    let result = Volume::open(Arc::new(provider), "pw");
    assert!(matches!(result, Err(VolumeError::InvalidConfig { .. })));
}
