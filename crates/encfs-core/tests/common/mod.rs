#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use encfs_core::provider::{FileProvider, LocalFileProvider, MemoryFileProvider};
use encfs_core::vault::{Volume, VolumeOptions};
use tempfile::TempDir;
use walkdir::WalkDir;

pub const TEST_PASSWORD: &str = "test-password-12345";

/// Low iteration count so tests do not spend their time in PBKDF2.
pub const TEST_KDF_ITERATIONS: u32 = 1000;

/// A sample V6 volume under `tests/fixtures/`.
///
/// These were generated by a standalone implementation of the format built on
/// Python `cryptography` rather than by EncFS itself, with a low iteration
/// count. Only the first two mirror EncFS's own test volumes.
#[derive(Debug, Clone, Copy)]
pub struct Fixture {
    pub dir: &'static str,
    pub password: &'static str,
}

pub const DEFAULT_VOL: Fixture = Fixture {
    dir: "default-vol",
    password: "test",
};
pub const MULTI_ENTRY_VOL: Fixture = Fixture {
    dir: "multi-entry-vol",
    password: "test2",
};
pub const NO_UNIQUE_IV_VOL: Fixture = Fixture {
    dir: "no-unique-iv-vol",
    password: "test",
};
pub const PARANOIA_VOL: Fixture = Fixture {
    dir: "paranoia-vol",
    password: "test",
};
pub const STREAM_NAMES_VOL: Fixture = Fixture {
    dir: "stream-names-vol",
    password: "test",
};

pub const ALL_FIXTURES: [Fixture; 5] = [DEFAULT_VOL, MULTI_ENTRY_VOL, NO_UNIQUE_IV_VOL, PARANOIA_VOL, STREAM_NAMES_VOL];

pub fn fixture_path(fixture: Fixture) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(fixture.dir)
}

/// Open a fixture in place. Only for read-only tests.
pub fn open_fixture(fixture: Fixture) -> Volume {
    let provider = Arc::new(LocalFileProvider::new(fixture_path(fixture)));
    Volume::open(provider, fixture.password).expect("Failed to open fixture volume")
}

/// Copy a fixture into a temporary directory and open the copy.
pub fn open_fixture_copy(fixture: Fixture) -> (TempDir, Volume) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let src = fixture_path(fixture);
    for entry in WalkDir::new(&src) {
        let entry = entry.expect("Failed to walk fixture");
        let target = temp.path().join(entry.path().strip_prefix(&src).unwrap());
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).unwrap();
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
    let provider = Arc::new(LocalFileProvider::new(temp.path()));
    let volume = Volume::open(provider, fixture.password).expect("Failed to open fixture copy");
    (temp, volume)
}

pub fn test_options() -> VolumeOptions {
    VolumeOptions {
        kdf_iterations: TEST_KDF_ITERATIONS,
        ..VolumeOptions::standard()
    }
}

/// Create a volume in memory. The provider is returned so tests can inspect
/// or tamper with the raw encrypted tree.
pub fn memory_volume(options: VolumeOptions) -> (MemoryFileProvider, Volume) {
    let provider = MemoryFileProvider::new();
    let volume = Volume::create(Arc::new(provider.clone()), options, TEST_PASSWORD)
        .expect("Failed to create volume");
    (provider, volume)
}

/// Create a volume in a temporary directory.
pub fn local_volume(options: VolumeOptions) -> (TempDir, Volume) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let provider: Arc<dyn FileProvider> = Arc::new(LocalFileProvider::new(temp.path()));
    let volume = Volume::create(provider, options, TEST_PASSWORD).expect("Failed to create volume");
    (temp, volume)
}

/// Content of exactly `size` bytes with a repeating pattern.
pub fn sized_content(size: usize) -> Vec<u8> {
    let pattern = b"0123456789ABCDEF";
    (0..size).map(|i| pattern[i % pattern.len()]).collect()
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
