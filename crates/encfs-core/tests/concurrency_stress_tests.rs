//! Long-running stress tests. Run with `cargo test --features stress`.

#![cfg(feature = "stress")]

mod common;

use std::thread;

use common::{init_tracing, local_volume, sized_content, test_options};

#[test]
fn stress_mixed_operations_on_local_volume() {
    init_tracing();
    let (_temp, volume) = local_volume(test_options());

    thread::scope(|scope| {
        for t in 0..16 {
            let volume = volume.clone();
            scope.spawn(move || {
                let dir = format!("/t{t}");
                volume.mkdir(&dir).unwrap();
                for i in 0..200 {
                    let path = format!("{dir}/f{i}");
                    let content = sized_content((t * 997 + i * 131) % 9000);
                    volume.write_file(&path, &content).unwrap();
                    assert_eq!(volume.read_file(&path).unwrap(), content);
                    if i % 3 == 0 {
                        let moved = format!("{dir}/m{i}");
                        assert!(volume.move_entry(&path, &moved).unwrap());
                        assert!(volume.delete(&moved).unwrap());
                    }
                }
                assert!(volume.delete_all(&dir).unwrap());
            });
        }
    });

    assert!(volume.list_children("/").unwrap().is_empty());
}
