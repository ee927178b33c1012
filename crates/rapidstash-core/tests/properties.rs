//! Property-based tests for the write/read/grow invariants (P1, P2, P5).

use proptest::collection::vec;
use proptest::prelude::*;
use rapidstash_core::{Store, StoreConfig};
use tempfile::tempdir;

proptest! {
    /// P1: any sequence of writes that stay within one alloc_size window
    /// read back exactly at the position/length they were written with.
    #[test]
    fn round_trip_within_alloc_window(chunks in vec(vec(any::<u8>(), 1..64), 1..20)) {
        let tmp = tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.min_alloc = 64 * 20;
        let store = Store::open(tmp.path().join("s.rsdb"), config).unwrap();
        let id = store.select(b"prop-object").unwrap();

        let mut expected = Vec::new();
        {
            let mut w = store.get_safe_writer(id).unwrap();
            for chunk in &chunks {
                let pos = expected.len() as u64;
                w.seek(pos).unwrap();
                w.write(chunk).unwrap();
                expected.extend_from_slice(chunk);
            }
        }

        let mut r = store.get_safe_reader(id).unwrap();
        let back = r.read(expected.len() as u64).unwrap();
        prop_assert_eq!(back, expected);
    }

    /// P2: header consistency after writes — name preserved, live_size
    /// tracks the furthest position written, version starts at -1 and
    /// never decreases.
    #[test]
    fn header_stays_consistent_across_writes(sizes in vec(1usize..256, 1..10)) {
        let tmp = tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.min_alloc = 32;
        let store = Store::open(tmp.path().join("s.rsdb"), config).unwrap();
        let id = store.select(b"header-object").unwrap();

        let mut max_len = 0u64;
        let mut last_version = -1i32;
        for size in sizes {
            let payload = vec![0x7Eu8; size];
            {
                let mut w = store.get_safe_writer(id).unwrap();
                w.write(&payload).unwrap();
            }
            max_len = max_len.max(size as u64);
            let header = store.get_header(id).unwrap();
            prop_assert_eq!(header.name_str(), &b"header-object"[..]);
            prop_assert_eq!(header.live_size, max_len);
            prop_assert!(header.version >= last_version);
            last_version = header.version;
        }
    }

    /// P5: a write extending past the current map size succeeds, is
    /// readable afterward, and leaves the map sized at least `required_end`.
    #[test]
    fn grow_beyond_current_map_size_is_readable(extra_len in 1usize..(2 * 1024 * 1024)) {
        let tmp = tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.initial_map_size = 4096;
        config.min_alloc = 32;
        let store = Store::open(tmp.path().join("s.rsdb"), config).unwrap();
        let id = store.select(b"grow-object").unwrap();

        let payload = vec![0x99u8; extra_len];
        {
            let mut w = store.get_safe_writer(id).unwrap();
            w.write(&payload).unwrap();
        }

        let mut r = store.get_safe_reader(id).unwrap();
        let back = r.read(extra_len as u64).unwrap();
        prop_assert_eq!(back, payload);
    }
}
