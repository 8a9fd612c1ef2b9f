use blockcache::{Cache, CacheConfig, CancellationToken};
use proptest::prelude::*;
use std::collections::HashSet;

const BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// P1 (total_size half): `total_size = BLOCK_SIZE * (# attached buffers)`.
/// No block is ever detached in this test, so the attached-buffer count is
/// exactly `block_count` from `Cache::stats()`.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn total_size_matches_attached_block_count(
        ops in prop::collection::vec(write_or_upload_op(), 1..40),
    ) {
        let cache = Cache::new(CacheConfig::default());
        let token = CancellationToken::new();
        let mut touched = HashSet::new();

        for op in ops {
            match op {
                Op::Write { block, byte } => {
                    let offset = block as u64 * BLOCK_SIZE;
                    cache.write("p", 0, &[byte], offset, &token).unwrap();
                    touched.insert(block);
                }
                Op::Upload { block } => {
                    let _ = cache.mark_block_uploaded("p", 0, block as u32);
                }
            }
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.block_count, touched.len());
        prop_assert_eq!(stats.total_size, touched.len() as u64 * BLOCK_SIZE);
    }
}

/// P2: a single write, fully contained in one block, reads back exactly and
/// is reported as fully covered.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn write_then_read_roundtrips(
        offset in 0u64..(BLOCK_SIZE - 1),
        data in prop::collection::vec(any::<u8>(), 1..4096),
    ) {
        let data_len = data.len() as u64;
        prop_assume!(offset + data_len <= BLOCK_SIZE);

        let cache = Cache::new(CacheConfig::default());
        let token = CancellationToken::new();
        cache.write("roundtrip", 0, &data, offset, &token).unwrap();

        let mut dest = vec![0u8; data.len()];
        let (found, covered) = cache
            .read("roundtrip", 0, offset, &mut dest, &token)
            .unwrap();
        prop_assert!(found);
        prop_assert!(covered);
        prop_assert_eq!(dest, data);
        prop_assert!(cache
            .is_range_covered("roundtrip", 0, offset, data_len, &token)
            .unwrap());
    }
}

/// P5: with a pending-size ceiling in force, the dirty footprint never
/// exceeds it, regardless of how many blocks are written.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn pending_size_never_exceeds_configured_ceiling(
        block_count in 1usize..20,
    ) {
        let mut config = CacheConfig::default();
        config.max_pending_size = 3 * BLOCK_SIZE;
        let cache = Cache::new(config);
        let token = CancellationToken::new();

        for b in 0..block_count {
            let offset = b as u64 * BLOCK_SIZE;
            // Intentionally ignore CacheFull: the point is that acceptance
            // never pushes the tracked dirty footprint past the ceiling.
            let _ = cache.write("ceiling", 0, &[1u8], offset, &token);
        }

        prop_assert!(cache.stats().total_size <= 3 * BLOCK_SIZE);
    }
}

/// P7: marking the same block uploaded any number of times settles into
/// `Uploaded` and never double-counts the dirty-to-uploaded transition.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn repeated_mark_uploaded_is_idempotent(repeat_count in 1usize..8) {
        let cache = Cache::new(CacheConfig::default());
        let token = CancellationToken::new();
        cache.write("idempotent", 0, &[1u8; 16], 0, &token).unwrap();

        for _ in 0..repeat_count {
            cache.mark_block_uploaded("idempotent", 0, 0).unwrap();
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.dirty_bytes, 0);
        prop_assert_eq!(stats.uploaded_bytes, 16);
        let dirty = cache.get_dirty_blocks("idempotent", &token).unwrap();
        prop_assert!(dirty.is_empty());
    }
}

#[derive(Debug, Clone)]
enum Op {
    Write { block: u8, byte: u8 },
    Upload { block: u8 },
}

fn write_or_upload_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, any::<u8>()).prop_map(|(block, byte)| Op::Write { block, byte }),
        (0u8..4).prop_map(|block| Op::Upload { block }),
    ]
}
