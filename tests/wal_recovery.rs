use blockcache::{Cache, CacheConfig, CancellationToken, WalConfig};
use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn writes_survive_close_and_reopen() {
    init_logging();
    let dir = tempdir().unwrap();
    let token = CancellationToken::new();

    {
        let cache = Cache::new_with_wal(CacheConfig::default(), WalConfig::new(dir.path())).unwrap();
        cache
            .write("report.csv", 0, b"hello, world", 0, &token)
            .unwrap();
        cache.close().unwrap();
    }

    let cache = Cache::new_with_wal(CacheConfig::default(), WalConfig::new(dir.path())).unwrap();
    let mut dest = vec![0u8; b"hello, world".len()];
    let (found, covered) = cache.read("report.csv", 0, 0, &mut dest, &token).unwrap();
    assert!(found);
    assert!(covered);
    assert_eq!(&dest, b"hello, world");
    assert!(cache.has_dirty_data("report.csv"));
}

#[test]
fn uploaded_marker_survives_reopen_as_uploaded_not_pending() {
    let dir = tempdir().unwrap();
    let token = CancellationToken::new();

    {
        let cache = Cache::new_with_wal(CacheConfig::default(), WalConfig::new(dir.path())).unwrap();
        cache.write("blob", 0, b"payload-bytes", 0, &token).unwrap();
        assert!(cache.mark_block_uploaded("blob", 0, 0).unwrap());
        cache.close().unwrap();
    }

    let cache = Cache::new_with_wal(CacheConfig::default(), WalConfig::new(dir.path())).unwrap();
    assert!(!cache.has_dirty_data("blob"));
    let dirty = cache.get_dirty_blocks("blob", &token).unwrap();
    assert!(dirty.is_empty());
}

#[test]
fn remove_recorded_in_wal_drops_file_on_replay() {
    let dir = tempdir().unwrap();
    let token = CancellationToken::new();

    {
        let cache = Cache::new_with_wal(CacheConfig::default(), WalConfig::new(dir.path())).unwrap();
        cache.write("ephemeral", 0, b"throwaway", 0, &token).unwrap();
        cache.remove("ephemeral", &token).unwrap();
        cache.close().unwrap();
    }

    let cache = Cache::new_with_wal(CacheConfig::default(), WalConfig::new(dir.path())).unwrap();
    assert!(cache.get_file_size("ephemeral").is_none());
    assert!(cache.list_files().is_empty());
}

#[test]
fn reopen_without_any_prior_writes_starts_empty() {
    let dir = tempdir().unwrap();
    let cache = Cache::new_with_wal(CacheConfig::default(), WalConfig::new(dir.path())).unwrap();
    assert!(cache.list_files().is_empty());
    cache.close().unwrap();

    let cache = Cache::new_with_wal(CacheConfig::default(), WalConfig::new(dir.path())).unwrap();
    assert!(cache.list_files().is_empty());
}

#[test]
fn many_small_writes_force_wal_growth_and_all_replay() {
    let dir = tempdir().unwrap();
    let token = CancellationToken::new();
    let mut wal_config = WalConfig::new(dir.path());
    wal_config.initial_size = 256; // force several doublings well before this loop ends

    {
        let cache = Cache::new_with_wal(CacheConfig::default(), wal_config.clone()).unwrap();
        for chunk in 0..20u32 {
            cache
                .write("growing", chunk, b"some bytes to append", 0, &token)
                .unwrap();
        }
        cache.close().unwrap();
    }

    let cache = Cache::new_with_wal(CacheConfig::default(), wal_config).unwrap();
    let size = cache.get_file_size("growing").unwrap();
    assert!(size > 0);
    for chunk in 0..20u32 {
        assert!(cache
            .is_range_covered("growing", chunk, 0, b"some bytes to append".len() as u64, &token)
            .unwrap());
    }
}
