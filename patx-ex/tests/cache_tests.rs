//! Flush-on-demand cache under concurrent use
//!
//! Covers:
//! - Concurrent updates from worker threads all land on disk after flush_all
//! - An entry read by `get` is never evicted by the sweep that `get` triggers

use patx_ex::utils::{CacheEntry, FlushOnDemand};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_concurrent_updates_are_all_flushed() {
    let dir = TempDir::new().unwrap();
    let cache: Arc<FlushOnDemand<BTreeSet<String>>> =
        Arc::new(FlushOnDemand::new(Duration::from_millis(5), Duration::from_millis(1)));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let root = dir.path().to_path_buf();
            std::thread::spawn(move || {
                for item in 0..25 {
                    let key = format!("{}-{}", worker, item);
                    let colors: BTreeSet<String> = [format!("0x{:06x}", item)].into_iter().collect();
                    cache
                        .update(CacheEntry::new(key.clone(), root.join(format!("{}.json", key)), colors))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    cache.flush_all().unwrap();
    assert!(cache.is_empty());

    let written = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
        .count();
    assert_eq!(written, 200);
}

#[test]
fn test_get_protects_entry_from_its_own_sweep() {
    let dir = TempDir::new().unwrap();
    let cache: FlushOnDemand<BTreeSet<String>> =
        FlushOnDemand::new(Duration::from_millis(50), Duration::ZERO);

    cache
        .update(CacheEntry::new("k", dir.path().join("k.json"), BTreeSet::new()))
        .unwrap();
    std::thread::sleep(Duration::from_millis(100));

    // Idle past the limit, but the read refreshes it before the sweep runs
    assert!(cache.get("k").unwrap().is_some());
    assert!(cache.has("k"));
    assert!(!dir.path().join("k.json").exists());
}
