//! Flush-on-demand cache
//!
//! Bounded-memory map from a key to an accumulator. Entries that stay idle longer
//! than `flush_idle` are serialized to their target path and dropped from memory
//! by a flush sweep. Sweeps are opportunistic (triggered by `update` and `get`)
//! and time-gated by `flush_interval`; `flush_all` writes everything regardless.
//!
//! Eviction is time-based, not size-based: memory stays bounded only as long as
//! callers keep reaching sweep points.
//!
//! All access goes through one mutex, so a sweep always sees the latest access
//! time of the key it is about to evict.

use crate::error::{ExtractError, ExtractResult};
use patx_common::CacheOptions;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// One cached accumulator
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub target_path: PathBuf,
    pub value: T,
    last_access: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, target_path: impl Into<PathBuf>, value: T) -> Self {
        Self {
            key: key.into(),
            target_path: target_path.into(),
            value,
            last_access: Instant::now(),
        }
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    last_flush: Instant,
}

/// Flush-on-demand cache
///
/// Set-typed accumulators should use `BTreeSet` so they serialize as an ordered list.
pub struct FlushOnDemand<T> {
    state: Mutex<CacheState<T>>,
    flush_idle: Duration,
    flush_interval: Duration,
}

impl<T> FlushOnDemand<T>
where
    T: Serialize + Clone,
{
    pub fn new(flush_idle: Duration, flush_interval: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                last_flush: Instant::now(),
            }),
            flush_idle,
            flush_interval,
        }
    }

    pub fn from_options(options: &CacheOptions) -> Self {
        Self::new(
            Duration::from_secs(options.flush_idle_secs),
            Duration::from_secs(options.flush_interval_secs),
        )
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        // A panicking writer leaves the map consistent: entries are only removed
        // after their file is written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Membership test, no side effect
    pub fn has(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Insert or replace the entry for its key, after an opportunistic sweep
    pub fn update(&self, entry: CacheEntry<T>) -> ExtractResult<()> {
        let mut state = self.lock();
        let flushed = self.sweep(&mut state, false)?;
        if flushed > 0 {
            debug!(flushed, "Flushed entries on update");
        }
        state.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Fetch a copy of the entry, refreshing its last-access time
    pub fn get(&self, key: &str) -> ExtractResult<Option<CacheEntry<T>>> {
        let mut state = self.lock();
        let found = state.entries.get_mut(key).map(|entry| {
            entry.last_access = Instant::now();
            entry.clone()
        });

        let flushed = self.sweep(&mut state, false)?;
        if flushed > 0 {
            debug!(flushed, "Flushed entries on get");
        }
        Ok(found)
    }

    /// Evict idle entries, at most once per `flush_interval`
    pub fn flush(&self) -> ExtractResult<usize> {
        let mut state = self.lock();
        self.sweep(&mut state, false)
    }

    /// Write and evict every entry
    pub fn flush_all(&self) -> ExtractResult<usize> {
        let mut state = self.lock();
        self.sweep(&mut state, true)
    }

    fn sweep(&self, state: &mut CacheState<T>, everything: bool) -> ExtractResult<usize> {
        let now = Instant::now();

        if !everything && now.duration_since(state.last_flush) < self.flush_interval {
            return Ok(0);
        }

        let leaving: Vec<String> = state
            .entries
            .values()
            .filter(|entry| everything || now.duration_since(entry.last_access) > self.flush_idle)
            .map(|entry| entry.key.clone())
            .collect();

        for key in &leaving {
            if let Some(entry) = state.entries.get(key) {
                write_entry(entry)?;
            }
            state.entries.remove(key);
            debug!(key = %key, "Flushed cache entry");
        }

        state.last_flush = Instant::now();
        Ok(leaving.len())
    }
}

fn write_entry<T: Serialize>(entry: &CacheEntry<T>) -> ExtractResult<()> {
    let to_cache_error = |reason: String| ExtractError::Cache {
        key: entry.key.clone(),
        reason,
    };

    if let Some(parent) = entry.target_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| to_cache_error(e.to_string()))?;
    }

    let bytes = serde_json::to_vec(&entry.value).map_err(|e| to_cache_error(e.to_string()))?;
    write_atomic(&entry.target_path, &bytes).map_err(|e| to_cache_error(e.to_string()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::thread::sleep;
    use tempfile::TempDir;

    fn colors(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flush_before_interval_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let cache = FlushOnDemand::new(Duration::ZERO, Duration::from_secs(60));

        cache
            .update(CacheEntry::new("a.png", dir.path().join("a.json"), colors(&["0x000000"])))
            .unwrap();

        assert_eq!(cache.flush().unwrap(), 0);
        assert!(cache.has("a.png"));
        assert!(!dir.path().join("a.json").exists());
    }

    #[test]
    fn test_flush_all_writes_every_entry() {
        let dir = TempDir::new().unwrap();
        let cache = FlushOnDemand::new(Duration::from_secs(3600), Duration::from_secs(3600));

        cache
            .update(CacheEntry::new("a", dir.path().join("a.json"), colors(&["0xff0000", "0x00ff00"])))
            .unwrap();
        cache
            .update(CacheEntry::new("b", dir.path().join("nested/b.json"), colors(&["0x0000ff"])))
            .unwrap();

        assert_eq!(cache.flush_all().unwrap(), 2);
        assert!(!cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.is_empty());

        let a: Vec<String> =
            serde_json::from_slice(&std::fs::read(dir.path().join("a.json")).unwrap()).unwrap();
        assert_eq!(a, vec!["0x00ff00".to_string(), "0xff0000".to_string()]);

        let b: Vec<String> =
            serde_json::from_slice(&std::fs::read(dir.path().join("nested/b.json")).unwrap())
                .unwrap();
        assert_eq!(b, vec!["0x0000ff".to_string()]);
    }

    #[test]
    fn test_idle_entries_evicted_by_sweep() {
        let dir = TempDir::new().unwrap();
        let cache = FlushOnDemand::new(Duration::from_millis(20), Duration::ZERO);

        cache
            .update(CacheEntry::new("old", dir.path().join("old.json"), colors(&["0x010101"])))
            .unwrap();
        sleep(Duration::from_millis(60));

        // The sweep runs before the new entry lands, so only "old" leaves
        cache
            .update(CacheEntry::new("new", dir.path().join("new.json"), colors(&["0x020202"])))
            .unwrap();

        assert!(!cache.has("old"));
        assert!(cache.has("new"));
        assert!(dir.path().join("old.json").exists());
    }

    #[test]
    fn test_get_refreshes_last_access() {
        let dir = TempDir::new().unwrap();
        let cache = FlushOnDemand::new(Duration::from_millis(300), Duration::ZERO);

        cache
            .update(CacheEntry::new("k", dir.path().join("k.json"), colors(&["0x0a0a0a"])))
            .unwrap();
        sleep(Duration::from_millis(200));

        let entry = cache.get("k").unwrap().unwrap();
        assert_eq!(entry.value, colors(&["0x0a0a0a"]));

        sleep(Duration::from_millis(200));
        assert_eq!(cache.flush().unwrap(), 0);
        assert!(cache.has("k"));

        sleep(Duration::from_millis(400));
        assert_eq!(cache.flush().unwrap(), 1);
        assert!(!cache.has("k"));
    }

    #[test]
    fn test_get_miss_returns_none() {
        let cache: FlushOnDemand<BTreeSet<String>> =
            FlushOnDemand::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(cache.get("missing").unwrap().is_none());
    }
}
