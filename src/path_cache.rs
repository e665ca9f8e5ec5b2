//! Time-bounded cache from filesystem paths to resolved metadata.
//!
//! A generic accelerator for handler methods that would otherwise repeat an
//! expensive path resolution per call. Every map access happens under one
//! mutex held only for the duration of the map operation; path lookups are
//! map-speed, so a single coarse lock stays cheap at the expected scale (one
//! mount, modest working set) and nothing I/O-bound ever runs under it.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Cached knowledge about one filesystem path: raw stat metadata, the parent
/// inode, an opaque caller-defined tag, and freshness bookkeeping. Records
/// are replaced wholesale on insert, never partially mutated.
#[derive(Clone)]
pub struct PathInfo {
    stat: libc::stat,
    parent: libc::ino_t,
    data: u64,
    inserted: Instant,
    ttl: Duration,
}

impl PathInfo {
    /// `data` is free for the caller, typically a file handle or generation
    /// counter. The insertion timestamp and ttl are stamped by
    /// [`PathCache::insert`].
    pub fn new(stat: libc::stat, parent: libc::ino_t, data: u64) -> Self {
        Self {
            stat,
            parent,
            data,
            inserted: Instant::now(),
            ttl: Duration::ZERO,
        }
    }

    pub fn stat(&self) -> &libc::stat {
        &self.stat
    }

    pub fn ino(&self) -> libc::ino_t {
        self.stat.st_ino
    }

    pub fn parent(&self) -> libc::ino_t {
        self.parent
    }

    pub fn data(&self) -> u64 {
        self.data
    }

    pub fn is_dir(&self) -> bool {
        self.stat.st_mode & libc::S_IFMT == libc::S_IFDIR
    }

    /// Maximum age for which this record is served; zero means no expiry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self) -> bool {
        self.ttl.is_zero() || self.inserted.elapsed() <= self.ttl
    }
}

/// Ordered-by-path map from path to [`PathInfo`], serialized by one lock.
pub struct PathCache {
    entries: Mutex<BTreeMap<String, PathInfo>>,
}

impl PathCache {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    // The map is plain data, so a lock poisoned by a panicking handler
    // thread is still fully usable.
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PathInfo>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the record for `path` if present and still fresh. A stale
    /// entry reports a miss exactly like an absent one and is left in place;
    /// a miss always means "go recompute".
    pub fn fetch(&self, path: &str) -> Option<PathInfo> {
        let entries = self.lock();
        let info = entries.get(path)?;
        if info.is_fresh() { Some(info.clone()) } else { None }
    }

    /// Stores `info` under `path`, stamped with the current time and `ttl`
    /// (zero = never expires), replacing any prior record outright.
    pub fn insert(&self, path: impl Into<String>, mut info: PathInfo, ttl: Duration) {
        info.inserted = Instant::now();
        info.ttl = ttl;
        self.lock().insert(path.into(), info);
    }

    /// Deletes the entry for `path`; no-op when absent.
    pub fn remove(&self, path: &str) {
        self.lock().remove(path);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for PathCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide cache instance. In-memory only; reset on restart.
pub fn path_cache() -> &'static PathCache {
    static CACHE: PathCache = PathCache::new();
    &CACHE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;
    use std::thread;

    fn info(ino: libc::ino_t, mode: libc::mode_t) -> PathInfo {
        let mut stat: libc::stat = unsafe { mem::zeroed() };
        stat.st_ino = ino;
        stat.st_mode = mode;
        PathInfo::new(stat, 1, 0)
    }

    const NO_EXPIRY: Duration = Duration::ZERO;

    #[test]
    fn insert_then_fetch_round_trips_without_expiry() {
        let cache = PathCache::new();
        cache.insert("/a", info(7, libc::S_IFREG | 0o644), NO_EXPIRY);

        let hit = cache.fetch("/a").expect("fresh entry");
        assert_eq!(hit.ino(), 7);
        assert_eq!(hit.parent(), 1);
        assert!(!hit.is_dir());
        assert!(hit.ttl().is_zero());
    }

    #[test]
    fn fetch_misses_on_absent_path() {
        let cache = PathCache::new();
        assert!(cache.fetch("/nope").is_none());
    }

    #[test]
    fn entries_expire_after_their_ttl() {
        let cache = PathCache::new();
        cache.insert("/b", info(8, libc::S_IFREG), Duration::from_millis(20));
        assert!(cache.fetch("/b").is_some());

        thread::sleep(Duration::from_millis(60));
        assert!(cache.fetch("/b").is_none());
    }

    #[test]
    fn stale_entries_are_reported_not_evicted() {
        let cache = PathCache::new();
        cache.insert("/b", info(8, libc::S_IFREG), Duration::from_millis(10));
        thread::sleep(Duration::from_millis(40));

        assert!(cache.fetch("/b").is_none());
        // The miss must not have removed the record; eviction is the
        // caller's call via remove/clear or a replacing insert.
        assert_eq!(cache.len(), 1);
        assert!(cache.lock().contains_key("/b"));
    }

    #[test]
    fn reinsert_refreshes_a_stale_entry() {
        let cache = PathCache::new();
        cache.insert("/c", info(9, libc::S_IFREG), Duration::from_millis(10));
        thread::sleep(Duration::from_millis(40));
        assert!(cache.fetch("/c").is_none());

        cache.insert("/c", info(10, libc::S_IFREG), NO_EXPIRY);
        assert_eq!(cache.fetch("/c").expect("replaced").ino(), 10);
    }

    #[test]
    fn remove_then_fetch_misses() {
        let cache = PathCache::new();
        cache.insert("/c", info(3, libc::S_IFDIR), NO_EXPIRY);
        cache.remove("/c");
        assert!(cache.fetch("/c").is_none());

        // Removing an absent path is a no-op.
        cache.remove("/c");
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_misses_every_previously_inserted_path() {
        let cache = PathCache::new();
        for i in 0..16u64 {
            cache.insert(format!("/dir/{i}"), info(i, libc::S_IFREG), NO_EXPIRY);
        }
        cache.clear();
        for i in 0..16u64 {
            assert!(cache.fetch(&format!("/dir/{i}")).is_none());
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn directory_records_report_is_dir() {
        let cache = PathCache::new();
        cache.insert("/d", info(4, libc::S_IFDIR | 0o755), NO_EXPIRY);
        assert!(cache.fetch("/d").expect("dir entry").is_dir());
    }

    #[test]
    fn concurrent_disjoint_access_stays_consistent() {
        let cache = PathCache::new();
        thread::scope(|s| {
            for t in 0..4u64 {
                let cache = &cache;
                s.spawn(move || {
                    for i in 0..200u64 {
                        let path = format!("/t{t}/{i}");
                        cache.insert(path.clone(), info(t * 1000 + i, libc::S_IFREG), NO_EXPIRY);
                        let hit = cache.fetch(&path).expect("own insert");
                        assert_eq!(hit.ino(), t * 1000 + i);
                        if i % 3 == 0 {
                            cache.remove(&path);
                            assert!(cache.fetch(&path).is_none());
                        }
                    }
                });
            }
        });

        // 4 writers x 200 paths, one third removed again.
        let survivors: usize = cache.len();
        assert_eq!(survivors, 4 * (200 - 67));
    }

    #[test]
    fn global_cache_is_one_instance() {
        assert!(std::ptr::eq(path_cache(), path_cache()));
    }
}
