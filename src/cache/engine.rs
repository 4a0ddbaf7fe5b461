//! Cache Engine Module
//!
//! Public get/set/remove contract on top of the entry store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::cache::codec::{Codec, JsonCodec};
use crate::cache::entry::{current_timestamp_ms, CacheEntry, EntryHeader};
use crate::cache::key::key_segment;
use crate::cache::store::{EntryStore, SweepReport};
use crate::cache::CacheStats;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_sweeper, SweeperHandle};

/// Returns the platform-standard cache location, if the platform has one.
pub fn default_cache_root() -> Option<PathBuf> {
    dirs::cache_dir()
}

/// Resolves the root directory a config points at: the explicit root when
/// set, otherwise `path_component` under the platform cache location.
pub fn resolve_root(config: &CacheConfig) -> Result<PathBuf> {
    if let Some(root) = &config.root {
        return Ok(root.clone());
    }
    default_cache_root()
        .map(|base| base.join(&config.path_component))
        .ok_or_else(|| CacheError::NoCacheDirectory(config.path_component.clone()))
}

// == File Cache ==
/// A persistent key-value cache storing one file per entry.
///
/// Keys are any `Serialize` type and are mapped to file names by hashing;
/// values go through the cache's [`Codec`]. Cloning is cheap and clones
/// share the same store.
///
/// Reads never fail: absent, expired and unreadable entries are all misses,
/// and expired or unreadable files are deleted as they are found. Writes and
/// removals report storage failures.
///
/// When opened inside a tokio runtime with a non-zero `sweep_interval`, the
/// cache starts its background sweeper right away. The sweeper stops when
/// the last clone is dropped.
#[derive(Debug, Clone)]
pub struct FileCache<C = JsonCodec> {
    store: Arc<EntryStore>,
    codec: C,
    config: Arc<CacheConfig>,
    sweeper: Arc<Mutex<Option<SweeperHandle>>>,
}

impl FileCache<JsonCodec> {
    // == Constructors ==
    /// Opens a JSON-backed cache at the root resolved from `config`.
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with_codec(config, JsonCodec)
    }

    /// Opens a JSON-backed cache named `path_component` under the platform
    /// cache location, with default lifetimes.
    pub fn with_path_component(path_component: impl Into<String>) -> Result<Self> {
        Self::open(CacheConfig {
            path_component: path_component.into(),
            ..CacheConfig::default()
        })
    }

    /// Opens a JSON-backed cache at an explicit root directory.
    pub fn with_root(root: impl Into<PathBuf>, config: CacheConfig) -> Result<Self> {
        Self::with_root_and_codec(root, config, JsonCodec)
    }
}

impl<C: Codec> FileCache<C> {
    pub fn open_with_codec(config: CacheConfig, codec: C) -> Result<Self> {
        let root = resolve_root(&config)?;
        Self::with_root_and_codec(root, config, codec)
    }

    pub fn with_root_and_codec(
        root: impl Into<PathBuf>,
        config: CacheConfig,
        codec: C,
    ) -> Result<Self> {
        let config = config.normalized();
        let store = Arc::new(EntryStore::open(root, config.max_lifetime)?);
        debug!("Opened file cache at {}", store.root().display());

        let sweeper = if !config.sweeper_enabled() {
            None
        } else if Handle::try_current().is_ok() {
            spawn_sweeper(store.clone(), config.sweep_interval)
        } else {
            debug!("No tokio runtime, sweeper for {} not started", store.root().display());
            None
        };

        Ok(Self {
            store,
            codec,
            config: Arc::new(config),
            sweeper: Arc::new(Mutex::new(sweeper)),
        })
    }

    // == Get ==
    /// Returns the value stored under `key` if it is still fresh.
    ///
    /// Same as [`get_with_lifetime`](Self::get_with_lifetime) with the
    /// default lifetime.
    pub fn get<K, V>(&self, key: &K) -> Option<V>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        self.get_with_lifetime(key, self.config.default_lifetime)
    }

    /// Returns the value stored under `key` if it is still fresh.
    ///
    /// Freshness is decided solely by the lifetime stored when the entry was
    /// written. The read-time lifetime never shortens or extends it; it is
    /// the lifetime [`get_or_insert_with_lifetime`](Self::get_or_insert_with_lifetime)
    /// gives the value it writes on a miss.
    pub fn get_with_lifetime<K, V>(&self, key: &K, _lifetime: Duration) -> Option<V>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Like [`get`](Self::get), returning the write metadata with the value.
    pub fn get_entry<K, V>(&self, key: &K) -> Option<CacheEntry<V>>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        let entry = self.lookup(key);
        if entry.is_some() {
            self.store.record_hit();
        } else {
            self.store.record_miss();
        }
        entry
    }

    fn lookup<K, V>(&self, key: &K) -> Option<CacheEntry<V>>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        let path = match self.path_for(key) {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot map cache key: {}", e);
                return None;
            }
        };

        let raw = self.store.read(&path, current_timestamp_ms())?;
        match self.codec.decode(&raw.payload) {
            Ok(value) => Some(CacheEntry::from_header(raw.header, value)),
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", path.display(), e);
                self.store.discard(&path, &raw.header);
                None
            }
        }
    }

    // == Get Or Insert ==
    /// Returns the fresh value under `key`, or computes one with `f` and
    /// stores it with the default lifetime.
    pub fn get_or_insert_with<K, V, F>(&self, key: &K, f: F) -> Result<V>
    where
        K: Serialize + ?Sized,
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> V,
    {
        self.get_or_insert_with_lifetime(key, self.config.default_lifetime, f)
    }

    /// Returns the fresh value under `key`, or computes one with `f` and
    /// stores it with `lifetime`.
    ///
    /// `lifetime` only applies to the value written on a miss; it never
    /// changes whether an already stored entry counts as fresh.
    pub fn get_or_insert_with_lifetime<K, V, F>(
        &self,
        key: &K,
        lifetime: Duration,
        f: F,
    ) -> Result<V>
    where
        K: Serialize + ?Sized,
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get_with_lifetime(key, lifetime) {
            return Ok(value);
        }

        let value = f();
        self.set_with_lifetime(key, &value, lifetime)?;
        Ok(value)
    }

    // == Metadata ==
    /// Returns the stored header for `key` without decoding the value.
    ///
    /// The header is returned even if the entry has expired.
    pub fn metadata<K>(&self, key: &K) -> Option<EntryHeader>
    where
        K: Serialize + ?Sized,
    {
        let path = self.path_for(key).ok()?;
        self.store.read_header(&path).ok().flatten()
    }

    /// True if a fresh entry exists for `key`. Does not count as a lookup.
    pub fn contains_key<K>(&self, key: &K) -> bool
    where
        K: Serialize + ?Sized,
    {
        self.metadata(key).is_some_and(|header| {
            current_timestamp_ms() < header.expires_at_capped(self.config.max_lifetime)
        })
    }

    // == Set ==
    /// Stores `value` under `key` with the default lifetime.
    pub fn set<K, V>(&self, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        self.write(key, value, None)
    }

    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// `lifetime` is clamped to the configured maximum. A zero lifetime is
    /// accepted and produces an entry that is already stale.
    pub fn set_with_lifetime<K, V>(&self, key: &K, value: &V, lifetime: Duration) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        self.write(key, value, Some(lifetime))
    }

    fn write<K, V>(&self, key: &K, value: &V, lifetime: Option<Duration>) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let path = self.path_for(key)?;
        let payload = self.codec.encode(value)?;
        let lifetime = self.config.effective_lifetime(lifetime);

        let header = self
            .store
            .write(&path, &payload, lifetime, current_timestamp_ms())?;
        debug!(
            "Stored cache entry {} ({} bytes, expires {:?})",
            path.display(),
            payload.len(),
            header.expires_at_utc()
        );
        Ok(())
    }

    // == Remove ==
    /// Deletes the entry for `key`. Removing an absent key succeeds.
    pub fn remove<K>(&self, key: &K) -> Result<()>
    where
        K: Serialize + ?Sized,
    {
        let path = self.path_for(key)?;
        if self.store.remove(&path)? {
            debug!("Removed cache entry {}", path.display());
        }
        Ok(())
    }

    // == Remove Expired ==
    /// Runs one sweep over the cache root now.
    ///
    /// Returns `Ok(None)` if a sweep is already running.
    pub fn remove_expired(&self) -> Result<Option<SweepReport>> {
        self.store.sweep(current_timestamp_ms())
    }

    // == Sweeper ==
    /// Starts the background sweeper if it is not already running.
    ///
    /// Needed only for caches opened outside a tokio runtime. Returns false
    /// when the interval is zero, when a sweeper is already running, or when
    /// called outside a runtime.
    pub fn start_sweeper(&self) -> bool {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        if Handle::try_current().is_err() {
            warn!("Cannot start sweeper for {} outside a tokio runtime", self.root().display());
            return false;
        }

        *sweeper = spawn_sweeper(self.store.clone(), self.config.sweep_interval);
        sweeper.is_some()
    }

    /// Stops the background sweeper. Returns whether one was running.
    pub fn stop_sweeper(&self) -> bool {
        match self.sweeper.lock().take() {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Skips sweeps until [`resume_sweeper`](Self::resume_sweeper) is called.
    pub fn pause_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().as_ref() {
            handle.pause();
        }
    }

    pub fn resume_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().as_ref() {
            handle.resume();
        }
    }

    /// True while the background sweeper task is alive, paused or not.
    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // == Accessors ==
    /// Returns the path of the entry file for `key`.
    pub fn path_for<K>(&self, key: &K) -> Result<PathBuf>
    where
        K: Serialize + ?Sized,
    {
        Ok(self.store.path_for(&key_segment(key)?))
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Returns a snapshot of the cache's counters.
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Counts entry files under the root, including ones not yet reclaimed.
    pub fn entry_count(&self) -> Result<usize> {
        self.store.entry_count()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;
    use std::thread::sleep;
    use tempfile::TempDir;

    fn test_config() -> CacheConfig {
        CacheConfig {
            default_lifetime: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
            sweep_interval: Duration::ZERO,
            ..CacheConfig::default()
        }
    }

    fn open_cache() -> (TempDir, FileCache) {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::with_root(dir.path(), test_config()).unwrap();
        (dir, cache)
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_set_and_get() {
        let (_dir, cache) = open_cache();

        cache.set("key1", "value1").unwrap();
        let value: Option<String> = cache.get("key1");

        assert_eq!(value.as_deref(), Some("value1"));
        assert_eq!(cache.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_structured_keys_and_values() {
        let (_dir, cache) = open_cache();
        let profile = Profile {
            name: "ada".to_string(),
            tags: vec!["admin".to_string()],
        };

        cache.set(&("profile", 42u64), &profile).unwrap();

        assert_eq!(cache.get(&("profile", 42u64)), Some(profile));
        assert_eq!(cache.get::<_, Profile>(&("profile", 43u64)), None);
    }

    #[test]
    fn test_get_nonexistent() {
        let (_dir, cache) = open_cache();
        assert_eq!(cache.get::<_, String>("nonexistent"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_overwrite() {
        let (_dir, cache) = open_cache();

        cache.set("key1", "value1").unwrap();
        cache.set("key1", "value2").unwrap();

        assert_eq!(cache.get::<_, String>("key1").as_deref(), Some("value2"));
        assert_eq!(cache.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_remove() {
        let (_dir, cache) = open_cache();

        cache.set("key1", &1u32).unwrap();
        cache.remove("key1").unwrap();

        assert_eq!(cache.get::<_, u32>("key1"), None);
        assert!(!cache.path_for("key1").unwrap().exists());
    }

    #[test]
    fn test_remove_absent_twice() {
        let (_dir, cache) = open_cache();
        assert!(cache.remove("never-set").is_ok());
        assert!(cache.remove("never-set").is_ok());
    }

    #[test]
    fn test_expiry_boundary() {
        let (_dir, cache) = open_cache();

        cache
            .set_with_lifetime("key1", "value1", Duration::from_secs(1))
            .unwrap();
        assert_eq!(cache.get::<_, String>("key1").as_deref(), Some("value1"));

        sleep(Duration::from_millis(1100));

        assert_eq!(cache.get::<_, String>("key1"), None);
        assert!(!cache.path_for("key1").unwrap().exists());
        assert_eq!(cache.stats().expired_on_read, 1);
    }

    #[test]
    fn test_default_lifetime_applied() {
        let (_dir, cache) = open_cache();
        cache.set("key1", &true).unwrap();

        let header = cache.metadata("key1").unwrap();
        assert_eq!(header.lifetime(), Duration::from_secs(300));
    }

    #[test]
    fn test_lifetime_clamped_to_max() {
        let (_dir, cache) = open_cache();
        let requested = Duration::from_secs(3600 + 1000);

        cache.set_with_lifetime("key1", "v", requested).unwrap();

        let header = cache.metadata("key1").unwrap();
        assert_eq!(header.lifetime(), Duration::from_secs(3600));
        assert_eq!(header.expires_at(), header.written_at + 3_600_000);
    }

    #[test]
    fn test_zero_lifetime_is_write_then_miss() {
        let (_dir, cache) = open_cache();

        cache.set_with_lifetime("key1", "v", Duration::ZERO).unwrap();

        assert!(!cache.contains_key("key1"));
        assert_eq!(cache.get::<_, String>("key1"), None);
    }

    #[test]
    fn test_corrupt_entry_self_heals() {
        let (_dir, cache) = open_cache();
        cache.set("key1", "v1").unwrap();

        let path = cache.path_for("key1").unwrap();
        fs::write(&path, b"\x00\x01\x02 definitely not an entry").unwrap();

        assert_eq!(cache.get::<_, String>("key1"), None);
        assert!(!path.exists());

        cache.set("key1", "v2").unwrap();
        assert_eq!(cache.get::<_, String>("key1").as_deref(), Some("v2"));
    }

    #[test]
    fn test_undecodable_payload_is_miss_and_cleanup() {
        let (_dir, cache) = open_cache();
        cache.set("key1", "a string, not a profile").unwrap();

        assert_eq!(cache.get::<_, Profile>("key1"), None);
        assert!(!cache.path_for("key1").unwrap().exists());
        assert_eq!(cache.stats().corrupt_removed, 1);
    }

    #[test]
    fn test_get_or_insert_with() {
        let (_dir, cache) = open_cache();
        let mut calls = 0;

        let first: u32 = cache
            .get_or_insert_with("answer", || {
                calls += 1;
                42
            })
            .unwrap();
        let second: u32 = cache.get_or_insert_with("answer", || 0).unwrap();

        assert_eq!(first, 42);
        assert_eq!(second, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_read_lifetime_does_not_rejudge_stored_entry() {
        let (_dir, cache) = open_cache();
        cache
            .set_with_lifetime("key1", "stored", Duration::from_secs(600))
            .unwrap();

        // A shorter read-time lifetime still returns the stored entry
        let value: String = cache
            .get_or_insert_with_lifetime("key1", Duration::ZERO, || "fresh".to_string())
            .unwrap();
        assert_eq!(value, "stored");
        assert_eq!(
            cache.metadata("key1").unwrap().lifetime(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_read_lifetime_applies_to_refill() {
        let (_dir, cache) = open_cache();

        let _: String = cache
            .get_or_insert_with_lifetime("key1", Duration::from_secs(30), || "fresh".to_string())
            .unwrap();

        assert_eq!(
            cache.metadata("key1").unwrap().lifetime(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_get_with_lifetime_uses_stored_lifetime() {
        let (_dir, cache) = open_cache();
        cache
            .set_with_lifetime("fresh", "stored", Duration::from_secs(600))
            .unwrap();
        cache.set_with_lifetime("stale", "stored", Duration::ZERO).unwrap();

        // A shorter read lifetime does not turn a hit into a miss
        let hit: Option<String> = cache.get_with_lifetime("fresh", Duration::ZERO);
        assert_eq!(hit.as_deref(), Some("stored"));

        // A longer one does not bring an expired entry back
        let miss: Option<String> = cache.get_with_lifetime("stale", Duration::from_secs(3600));
        assert_eq!(miss, None);

        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_get_entry_metadata() {
        let (_dir, cache) = open_cache();
        let before = current_timestamp_ms();
        cache.set("key1", &7i64).unwrap();

        let entry: CacheEntry<i64> = cache.get_entry("key1").unwrap();
        assert_eq!(entry.value, 7);
        assert!(entry.written_at >= before);
        assert_eq!(entry.lifetime, Duration::from_secs(300));
        assert!(entry.expires_at_utc().is_some());
    }

    #[test]
    fn test_remove_expired() {
        let (_dir, cache) = open_cache();
        cache.set_with_lifetime("stale", "v", Duration::ZERO).unwrap();
        cache.set("fresh", "v").unwrap();

        let report = cache.remove_expired().unwrap().unwrap();

        assert_eq!(report.removed, 1);
        assert!(cache.contains_key("fresh"));
        assert_eq!(cache.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_clones_share_store() {
        let (_dir, cache) = open_cache();
        let other = cache.clone();

        cache.set("key1", "v").unwrap();
        assert_eq!(other.get::<_, String>("key1").as_deref(), Some("v"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let (_dir, cache) = open_cache();
        cache.set("key1", "v").unwrap();
        let _: Option<String> = cache.get("key1");
        let _: Option<String> = cache.get("key2");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_no_sweeper_outside_runtime() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            sweep_interval: Duration::from_millis(100),
            ..test_config()
        };
        let cache = FileCache::with_root(dir.path(), config).unwrap();

        assert!(!cache.sweeper_running());
        assert!(!cache.start_sweeper());
        assert!(!cache.stop_sweeper());
    }

    #[tokio::test]
    async fn test_sweeper_starts_with_cache() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            sweep_interval: Duration::from_millis(100),
            ..test_config()
        };
        let cache = FileCache::with_root(dir.path(), config).unwrap();
        assert!(cache.sweeper_running());
        assert!(!cache.start_sweeper(), "already running");

        cache.set_with_lifetime("stale", "v", Duration::ZERO).unwrap();
        let path = cache.path_for("stale").unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!path.exists());

        assert!(cache.stop_sweeper());
        assert!(!cache.sweeper_running());
        assert!(cache.start_sweeper());
        cache.stop_sweeper();
    }

    #[tokio::test]
    async fn test_paused_cache_sweeper_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            sweep_interval: Duration::from_millis(100),
            ..test_config()
        };
        let cache = FileCache::with_root(dir.path(), config).unwrap();
        cache.pause_sweeper();

        cache.set_with_lifetime("stale", "v", Duration::ZERO).unwrap();
        let path = cache.path_for("stale").unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(path.exists());

        cache.resume_sweeper();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_dropping_last_clone_stops_sweeper() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            sweep_interval: Duration::from_millis(100),
            ..test_config()
        };
        let cache = FileCache::with_root(dir.path(), config).unwrap();
        let store = cache.store.clone();
        let clone = cache.clone();

        drop(cache);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(clone.sweeper_running());

        drop(clone);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Only this test still holds the store
        assert_eq!(Arc::strong_count(&store), 1);
    }

    #[test]
    fn test_resolve_root() {
        let explicit = CacheConfig {
            root: Some(PathBuf::from("/srv/cache")),
            ..CacheConfig::default()
        };
        assert_eq!(resolve_root(&explicit).unwrap(), PathBuf::from("/srv/cache"));

        if let Some(base) = default_cache_root() {
            let config = CacheConfig {
                path_component: "thumbs".to_string(),
                ..CacheConfig::default()
            };
            assert_eq!(resolve_root(&config).unwrap(), base.join("thumbs"));
        }
    }

    #[test]
    fn test_with_root_normalizes_config() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            default_lifetime: Duration::from_secs(500),
            max_lifetime: Duration::from_secs(100),
            ..test_config()
        };
        let cache = FileCache::with_root(dir.path(), config).unwrap();
        assert_eq!(cache.config().default_lifetime, Duration::from_secs(100));
    }
}
