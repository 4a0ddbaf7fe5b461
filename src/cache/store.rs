//! Entry Store Module
//!
//! Reads and writes single entry files under a cache root. Writes go to a
//! temporary file that is renamed into place, so readers see either the old
//! entry or the new one in full.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::codec::Codec;
use crate::cache::entry::{current_timestamp_ms, CacheEntry, EntryHeader, HEADER_LEN};
use crate::cache::key::is_entry_file_name;
use crate::cache::CacheStats;
use crate::error::{CacheError, Result};

// == Temp Files ==
/// Prefix of in-flight temporary files
pub const TEMP_PREFIX: &str = ".fc-";

/// Suffix of in-flight temporary files
pub const TEMP_SUFFIX: &str = ".tmp";

/// Suffix of entries moved aside while being reclaimed
pub const TOMBSTONE_SUFFIX: &str = ".del";

/// Age after which a leftover temporary file is considered orphaned
pub const TEMP_FILE_GRACE: Duration = Duration::from_secs(15 * 60);

// == Raw Entry ==
/// A fresh entry as stored: parsed header plus the still-encoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub header: EntryHeader,
    pub payload: Vec<u8>,
}

// == Reclaim ==
/// Outcome of moving an entry aside and deciding whether to delete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// The entry still matched and was deleted
    Removed,
    /// A writer replaced the entry after it was inspected; it was put back
    Restored,
    /// Nothing was at the path
    Vanished,
}

// == Sweep Report ==
/// Outcome of one scan over the cache root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entry files inspected
    pub scanned: usize,
    /// Expired entries deleted
    pub removed: usize,
    /// Entries with unreadable headers deleted
    pub corrupt: usize,
    /// Abandoned temporary files deleted
    pub orphans_removed: usize,
    /// Entries that could not be inspected or deleted
    pub failures: usize,
}

// == Entry Store ==
/// File-per-entry storage rooted at one directory.
#[derive(Debug)]
pub struct EntryStore {
    root: PathBuf,
    max_lifetime: Duration,
    stats: Mutex<CacheStats>,
    scanning: AtomicBool,
}

impl EntryStore {
    // == Constructor ==
    /// Opens a store at `root`, creating the directory if needed.
    ///
    /// Every freshness decision caps stored lifetimes at `max_lifetime`, so
    /// entries written under a larger ceiling still expire on time here.
    pub fn open(root: impl Into<PathBuf>, max_lifetime: Duration) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CacheError::storage(&root, e))?;

        Ok(Self {
            root,
            max_lifetime,
            stats: Mutex::new(CacheStats::new()),
            scanning: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    /// Joins an entry file name onto the root.
    pub fn path_for(&self, segment: &str) -> PathBuf {
        self.root.join(segment)
    }

    // == Write ==
    /// Persists `payload` at `path` with a header built from `lifetime` and `now`.
    pub fn write(
        &self,
        path: &Path,
        payload: &[u8],
        lifetime: Duration,
        now: u64,
    ) -> Result<EntryHeader> {
        let header = EntryHeader::new(now, lifetime);
        write_atomic(path, &header, payload)?;
        self.stats.lock().record_write();
        Ok(header)
    }

    // == Read ==
    /// Returns the entry at `path` if it exists and is fresh at `now`.
    ///
    /// Expired entries and entries with unreadable headers are deleted and
    /// reported as absent. Read failures never surface as errors.
    pub fn read(&self, path: &Path, now: u64) -> Option<RawEntry> {
        let mut bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read cache entry {}: {}", path.display(), e);
                return None;
            }
        };

        let header = match EntryHeader::from_bytes(&bytes) {
            Ok(header) => header,
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", path.display(), e);
                match self.reclaim_corrupt(path) {
                    Ok(Reclaim::Removed) => self.stats.lock().record_corrupt(),
                    Ok(_) => {}
                    Err(e) => warn!("Failed to remove corrupt entry {}: {}", path.display(), e),
                }
                return None;
            }
        };

        if now >= header.expires_at_capped(self.max_lifetime) {
            match self.reclaim_expired(path, now) {
                Ok(Reclaim::Removed) => {
                    debug!("Removed expired cache entry {}", path.display());
                    self.stats.lock().record_expired_on_read();
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to remove expired entry {}: {}", path.display(), e),
            }
            return None;
        }

        bytes.drain(..HEADER_LEN);
        Some(RawEntry {
            header,
            payload: bytes,
        })
    }

    // == Discard ==
    /// Best-effort removal of an entry whose payload cannot be used.
    ///
    /// `seen` is the header read alongside the bad payload; if the file now
    /// carries a different header it was rewritten and is kept.
    pub fn discard(&self, path: &Path, seen: &EntryHeader) {
        let unchanged = |current: &Result<Option<EntryHeader>>| {
            matches!(current, Ok(Some(header)) if header == seen)
        };
        match self.reclaim_if(path, unchanged) {
            Ok(Reclaim::Removed) => self.stats.lock().record_corrupt(),
            Ok(_) => {}
            Err(e) => warn!("Failed to remove corrupt entry {}: {}", path.display(), e),
        }
    }

    // == Reclaim ==
    /// Deletes the entry at `path` only if it is still expired at `now`.
    pub fn reclaim_expired(&self, path: &Path, now: u64) -> io::Result<Reclaim> {
        let max_lifetime = self.max_lifetime;
        self.reclaim_if(path, |current| {
            matches!(current, Ok(Some(header)) if now >= header.expires_at_capped(max_lifetime))
        })
    }

    /// Deletes the entry at `path` only if its header is still unreadable.
    pub fn reclaim_corrupt(&self, path: &Path) -> io::Result<Reclaim> {
        self.reclaim_if(path, |current| matches!(current, Err(e) if e.is_decode()))
    }

    /// Moves the entry at `path` to a tombstone, then deletes it if
    /// `should_remove` accepts the moved file's header.
    ///
    /// Inspecting and deleting a path is two steps, so a `write` can land in
    /// between. The rename pins the exact file being judged: if it turns out
    /// to be a fresh write it is linked back, unless an even newer write
    /// already took the path.
    fn reclaim_if<F>(&self, path: &Path, should_remove: F) -> io::Result<Reclaim>
    where
        F: FnOnce(&Result<Option<EntryHeader>>) -> bool,
    {
        // Deleted when dropped
        let tombstone = match tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TOMBSTONE_SUFFIX)
            .tempfile_in(&self.root)
        {
            Ok(file) => file.into_temp_path(),
            // Root is gone, so the entry is too
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Reclaim::Vanished),
            Err(e) => return Err(e),
        };

        match fs::rename(path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Reclaim::Vanished),
            Err(e) => return Err(e),
        }

        if should_remove(&read_header_at(&tombstone)) {
            tombstone.close()?;
            return Ok(Reclaim::Removed);
        }

        match fs::hard_link(&tombstone, path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
        debug!("Kept rewritten cache entry {}", path.display());
        Ok(Reclaim::Restored)
    }

    // == Remove ==
    /// Deletes the entry at `path`. Returns whether a file was deleted;
    /// an absent entry is not an error.
    pub fn remove(&self, path: &Path) -> Result<bool> {
        remove_if_exists(path).map_err(|e| CacheError::storage(path, e))
    }

    // == Header Access ==
    /// Reads only the fixed-size header of the entry at `path`.
    pub fn read_header(&self, path: &Path) -> Result<Option<EntryHeader>> {
        read_header_at(path)
    }

    // == Is Expired ==
    /// Checks the entry at `path` against `now` without decoding its value.
    ///
    /// An absent entry is reported as not expired; there is nothing to reclaim.
    pub fn is_expired(&self, path: &Path, now: u64) -> Result<bool> {
        Ok(self
            .read_header(path)?
            .map(|header| now >= header.expires_at_capped(self.max_lifetime))
            .unwrap_or(false))
    }

    // == Entry Count ==
    /// Counts entry files under the root, fresh or not.
    pub fn entry_count(&self) -> Result<usize> {
        let entries = fs::read_dir(&self.root).map_err(|e| CacheError::storage(&self.root, e))?;
        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_str().is_some_and(is_entry_file_name))
            .count())
    }

    // == Sweep ==
    /// Deletes every expired or unreadable entry under the root.
    ///
    /// Returns `Ok(None)` without scanning when another sweep is already in
    /// progress. Errors on single entries are counted in the report and do
    /// not stop the scan; only failing to list the root is an error.
    pub fn sweep(&self, now: u64) -> Result<Option<SweepReport>> {
        let Some(_guard) = ScanGuard::try_begin(&self.scanning) else {
            debug!("Sweep already in progress, skipping");
            return Ok(None);
        };

        let mut report = SweepReport::default();
        let listing = match fs::read_dir(&self.root) {
            Ok(listing) => listing,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Some(report)),
            Err(e) => return Err(CacheError::storage(&self.root, e)),
        };

        for item in listing {
            let dir_entry = match item {
                Ok(dir_entry) => dir_entry,
                Err(e) => {
                    warn!("Failed to list entry in {}: {}", self.root.display(), e);
                    report.failures += 1;
                    continue;
                }
            };
            let file_name = dir_entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let path = dir_entry.path();

            if is_entry_file_name(name) {
                report.scanned += 1;
                self.sweep_entry(&path, now, &mut report);
            } else if is_temp_file_name(name) && is_orphaned(&path, now) {
                match remove_if_exists(&path) {
                    Ok(true) => report.orphans_removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to remove orphaned temp file {}: {}", path.display(), e);
                        report.failures += 1;
                    }
                }
            }
        }

        self.stats
            .lock()
            .record_sweep(report.removed, report.corrupt);
        Ok(Some(report))
    }

    fn sweep_entry(&self, path: &Path, now: u64, report: &mut SweepReport) {
        let corrupt = match read_header_at(path) {
            // Vanished since listing, already reclaimed elsewhere
            Ok(None) => return,
            Ok(Some(header)) => {
                if now < header.expires_at_capped(self.max_lifetime) {
                    return;
                }
                false
            }
            Err(e) if e.is_decode() => {
                warn!("Sweeping unreadable cache entry {}: {}", path.display(), e);
                true
            }
            Err(e) => {
                warn!("Failed to inspect cache entry {}: {}", path.display(), e);
                report.failures += 1;
                return;
            }
        };

        let reclaimed = if corrupt {
            self.reclaim_corrupt(path)
        } else {
            self.reclaim_expired(path, now)
        };

        match reclaimed {
            Ok(Reclaim::Removed) if corrupt => report.corrupt += 1,
            Ok(Reclaim::Removed) => {
                debug!("Swept expired cache entry {}", path.display());
                report.removed += 1;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to remove cache entry {}: {}", path.display(), e);
                report.failures += 1;
            }
        }
    }

    // == Stats ==
    /// Returns a snapshot of the store's counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    pub(crate) fn record_hit(&self) {
        self.stats.lock().record_hit();
    }

    pub(crate) fn record_miss(&self) {
        self.stats.lock().record_miss();
    }
}

// == Scan Guard ==
/// Holds the scan-in-progress flag for the duration of one sweep.
struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// == Path Utilities ==
/// Reads a complete entry file, bypassing key mapping and expiry policy.
///
/// Returns `Ok(None)` when no file exists. Unlike cache lookups, every other
/// failure is reported: unreadable files as `Storage`, bad contents as
/// `Decode`. The entry is returned even if it has expired.
pub fn read_entry_file<V, C>(codec: &C, path: &Path) -> Result<Option<CacheEntry<V>>>
where
    V: DeserializeOwned,
    C: Codec,
{
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::storage(path, e)),
    };

    let header = EntryHeader::from_bytes(&bytes)?;
    let value = codec.decode(&bytes[HEADER_LEN..])?;
    Ok(Some(CacheEntry::from_header(header, value)))
}

/// Atomically writes `value` to `path` in the entry file format, creating
/// missing parent directories. `lifetime` is stored as given.
pub fn write_entry_file<V, C>(
    codec: &C,
    path: &Path,
    value: &V,
    lifetime: Duration,
) -> Result<()>
where
    V: Serialize + ?Sized,
    C: Codec,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CacheError::storage(parent, e))?;
    }

    let payload = codec.encode(value)?;
    let header = EntryHeader::new(current_timestamp_ms(), lifetime);
    write_atomic(path, &header, &payload)
}

/// Writes header and payload to a temp file beside `path`, syncs it and
/// renames it over `path`.
fn write_atomic(path: &Path, header: &EntryHeader, payload: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| CacheError::storage(dir, e))?;

    // Dropping a failed temp file deletes it
    if let Err(e) = write_contents(temp.as_file_mut(), header, payload) {
        return Err(CacheError::storage(temp.path(), e));
    }

    temp.persist(path)
        .map_err(|e| CacheError::storage(path, e.error))?;
    Ok(())
}

fn write_contents(file: &mut File, header: &EntryHeader, payload: &[u8]) -> io::Result<()> {
    file.write_all(&header.to_bytes())?;
    file.write_all(payload)?;
    file.sync_all()
}

fn read_header_at(path: &Path) -> Result<Option<EntryHeader>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::storage(path, e)),
    };

    let mut bytes = [0u8; HEADER_LEN];
    match file.read_exact(&mut bytes) {
        Ok(()) => EntryHeader::from_bytes(&bytes).map(Some),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(CacheError::Decode(format!(
            "truncated header in {}",
            path.display()
        ))),
        Err(e) => Err(CacheError::storage(path, e)),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_temp_file_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
        && (name.ends_with(TEMP_SUFFIX) || name.ends_with(TOMBSTONE_SUFFIX))
}

/// True if the temp file at `path` was last modified at least
/// [`TEMP_FILE_GRACE`] before `now`.
fn is_orphaned(path: &Path, now: u64) -> bool {
    let modified_ms = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

    match modified_ms {
        Some(modified_ms) => {
            now.saturating_sub(modified_ms) >= TEMP_FILE_GRACE.as_millis() as u64
        }
        None => false,
    }
}
