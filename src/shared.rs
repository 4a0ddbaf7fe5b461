//! Shared Cache Module
//!
//! Process-wide cache instance for callers that don't want to manage one.

use once_cell::sync::OnceCell;

use crate::cache::FileCache;
use crate::config::CacheConfig;
use crate::error::Result;

static SHARED: OnceCell<FileCache> = OnceCell::new();

/// Returns the process-wide cache, opening it on first use.
///
/// The instance is configured from the environment (see
/// [`CacheConfig::from_env`]) and every later call returns the same one. A
/// failed open is not remembered, so the next call tries again. The
/// background sweeper only starts if the first call happens inside a tokio
/// runtime; otherwise call [`FileCache::start_sweeper`] from one.
pub fn shared_cache() -> Result<&'static FileCache> {
    open_once(&SHARED, CacheConfig::from_env)
}

fn open_once<F>(cell: &OnceCell<FileCache>, config: F) -> Result<&FileCache>
where
    F: FnOnce() -> CacheConfig,
{
    cell.get_or_try_init(|| FileCache::open(config()))
}
