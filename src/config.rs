//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Default lifetime applied when a caller does not supply one (1 hour)
pub const DEFAULT_LIFETIME_SECS: u64 = 3600;

/// Hard ceiling for every entry lifetime (7 days)
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 7 * 24 * 3600;

/// Period of the background sweep (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: i64 = 300;

/// Directory name appended to the platform cache location
pub const DEFAULT_PATH_COMPONENT: &str = "file_cache";

/// Cache configuration parameters.
///
/// Fixed once a cache is constructed. All values can be configured via
/// environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory name appended to the platform cache location
    pub path_component: String,
    /// Explicit cache root, overrides `path_component` when set
    pub root: Option<PathBuf>,
    /// Lifetime for entries written without an explicit lifetime
    pub default_lifetime: Duration,
    /// Upper bound every effective lifetime is clamped to
    pub max_lifetime: Duration,
    /// Background sweep period, `Duration::ZERO` disables the sweeper
    pub sweep_interval: Duration,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `FILE_CACHE_PATH_COMPONENT` - Directory under the platform cache dir (default: file_cache)
    /// - `FILE_CACHE_ROOT` - Explicit cache root (default: unset)
    /// - `FILE_CACHE_DEFAULT_LIFETIME` - Default lifetime in seconds (default: 3600)
    /// - `FILE_CACHE_MAX_LIFETIME` - Maximum lifetime in seconds (default: 604800)
    /// - `FILE_CACHE_SWEEP_INTERVAL` - Sweep period in seconds, <= 0 disables (default: 300)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let path_component = lookup("FILE_CACHE_PATH_COMPONENT")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.path_component);
        let root = lookup("FILE_CACHE_ROOT")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let default_lifetime = lookup("FILE_CACHE_DEFAULT_LIFETIME")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_lifetime);
        let max_lifetime = lookup("FILE_CACHE_MAX_LIFETIME")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_lifetime);
        let sweep_interval = lookup("FILE_CACHE_SWEEP_INTERVAL")
            .and_then(|v| v.parse::<i64>().ok())
            .map(|secs| Duration::from_secs(secs.max(0) as u64))
            .unwrap_or(defaults.sweep_interval);

        Self {
            path_component,
            root,
            default_lifetime,
            max_lifetime,
            sweep_interval,
        }
        .normalized()
    }

    /// Returns the config with `default_lifetime` clamped to `max_lifetime`.
    pub fn normalized(mut self) -> Self {
        if self.default_lifetime > self.max_lifetime {
            warn!(
                "default lifetime {:?} exceeds max lifetime {:?}, clamping",
                self.default_lifetime, self.max_lifetime
            );
            self.default_lifetime = self.max_lifetime;
        }
        self
    }

    /// Returns true when the background sweeper should run.
    pub fn sweeper_enabled(&self) -> bool {
        !self.sweep_interval.is_zero()
    }

    /// Clamps a requested lifetime into `[0, max_lifetime]`, falling back to
    /// the default lifetime when none is requested.
    pub fn effective_lifetime(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_lifetime)
            .min(self.max_lifetime)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path_component: DEFAULT_PATH_COMPONENT.to_string(),
            root: None,
            default_lifetime: Duration::from_secs(DEFAULT_LIFETIME_SECS),
            max_lifetime: Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS as u64),
        }
    }
}
