//! File Cache - A persistent on-disk key-value cache
//!
//! Stores serializable values one file per entry, with per-entry lifetimes,
//! lazy expiry on read and a background expiry sweeper.

pub mod cache;
pub mod config;
pub mod error;
pub mod shared;
pub mod tasks;

pub use cache::{CacheEntry, Codec, FileCache, JsonCodec};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use shared::shared_cache;
pub use tasks::{spawn_sweeper, SweeperHandle};
