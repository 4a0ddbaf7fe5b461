//! Cache Module
//!
//! Persistent file-per-entry caching with lifetime-based expiration.

mod codec;
mod engine;
mod entry;
mod key;
mod stats;
pub mod store;


// Re-export public types
pub use codec::{Codec, JsonCodec};
pub use engine::{default_cache_root, resolve_root, FileCache};
pub use entry::{current_timestamp_ms, lifetime_from_secs, CacheEntry, EntryHeader, HEADER_LEN};
pub use key::{is_entry_file_name, key_segment, ENTRY_EXTENSION};
pub use stats::CacheStats;
pub use store::{read_entry_file, write_entry_file, EntryStore, RawEntry, Reclaim, SweepReport};
