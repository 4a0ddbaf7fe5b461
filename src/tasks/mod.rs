//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is open.
//!
//! # Tasks
//! - Expiry Sweeper: Removes expired entries from the cache root at a fixed interval

mod sweeper;

pub use sweeper::{spawn_sweeper, SweeperHandle};
