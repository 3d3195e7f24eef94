mod client;
pub mod entry;
mod rebuild_pool;

pub use client::CacheClient;
pub use entry::CacheEntry;
pub use rebuild_pool::{RebuildJob, RebuildPool};
