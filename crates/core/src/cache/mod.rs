//! Persistent response cache and pending-action storage

pub mod memory;
pub mod persistent;
pub mod ports;

pub use memory::MemoryStore;
pub use persistent::{default_ttl, CacheEntry, CacheSizeSummary, PersistentCache};
pub use ports::KeyValueStore;
