pub mod entry;
pub mod sharded;

pub use entry::{CacheEntry, CacheStats};
pub use sharded::ResponseCache;
