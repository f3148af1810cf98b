//! Result cache for completed analyses.
//!
//! Entries are keyed by a [`Fingerprint`] of (content, config), expire after
//! a fixed TTL and are bounded in number. An optional [`KvStore`] (Redis)
//! acts as a second tier shared between processes.

pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use fingerprint::Fingerprint;
pub use memory::{CacheConfig, PutOutcome, ResultCache};
pub use store::{KvStore, RedisStore};
