//! Cache error types.

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from the external store. The cache itself never surfaces these to
/// callers; they are logged and the cache degrades to memory.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
