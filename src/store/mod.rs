// Copyright (c) 2025 - Cowboy AI, Inc.
//! Dependent-service stores
//!
//! Provisioned resources live in a store that enforces one record per key.
//! The store, not the application, is what makes provisioning exactly-once:
//!
//! ```text
//! find(key) ──Some──> already provisioned         (fast path)
//!     │
//!    None
//!     │
//! insert(key) ──Ok──────────> created
//!     │
//!  Duplicate ──find(key)──> already provisioned   (lost a race)
//! ```
//!
//! A `find` followed by an `insert` is not atomic. Two callers can both miss on
//! `find`; exactly one of them wins `insert`, the other sees `Duplicate`.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod kv;
pub mod memory;

pub use kv::KvStore;
pub use memory::InMemoryStore;

/// Errors raised by a resource store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record already exists under this key
    #[error("Record already exists for key {key}")]
    Duplicate { key: String },

    /// Store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store call did not finish within the caller's deadline
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key cannot be stored
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    /// Whether the operation can succeed if attempted again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed store with an atomic create-if-absent primitive
#[async_trait]
pub trait ResourceStore<R>: Send + Sync
where
    R: Clone + Send + Sync + 'static,
{
    /// Look up a record
    async fn find(&self, key: &str) -> StoreResult<Option<R>>;

    /// Create a record; fails with [`StoreError::Duplicate`] if the key is taken
    async fn insert(&self, key: &str, record: R) -> StoreResult<R>;

    /// Every stored record
    async fn list(&self) -> StoreResult<Vec<R>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Unavailable("down".into()).is_retryable());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!StoreError::Duplicate { key: "p1".into() }.is_retryable());
        assert!(!StoreError::Serialization("bad".into()).is_retryable());
        assert!(!StoreError::InvalidKey("".into()).is_retryable());
    }
}
