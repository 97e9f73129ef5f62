// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-memory resource store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ResourceStore, StoreError, StoreResult};

/// Process-local store with the same uniqueness guarantee as a durable one
///
/// Clones share the same records. `set_available(false)` makes every call fail
/// with [`StoreError::Unavailable`] until availability is restored.
#[derive(Debug, Clone)]
pub struct InMemoryStore<R> {
    records: Arc<RwLock<HashMap<String, R>>>,
    available: Arc<AtomicBool>,
    inserts: Arc<AtomicU64>,
}

impl<R> InMemoryStore<R> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            inserts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Toggle simulated availability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful inserts so far
    pub fn insert_count(&self) -> u64 {
        self.inserts.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".into()))
        }
    }
}

impl<R> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> ResourceStore<R> for InMemoryStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn find(&self, key: &str) -> StoreResult<Option<R>> {
        self.check_available()?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn insert(&self, key: &str, record: R) -> StoreResult<R> {
        self.check_available()?;
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return Err(StoreError::Duplicate {
                key: key.to_string(),
            });
        }

        records.insert(key.to_string(), record.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn list(&self) -> StoreResult<Vec<R>> {
        self.check_available()?;
        Ok(self.records.read().await.values().cloned().collect())
    }
}
