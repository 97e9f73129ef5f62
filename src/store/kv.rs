// Copyright (c) 2025 - Cowboy AI, Inc.
//! JetStream key/value resource store
//!
//! Each dependent service keeps its resources in its own bucket. Records are
//! stored as JSON. Inserts are conditional writes expecting revision `0`, so
//! the server only accepts them while the key has never been written. A
//! refused write is classified by reading the key back: a live value means
//! another writer got there first.
//!
//! Keys in a bucket are limited to `[-/_=.a-zA-Z0-9]`. Record keys made only of
//! those characters (minus `.`) are stored as `s.{key}`; anything else is
//! hex-encoded as `x.{hex}` so every distinct record key maps to a distinct
//! bucket key.

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Write;
use std::marker::PhantomData;
use tracing::info;

use super::{ResourceStore, StoreError, StoreResult};
use crate::errors::{InfrastructureError, InfrastructureResult};

/// Resource store on a JetStream key/value bucket
#[derive(Clone)]
pub struct KvStore<R> {
    bucket: kv::Store,
    name: String,
    _record: PhantomData<fn() -> R>,
}

impl<R> KvStore<R> {
    /// Open the bucket, creating it if needed
    pub async fn open(context: &jetstream::Context, bucket: &str) -> InfrastructureResult<Self> {
        let store = match context.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => context
                .create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    description: "Provisioned resources keyed by subject id".to_string(),
                    history: 1,
                    ..Default::default()
                })
                .await
                .map_err(|e| InfrastructureError::KeyValue(e.to_string()))?,
        };

        info!(bucket, "Key/value bucket ready");

        Ok(Self::from_store(store, bucket))
    }

    /// Wrap an already opened bucket
    pub fn from_store(bucket: kv::Store, name: impl Into<String>) -> Self {
        Self {
            bucket,
            name: name.into(),
            _record: PhantomData,
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.name
    }
}

/// Map a record key onto a valid bucket key
pub fn encode_key(key: &str) -> StoreResult<String> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey(key.to_string()));
    }

    let plain = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '='));

    if plain {
        return Ok(format!("s.{key}"));
    }

    let mut encoded = String::with_capacity(2 + key.len() * 2);
    encoded.push_str("x.");
    for byte in key.bytes() {
        let _ = write!(encoded, "{byte:02x}");
    }
    Ok(encoded)
}

#[async_trait]
impl<R> ResourceStore<R> for KvStore<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn find(&self, key: &str) -> StoreResult<Option<R>> {
        let entry = self
            .bucket
            .get(encode_key(key)?)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        entry
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn insert(&self, key: &str, record: R) -> StoreResult<R> {
        let bucket_key = encode_key(key)?;
        let payload =
            serde_json::to_vec(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;

        match self.bucket.update(&bucket_key, payload.into(), 0).await {
            Ok(_) => Ok(record),
            Err(e) => {
                let existing = self
                    .bucket
                    .get(&bucket_key)
                    .await
                    .map_err(|_| StoreError::Unavailable(e.to_string()))?;

                match existing {
                    Some(_) => Err(StoreError::Duplicate {
                        key: key.to_string(),
                    }),
                    None => Err(StoreError::Unavailable(e.to_string())),
                }
            }
        }
    }

    async fn list(&self) -> StoreResult<Vec<R>> {
        let keys: Vec<String> = self
            .bucket
            .keys()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let entry = self
                .bucket
                .get(&key)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            if let Some(bytes) = entry {
                records.push(
                    serde_json::from_slice(&bytes)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                );
            }
        }

        Ok(records)
    }
}
