//! In-memory blob store.
//!
//! Objects live in a `DashMap` for the lifetime of the store. Pushes are
//! counted so tests can assert that an operation performed no write.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{BlobObject, BlobStore, Metadata};
use crate::error::{Result, SnapgateError};

#[derive(Debug, Clone)]
struct StoredBlob {
    body: Option<Vec<u8>>,
    metadata: Metadata,
    last_modified: DateTime<Utc>,
}

/// In-memory [`BlobStore`].
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, StoredBlob>,
    pushes: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful pushes since creation.
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn head(&self, key: &str) -> Result<Metadata> {
        self.objects
            .get(key)
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| SnapgateError::not_found(key))
    }

    async fn pull(&self, key: &str, with_body: bool) -> Result<BlobObject> {
        let entry = self
            .objects
            .get(key)
            .ok_or_else(|| SnapgateError::not_found(key))?;
        Ok(BlobObject {
            body: if with_body { entry.body.clone() } else { None },
            metadata: entry.metadata.clone(),
            last_modified: Some(entry.last_modified),
        })
    }

    async fn push(&self, key: &str, body: Option<Vec<u8>>, metadata: Metadata) -> Result<()> {
        self.objects.insert(
            key.to_string(),
            StoredBlob {
                body,
                metadata,
                last_modified: Utc::now(),
            },
        );
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resolve(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("objects", &self.objects.len())
            .field("pushes", &self.push_count())
            .finish()
    }
}
