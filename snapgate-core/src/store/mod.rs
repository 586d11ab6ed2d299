//! Blob-store port.
//!
//! The core only needs four capabilities from storage: a metadata-only read
//! (`head`), a full read (`pull`), a full overwrite (`push`) and a locator
//! for humans (`resolve`). Missing keys surface as
//! [`SnapgateError::NotFound`], distinct from every other failure.
//!
//! ## Adapters
//!
//! - [`MemoryBlobStore`] - in-process map, for tests and embedding
//! - [`FsBlobStore`] - directory tree on local disk
//!
//! Object-storage clients implement [`BlobStore`] outside this crate; none of
//! their SDK types appear here.

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SnapgateError};

/// String metadata stored alongside a blob.
pub type Metadata = BTreeMap<String, String>;

/// A blob as returned by [`BlobStore::pull`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobObject {
    /// Object body; `None` for metadata-only reads.
    pub body: Option<Vec<u8>>,
    pub metadata: Metadata,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage capabilities the core depends on.
///
/// Implementations must be thread-safe (`Send + Sync`); one handle is shared
/// by every comparison in the process.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch only the metadata of `key`.
    async fn head(&self, key: &str) -> Result<Metadata>;

    /// Fetch `key`, including the body when `with_body` is set.
    async fn pull(&self, key: &str, with_body: bool) -> Result<BlobObject>;

    /// Replace `key` entirely.
    async fn push(&self, key: &str, body: Option<Vec<u8>>, metadata: Metadata) -> Result<()>;

    /// Human-followable locator for `key`. Does not check existence.
    fn resolve(&self, key: &str) -> String;
}

/// Pull a JSON document stored as the body of `key`.
///
/// An object without a body decodes as `T::default()`.
pub async fn pull_json<T>(store: &dyn BlobStore, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let object = store.pull(key, true).await?;
    match object.body {
        Some(body) if !body.is_empty() => serde_json::from_slice(&body).map_err(|e| {
            SnapgateError::Serialization(format!("can't unmarshal {key}: {e}"))
        }),
        _ => Ok(T::default()),
    }
}

/// Push `value` as the JSON body of `key`, with no metadata.
pub async fn push_json<T>(store: &dyn BlobStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(value)
        .map_err(|e| SnapgateError::Serialization(format!("can't marshal {key}: {e}")))?;
    store.push(key, Some(body), Metadata::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_roundtrip_through_store() {
        let store = MemoryBlobStore::new();
        push_json(&store, "doc", &vec![1, 2, 3]).await.unwrap();
        let value: Vec<u32> = pull_json(&store, "doc").await.unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_pull_json_missing_key_is_not_found() {
        let store = MemoryBlobStore::new();
        let err = pull_json::<Vec<u32>>(&store, "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pull_json_empty_body_is_default() {
        let store = MemoryBlobStore::new();
        store.push("empty", None, Metadata::new()).await.unwrap();
        let value: Vec<u32> = pull_json(&store, "empty").await.unwrap();
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn test_pull_json_rejects_garbage() {
        let store = MemoryBlobStore::new();
        store
            .push("bad", Some(b"{not json".to_vec()), Metadata::new())
            .await
            .unwrap();
        let err = pull_json::<Vec<u32>>(&store, "bad").await.unwrap_err();
        assert!(matches!(err, SnapgateError::Serialization(_)));
    }
}
