//! Directory-tree blob store.
//!
//! Each key maps to two files under the root: `<key>.blob` holds the body and
//! `<key>.meta.json` holds the metadata. An object exists when its metadata
//! file exists. Writes go through a temporary file and a rename.
//!
//! The metadata file is the commit point. It records whether the object has a
//! body and how long it is, and it is renamed into place after the body when
//! there is one, before the stale body is removed when there is not. A reader
//! racing a writer, or finding the leftovers of a crash between the two
//! renames, gets a storage error when the body length disagrees with the
//! committed metadata. A same-length body rewritten in that window is not
//! detected; cross-process writers are last-push-wins anyway.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{BlobObject, BlobStore, Metadata};
use crate::error::{Result, SnapgateError};

const BODY_SUFFIX: &str = "blob";
const META_SUFFIX: &str = "meta.json";

/// Contents of `<key>.meta.json`.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    body_len: Option<u64>,
    metadata: Metadata,
}

/// [`BlobStore`] backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str, suffix: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(SnapgateError::Storage(format!("invalid key: {key:?}")));
        }
        Ok(self.root.join(format!("{key}.{suffix}")))
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_sidecar(&self, key: &str) -> Result<(Sidecar, Option<DateTime<Utc>>)> {
        let path = self.object_path(key, META_SUFFIX)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SnapgateError::not_found(key))
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar: Sidecar = serde_json::from_slice(&raw)
            .map_err(|e| SnapgateError::Serialization(format!("corrupt metadata for {key}: {e}")))?;
        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Ok((sidecar, modified))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(level = "debug", skip(self))]
    async fn head(&self, key: &str) -> Result<Metadata> {
        Ok(self.read_sidecar(key).await?.0.metadata)
    }

    #[instrument(level = "debug", skip(self))]
    async fn pull(&self, key: &str, with_body: bool) -> Result<BlobObject> {
        let (sidecar, last_modified) = self.read_sidecar(key).await?;
        let torn =
            || SnapgateError::Storage(format!("body of {key} does not match its metadata"));
        let body = match sidecar.body_len {
            Some(len) if with_body => {
                let body = match tokio::fs::read(self.object_path(key, BODY_SUFFIX)?).await {
                    Ok(body) => body,
                    Err(e) if e.kind() == ErrorKind::NotFound => return Err(torn()),
                    Err(e) => return Err(e.into()),
                };
                if body.len() as u64 != len {
                    return Err(torn());
                }
                Some(body)
            }
            _ => None,
        };
        Ok(BlobObject {
            body,
            metadata: sidecar.metadata,
            last_modified,
        })
    }

    #[instrument(level = "debug", skip(self, body, metadata))]
    async fn push(&self, key: &str, body: Option<Vec<u8>>, metadata: Metadata) -> Result<()> {
        let body_path = self.object_path(key, BODY_SUFFIX)?;
        let meta_path = self.object_path(key, META_SUFFIX)?;

        let sidecar = Sidecar {
            body_len: body.as_ref().map(|b| b.len() as u64),
            metadata,
        };
        let meta = serde_json::to_vec_pretty(&sidecar)?;

        match body {
            Some(body) => {
                Self::write_atomic(&body_path, &body).await?;
                Self::write_atomic(&meta_path, &meta).await?;
            }
            None => {
                Self::write_atomic(&meta_path, &meta).await?;
                match tokio::fs::remove_file(&body_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        debug!(path = %body_path.display(), "Object written");
        Ok(())
    }

    fn resolve(&self, key: &str) -> String {
        format!(
            "file://{}",
            self.root.join(format!("{key}.{BODY_SUFFIX}")).display()
        )
    }
}
