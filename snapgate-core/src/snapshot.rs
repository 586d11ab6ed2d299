//! Snapshot records: an image, its hash and string metadata in one blob.
//!
//! The image travels as the PNG body; the hash and the original dimensions
//! travel as metadata so that a `head` read is enough to compare hashes or to
//! crop a candidate to the baseline footprint.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use image::{DynamicImage, GenericImageView};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::approval::Approval;
use crate::error::{Result, SnapgateError};
use crate::hash::PerceptualHash;
use crate::imageops::{decode_png, encode_png};
use crate::store::{BlobObject, BlobStore, Metadata};

/// Metadata field holding the base-62 hash.
pub const HASH_FIELD: &str = "Hash";
/// Metadata field holding the recorded image width.
pub const WIDTH_FIELD: &str = "X";
/// Metadata field holding the recorded image height.
pub const HEIGHT_FIELD: &str = "Y";
/// Metadata field holding the optional baseline version.
pub const VERSION_FIELD: &str = "Version";
/// Metadata field holding a packed approval list.
pub const APPROVALS_FIELD: &str = "Approvals";
/// Metadata field stamped by [`crate::SyncedOps::copy_snapshot`].
pub const AUTHOR_FIELD: &str = "author";

#[derive(Debug, Clone, Default)]
pub struct SnapshotRecord {
    pub hash: PerceptualHash,
    /// Pixel data; `None` after a head read.
    pub image: Option<DynamicImage>,
    pub metadata: Metadata,
    pub last_modified: Option<DateTime<Utc>>,
    pub version: Option<String>,
}

impl SnapshotRecord {
    pub fn new(hash: PerceptualHash, image: DynamicImage) -> Self {
        Self {
            hash,
            image: Some(image),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    /// Recorded dimensions, falling back to the image, then to `(0, 0)`.
    pub fn size(&self) -> (u32, u32) {
        let recorded = self
            .metadata
            .get(WIDTH_FIELD)
            .zip(self.metadata.get(HEIGHT_FIELD))
            .map(|(x, y)| (x.parse().unwrap_or(0), y.parse().unwrap_or(0)));
        match (recorded, &self.image) {
            (Some(size), _) => size,
            (None, Some(image)) => image.dimensions(),
            (None, None) => (0, 0),
        }
    }

    /// Fetch hash and metadata only.
    pub async fn head(store: &dyn BlobStore, key: &str) -> Result<Self> {
        let metadata = store
            .head(key)
            .await
            .map_err(|e| e.context("can't pull snapshot"))?;
        Self::decode(BlobObject {
            body: None,
            metadata,
            last_modified: None,
        })
    }

    /// Fetch the full snapshot, including pixels.
    pub async fn pull(store: &dyn BlobStore, key: &str) -> Result<Self> {
        let object = store
            .pull(key, true)
            .await
            .map_err(|e| e.context("can't pull snapshot"))?;
        Self::decode(object)
    }

    /// Overwrite `key` with this snapshot.
    pub async fn push(&self, store: &dyn BlobStore, key: &str) -> Result<()> {
        let (body, metadata) = self.encode()?;
        store
            .push(key, body, metadata)
            .await
            .map_err(|e| e.context("can't push snapshot"))
    }

    fn decode(object: BlobObject) -> Result<Self> {
        let hash = match object.metadata.get(HASH_FIELD) {
            Some(text) => text
                .parse::<PerceptualHash>()
                .map_err(|e: SnapgateError| e.context("can't decode snapshot hash"))?,
            None => PerceptualHash::absent(),
        };
        let image = match object.body {
            Some(body) if !body.is_empty() => Some(
                decode_png(&body).map_err(|e| e.context("can't decode snapshot png"))?,
            ),
            _ => None,
        };
        Ok(Self {
            hash,
            image,
            version: object.metadata.get(VERSION_FIELD).cloned(),
            metadata: object.metadata,
            last_modified: object.last_modified,
        })
    }

    fn encode(&self) -> Result<(Option<Vec<u8>>, Metadata)> {
        let mut metadata = self.metadata.clone();
        let body = match &self.image {
            Some(image) => {
                let body = encode_png(image).map_err(|e| e.context("can't encode snapshot png"))?;
                let (x, y) = image.dimensions();
                metadata.insert(WIDTH_FIELD.to_string(), x.to_string());
                metadata.insert(HEIGHT_FIELD.to_string(), y.to_string());
                Some(body)
            }
            None => None,
        };
        if self.hash.is_absent() {
            metadata.remove(HASH_FIELD);
        } else {
            metadata.insert(HASH_FIELD.to_string(), self.hash.to_string());
        }
        if let Some(version) = &self.version {
            metadata.insert(VERSION_FIELD.to_string(), version.clone());
        }
        Ok((body, metadata))
    }

    /// Approvals packed into this snapshot's metadata, if any.
    pub fn embedded_approvals(&self) -> Result<Option<Vec<Approval>>> {
        self.metadata
            .get(APPROVALS_FIELD)
            .map(|packed| unpack(packed))
            .transpose()
    }

    pub fn set_embedded_approvals(&mut self, approvals: &[Approval]) -> Result<()> {
        self.metadata
            .insert(APPROVALS_FIELD.to_string(), pack(approvals)?);
        Ok(())
    }
}

/// JSON, then gzip, then base64: fits a list into one metadata string.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}

pub fn unpack<T: DeserializeOwned>(packed: &str) -> Result<T> {
    let compressed = BASE64
        .decode(packed)
        .map_err(|e| SnapgateError::Serialization(format!("invalid base64: {e}")))?;
    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| SnapgateError::Serialization(format!("invalid gzip: {e}")))?;
    Ok(serde_json::from_slice(&json)?)
}
