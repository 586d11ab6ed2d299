//! The comparison engine.
//!
//! A [`Matcher`] is an immutable comparison configuration: the shared
//! [`SyncedOps`] handle, the run the changes are recorded under, and the
//! hashing and approval policy. Each builder call returns a new value. A
//! [`Comparison`] binds one candidate image to a baseline and runs the
//! state machine:
//!
//! ```text
//! validate -> resolve baseline -> publish                   => Published
//!                              -> hash -> within threshold  => Equal
//!                                      -> update mode       => Published
//!                                      -> approved          => Approved
//!                                      -> record change     => NeedsApproval
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use snapgate_core::{Matcher, MemoryBlobStore, SyncedOps};
//!
//! # async fn run() -> snapgate_core::Result<()> {
//! let ops = SyncedOps::new(Arc::new(MemoryBlobStore::new()));
//! let matcher = Matcher::new(ops, "run-42").with_prefix(["chrome", "desktop"]);
//!
//! let screenshot = image::open("home.png").unwrap();
//! let outcome = matcher.compare_image(screenshot).against("home").compare().await?;
//! assert!(outcome.is_pass());
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use image::DynamicImage;
use tracing::{debug, info, instrument, warn};

use crate::approval::{ApprovalMatch, ApprovalSet, DEFAULT_CAPACITY};
use crate::error::{Result, SnapgateError};
use crate::hash::{PerceptualHash, DEFAULT_HASH_BITS, DEFAULT_THRESHOLD};
use crate::imageops::{apply_masks, crop_to_baseline_size, diff_overlay, Mask};
use crate::ledger::ChangeRecord;
use crate::snapshot::SnapshotRecord;
use crate::store::{BlobStore, Metadata};
use crate::sync::SyncedOps;

/// Result of a comparison that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Within threshold of the baseline.
    Equal,
    /// A baseline was created or replaced.
    Published { key: String, locator: String },
    /// The difference is explained by existing approvals.
    Approved(ApprovalMatch),
    /// The difference was recorded and waits for a reviewer.
    NeedsApproval(Box<ChangeRecord>),
}

impl Outcome {
    /// True for every outcome except [`Outcome::NeedsApproval`].
    pub fn is_pass(&self) -> bool {
        !matches!(self, Self::NeedsApproval(_))
    }
}

/// Immutable comparison configuration.
#[derive(Debug, Clone)]
pub struct Matcher {
    ops: SyncedOps,
    run_id: String,
    approvals_enabled: bool,
    approvals_key: Option<String>,
    update: bool,
    force_update: bool,
    normalize: bool,
    threshold: u32,
    hash_bits: u32,
    approval_capacity: usize,
    exclude_expired_approvals: bool,
    version: Option<String>,
    metadata: Metadata,
    prefix: Vec<String>,
}

impl Matcher {
    /// Matcher with default policy recording changes under `run_id`.
    pub fn new(ops: SyncedOps, run_id: impl Into<String>) -> Self {
        Self {
            ops,
            run_id: run_id.into(),
            approvals_enabled: false,
            approvals_key: None,
            update: false,
            force_update: false,
            normalize: false,
            threshold: DEFAULT_THRESHOLD,
            hash_bits: DEFAULT_HASH_BITS,
            approval_capacity: DEFAULT_CAPACITY,
            exclude_expired_approvals: false,
            version: None,
            metadata: Metadata::new(),
            prefix: Vec::new(),
        }
    }

    /// Defaults overridden by `SNAPGATE_*` environment variables.
    pub fn from_env(ops: SyncedOps, run_id: impl Into<String>) -> Self {
        let mut matcher = Self::new(ops, run_id);

        if let Some(threshold) = std::env::var("SNAPGATE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            matcher.threshold = threshold;
        }
        if let Some(bits) = std::env::var("SNAPGATE_HASH_BITS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            matcher.hash_bits = bits;
        }
        if let Some(key) = std::env::var("SNAPGATE_APPROVALS_KEY")
            .ok()
            .filter(|k| !k.is_empty())
        {
            matcher = matcher.with_approvals(key);
        }
        matcher.update = env_flag("SNAPGATE_UPDATE");
        matcher.force_update = env_flag("SNAPGATE_FORCE_UPDATE");
        matcher.normalize = env_flag("SNAPGATE_NORMALIZE");
        if let Ok(prefix) = std::env::var("SNAPGATE_PREFIX") {
            matcher = matcher.with_prefix(prefix.split('/'));
        }
        matcher
    }

    /// Enable approval lookup against the set stored under `key`.
    pub fn with_approvals(mut self, key: impl Into<String>) -> Self {
        self.approvals_enabled = true;
        self.approvals_key = Some(key.into());
        self
    }

    pub fn with_approvals_enabled(mut self, enabled: bool) -> Self {
        self.approvals_enabled = enabled;
        self
    }

    /// Replace the baseline whenever the candidate differs.
    pub fn with_update(mut self, enabled: bool) -> Self {
        self.update = enabled;
        self
    }

    /// Replace the baseline without comparing.
    pub fn with_force_update(mut self, enabled: bool) -> Self {
        self.force_update = enabled;
        self
    }

    /// Crop candidates to the baseline's recorded size before hashing.
    pub fn with_normalize(mut self, enabled: bool) -> Self {
        self.normalize = enabled;
        self
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_hash_bits(mut self, bits: u32) -> Self {
        self.hash_bits = bits;
        self
    }

    pub fn with_approval_capacity(mut self, capacity: usize) -> Self {
        self.approval_capacity = capacity;
        self
    }

    /// Ignore approvals older than their validity window.
    pub fn with_exclude_expired_approvals(mut self, enabled: bool) -> Self {
        self.exclude_expired_approvals = enabled;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Attach `key = value` to every snapshot and change this matcher writes.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    /// Append path segments used to namespace baselines and artifacts.
    pub fn with_prefix<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix.extend(
            segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty()),
        );
        self
    }

    pub fn ops(&self) -> &SyncedOps {
        &self.ops
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn hash_bits(&self) -> u32 {
        self.hash_bits
    }

    pub fn approvals_key(&self) -> Option<&str> {
        self.approvals_key.as_deref()
    }

    /// Fresh artifact key under the configured prefix.
    pub fn generate_key(&self) -> String {
        self.prefixed(&uuid::Uuid::new_v4().to_string())
    }

    /// Full baseline key for a caller-supplied name.
    pub fn baseline_key(&self, name: &str) -> String {
        self.prefixed(name)
    }

    fn prefixed(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix.join("/"), name)
        }
    }

    /// Start a comparison of `image` against a baseline chosen next.
    pub fn compare_image(&self, image: DynamicImage) -> Comparison<'_> {
        Comparison::new(self).target(image)
    }

    async fn publish(
        &self,
        key: &str,
        image: &DynamicImage,
        metadata: &Metadata,
    ) -> Result<Outcome> {
        let hash = PerceptualHash::derive(image, self.hash_bits);
        self.push_snapshot(key, hash, image, metadata)
            .await
            .map_err(|e| e.context("can't publish baseline"))?;
        let locator = self.ops.store().resolve(key);
        info!(key = %key, locator = %locator, "Baseline published");
        Ok(Outcome::Published {
            key: key.to_string(),
            locator,
        })
    }

    async fn push_snapshot(
        &self,
        key: &str,
        hash: PerceptualHash,
        image: &DynamicImage,
        metadata: &Metadata,
    ) -> Result<()> {
        SnapshotRecord::new(hash, image.clone())
            .with_metadata(metadata.clone())
            .with_version(self.version.clone())
            .push(self.ops.store(), key)
            .await
            .map_err(|e| e.context("can't upload snapshot image"))
    }

    /// Search the configured approval set plus any approvals packed into the baseline.
    async fn find_approval(
        &self,
        difference: &PerceptualHash,
        baseline: &SnapshotRecord,
    ) -> Result<Option<ApprovalMatch>> {
        let Some(key) = self.approvals_key.as_deref() else {
            return Ok(None);
        };
        let pulled = ApprovalSet::pull(self.ops.store(), key, self.approval_capacity).await;
        let mut entries = match pulled {
            Ok(set) => set.into_entries(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.context("can't pull approvals")),
        };
        if let Some(embedded) = baseline
            .embedded_approvals()
            .map_err(|e| e.context("can't unpack baseline approvals"))?
        {
            entries.extend(embedded);
        }

        let approvals = ApprovalSet::with_entries(entries, self.approval_capacity);
        Ok(if self.exclude_expired_approvals {
            approvals.find_valid_match(difference, self.threshold, Utc::now())
        } else {
            approvals.find_match(difference, self.threshold)
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
enum Baseline {
    Key(String),
    Image(DynamicImage),
}

/// One candidate image bound to a baseline.
#[derive(Debug, Clone)]
pub struct Comparison<'m> {
    matcher: &'m Matcher,
    target: Option<DynamicImage>,
    masks: Vec<Mask>,
    baseline: Option<Baseline>,
    metadata: Metadata,
}

impl<'m> Comparison<'m> {
    /// An empty comparison; [`target`](Self::target) and a baseline are required.
    pub fn new(matcher: &'m Matcher) -> Self {
        Self {
            matcher,
            target: None,
            masks: Vec::new(),
            baseline: None,
            metadata: matcher.metadata.clone(),
        }
    }

    pub fn target(mut self, image: DynamicImage) -> Self {
        self.target = Some(image);
        self
    }

    /// Hide a region of both images before hashing and diffing. Masks stack.
    pub fn mask(mut self, mask: Mask) -> Self {
        self.masks.push(mask);
        self
    }

    /// Compare against the stored baseline `name` (prefixed by the matcher).
    pub fn against(mut self, name: impl Into<String>) -> Self {
        self.baseline = Some(Baseline::Key(name.into()));
        self
    }

    /// Compare against an in-memory baseline image.
    pub fn against_image(mut self, image: DynamicImage) -> Self {
        self.baseline = Some(Baseline::Image(image));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.target.is_none() {
            return Err(SnapgateError::Config("no target (actual) image set".into()));
        }
        if self.baseline.is_none() {
            return Err(SnapgateError::Config(
                "expected baseline key (or image) is required".into(),
            ));
        }
        if matches!(&self.baseline, Some(Baseline::Key(k)) if k.is_empty()) {
            return Err(SnapgateError::Config("baseline key is empty".into()));
        }
        let has_approvals_key =
            matches!(self.matcher.approvals_key.as_deref(), Some(k) if !k.is_empty());
        if self.matcher.approvals_enabled && !has_approvals_key {
            return Err(SnapgateError::Config(
                "approvals enabled but no approvals key configured".into(),
            ));
        }
        if self.matcher.run_id.is_empty() {
            return Err(SnapgateError::Config("run id is required".into()));
        }
        Ok(())
    }

    /// Run the comparison.
    ///
    /// Storage failures are returned as errors. When a change was assembled
    /// but could not be stored, the error carries it (see
    /// [`SnapgateError::change`]).
    #[instrument(level = "debug", skip(self), fields(run_id = %self.matcher.run_id))]
    pub async fn compare(self) -> Result<Outcome> {
        self.validate()?;
        let Comparison {
            matcher,
            target,
            masks,
            baseline,
            metadata,
        } = self;
        let (Some(target), Some(baseline)) = (target, baseline) else {
            return Err(SnapgateError::Config("comparison is incomplete".into()));
        };
        let target = apply_masks(&target, &masks);
        let store = matcher.ops.store();

        let (baseline_key, baseline) = match baseline {
            Baseline::Key(name) => {
                let key = matcher.baseline_key(&name);
                let head = SnapshotRecord::head(store, &key).await;
                let missing = matches!(&head, Err(e) if e.is_not_found());
                if missing || matcher.force_update {
                    debug!(key = %key, missing, "Publishing baseline");
                    return matcher.publish(&key, &target, &metadata).await;
                }
                let record = head.map_err(|e| e.context("can't pull baseline"))?;
                (Some(key), record)
            }
            Baseline::Image(image) => {
                let image = apply_masks(&image, &masks);
                let hash = PerceptualHash::derive(&image, matcher.hash_bits);
                (None, SnapshotRecord::new(hash, image))
            }
        };

        let target_hash = if matcher.normalize {
            let (width, height) = baseline.size();
            PerceptualHash::derive(
                &crop_to_baseline_size(&target, width, height),
                matcher.hash_bits,
            )
        } else {
            PerceptualHash::derive(&target, matcher.hash_bits)
        };

        let (difference, equal) = baseline.hash.difference(&target_hash, matcher.threshold);
        debug!(
            distance = difference.count_ones(),
            threshold = matcher.threshold,
            "Hashes compared"
        );
        if equal {
            return Ok(Outcome::Equal);
        }

        if let (true, Some(key)) = (matcher.update, baseline_key.as_deref()) {
            return matcher.publish(key, &target, &metadata).await;
        }

        if matcher.approvals_enabled {
            if let Some(found) = matcher.find_approval(&difference, &baseline).await? {
                info!(approvers = ?found.approvers(), "Difference already approved");
                return Ok(Outcome::Approved(found));
            }
        }

        record_change(
            matcher,
            baseline_key,
            baseline,
            target,
            target_hash,
            difference,
            metadata,
        )
        .await
    }
}

/// Upload the candidate and overlay, then record the change in the run ledger.
async fn record_change(
    matcher: &Matcher,
    baseline_key: Option<String>,
    mut baseline: SnapshotRecord,
    target: DynamicImage,
    target_hash: PerceptualHash,
    difference: PerceptualHash,
    metadata: Metadata,
) -> Result<Outcome> {
    let store = matcher.ops.store();
    let stored_baseline = baseline_key.is_some();
    let change = ChangeRecord {
        ts: 0,
        key: baseline_key.unwrap_or_else(|| matcher.generate_key()),
        difference_hash: difference.clone(),
        target_hash: target_hash.clone(),
        target: matcher.generate_key(),
        overlay: matcher.generate_key(),
        data: metadata.clone(),
        group: matcher.run_id.clone(),
        version: matcher.version.clone(),
    };
    warn!(key = %change.key, score = change.score(), "Difference needs approval");

    let uploads = async {
        matcher
            .push_snapshot(&change.target, target_hash, &target, &metadata)
            .await?;
        if stored_baseline {
            baseline = SnapshotRecord::pull(store, &change.key)
                .await
                .map_err(|e| e.context("can't pull baseline"))?;
        } else {
            let image = baseline
                .image
                .clone()
                .unwrap_or_else(|| DynamicImage::new_rgba8(0, 0));
            matcher
                .push_snapshot(&change.key, baseline.hash.clone(), &image, &metadata)
                .await?;
        }
        let expected = baseline
            .image
            .clone()
            .unwrap_or_else(|| DynamicImage::new_rgba8(0, 0));
        let overlay = DynamicImage::ImageRgba8(diff_overlay(&expected, &target));
        matcher
            .push_snapshot(&change.overlay, difference, &overlay, &metadata)
            .await
    };
    if let Err(source) = uploads.await {
        return Err(SnapgateError::ChangeNotRecorded {
            change: Box::new(change),
            source: Box::new(source),
        });
    }

    match matcher.ops.upsert_change(&matcher.run_id, change.clone()).await {
        Ok(stored) => Ok(Outcome::NeedsApproval(Box::new(stored))),
        Err(source) => Err(SnapgateError::Sync {
            change: Box::new(change),
            source: Box::new(source),
        }),
    }
}

async fn push_random(
    store: &dyn BlobStore,
    hash: PerceptualHash,
    image: &DynamicImage,
) -> Result<String> {
    let key = uuid::Uuid::new_v4().to_string();
    SnapshotRecord::new(hash, image.clone())
        .push(store, &key)
        .await?;
    Ok(key)
}

/// Push `image` under a random key and return its locator.
pub async fn upload(store: &dyn BlobStore, image: &DynamicImage) -> Result<String> {
    let key = push_random(store, PerceptualHash::absent(), image).await?;
    Ok(store.resolve(&key))
}

/// One-shot comparison with default settings and no ledger.
///
/// Returns `None` when the images are equal. Otherwise uploads the expected
/// image, the actual image and the overlay under random keys and returns the
/// change describing them.
#[instrument(level = "debug", skip_all)]
pub async fn compare_images(
    store: &dyn BlobStore,
    expected: &DynamicImage,
    actual: &DynamicImage,
) -> Result<Option<ChangeRecord>> {
    let expected_hash = PerceptualHash::derive(expected, DEFAULT_HASH_BITS);
    let actual_hash = PerceptualHash::derive(actual, DEFAULT_HASH_BITS);
    let (difference, equal) = expected_hash.difference(&actual_hash, DEFAULT_THRESHOLD);
    if equal {
        return Ok(None);
    }

    let overlay = DynamicImage::ImageRgba8(diff_overlay(expected, actual));
    let key = push_random(store, expected_hash, expected).await?;
    let target = push_random(store, actual_hash.clone(), actual).await?;
    let overlay = push_random(store, difference.clone(), &overlay).await?;

    Ok(Some(ChangeRecord {
        key,
        difference_hash: difference,
        target_hash: actual_hash,
        target,
        overlay,
        ..ChangeRecord::default()
    }))
}
