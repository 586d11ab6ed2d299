//! Snapgate Core - perceptual-hash visual regression checks
//!
//! This crate decides whether a freshly captured screenshot is perceptually
//! equivalent to a stored baseline, and when it is not, records an auditable
//! change that a human approves before it stops blocking.
//!
//! # Features
//!
//! - Row-wise difference hashing tolerant of anti-aliasing and resampling noise
//! - Approval sets matching single approvals or the union of two
//! - Per-run change ledgers persisted as JSON documents
//! - Diff overlays and region masks for reviewable artifacts
//! - Pluggable blob storage behind a four-method port
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use snapgate_core::{FsBlobStore, Matcher, Outcome, SyncedOps};
//!
//! # async fn example() -> snapgate_core::Result<()> {
//! // One store handle and one lock per process
//! let ops = SyncedOps::new(Arc::new(FsBlobStore::new("/var/lib/snapgate")));
//! let matcher = Matcher::new(ops, "nightly-2026-10-16").with_approvals("approvals/web");
//!
//! let actual = image::open("checkout.png").unwrap();
//! match matcher.compare_image(actual).against("checkout").compare().await? {
//!     Outcome::NeedsApproval(change) => eprintln!("{}", change.report(matcher.ops().store())),
//!     outcome => println!("ok: {outcome:?}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Mutations of shared documents go through [`SyncedOps`], which serializes
//! them inside one process. Separate processes writing the same key still
//! race and the last push wins.

pub mod approval;
pub mod error;
pub mod hash;
pub mod imageops;
pub mod ledger;
pub mod matcher;
pub mod snapshot;
pub mod store;
pub mod sync;

// Re-export main types for convenience
pub use approval::{Approval, ApprovalMatch, ApprovalSet};
pub use error::{Result, SnapgateError};
pub use hash::{PerceptualHash, DEFAULT_HASH_BITS, DEFAULT_THRESHOLD};
pub use imageops::{Mask, MaskedView, Rect};
pub use ledger::{ChangeLedger, ChangeRecord};
pub use matcher::{compare_images, upload, Comparison, Matcher, Outcome};
pub use snapshot::SnapshotRecord;
pub use store::{BlobObject, BlobStore, FsBlobStore, MemoryBlobStore, Metadata};
pub use sync::{OnMissing, SyncedOps, Update};
