//! Read-modify-write over blob storage, serialized within the process.
//!
//! Every mutation of a shared keyed document (approval sets, change ledgers,
//! baseline copies) pulls the whole document, changes it, and pushes it back.
//! [`SyncedOps`] runs each such call inside one process-wide critical
//! section, so two tasks of the same process never interleave a pull/push
//! pair.
//!
//! This is not a distributed lock. Two processes mutating the same key can
//! still race, and the last push wins. Call sites go through
//! [`SyncedOps::transact`], so a backend offering conditional writes can
//! replace the mutex without touching them.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::approval::{Approval, ApprovalSet};
use crate::error::Result;
use crate::hash::PerceptualHash;
use crate::ledger::{ChangeLedger, ChangeRecord};
use crate::snapshot::{SnapshotRecord, AUTHOR_FIELD};
use crate::store::{pull_json, push_json, BlobStore};

/// How a transaction treats a key that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
    /// Start from `T::default()`.
    Empty,
    /// Fail with the not-found error.
    Fail,
}

/// Result of a transaction body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update<T> {
    Write(T),
    Keep,
}

/// Shared store handle plus the process-wide mutation lock.
///
/// Clones share both; create one at startup and hand clones to every matcher.
#[derive(Clone)]
pub struct SyncedOps {
    store: Arc<dyn BlobStore>,
    lock: Arc<Mutex<()>>,
}

impl SyncedOps {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    /// Run `op` inside the critical section.
    pub async fn sync<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.lock.lock().await;
        op().await
    }

    /// Transactional update of the JSON document at `key`.
    ///
    /// `f` receives the current value and returns the next one (or
    /// [`Update::Keep`] to skip the push). Returns whether a push happened.
    pub async fn transact<T, F>(&self, key: &str, on_missing: OnMissing, f: F) -> Result<bool>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(T) -> Update<T>,
    {
        let _guard = self.lock.lock().await;
        let current = match pull_json::<T>(self.store(), key).await {
            Ok(value) => value,
            Err(e) if e.is_not_found() && on_missing == OnMissing::Empty => T::default(),
            Err(e) => return Err(e),
        };
        match f(current) {
            Update::Write(next) => {
                push_json(self.store(), key, &next).await?;
                Ok(true)
            }
            Update::Keep => Ok(false),
        }
    }

    /// Accept `hash` into the approval set at `key`, creating it if needed.
    #[instrument(level = "debug", skip(self, hash), fields(hash = %hash))]
    pub async fn accept(
        &self,
        key: &str,
        hash: PerceptualHash,
        approver: &str,
        capacity: usize,
    ) -> Result<()> {
        self.transact(key, OnMissing::Empty, |entries: Vec<Approval>| {
            let mut set = ApprovalSet::with_entries(entries, capacity);
            set.accept(Approval::new(hash, approver));
            Update::Write(set.into_entries())
        })
        .await
        .map(|_| ())
    }

    /// Remove `hash` from the approval set at `key`. Returns whether it was present.
    #[instrument(level = "debug", skip(self, hash), fields(hash = %hash))]
    pub async fn decline(&self, key: &str, hash: &PerceptualHash) -> Result<bool> {
        self.transact(key, OnMissing::Fail, |entries: Vec<Approval>| {
            let mut set = ApprovalSet::with_entries(entries, usize::MAX);
            if set.decline(hash) {
                Update::Write(set.into_entries())
            } else {
                Update::Keep
            }
        })
        .await
    }

    /// Insert or replace `record` in the ledger of `group`, stamping its time.
    #[instrument(level = "debug", skip(self, record), fields(key = %record.key))]
    pub async fn upsert_change(
        &self,
        group: &str,
        mut record: ChangeRecord,
    ) -> Result<ChangeRecord> {
        record.ts = Utc::now().timestamp();
        record.group = group.to_string();
        let stored = record.clone();
        self.transact(group, OnMissing::Empty, |mut ledger: ChangeLedger| {
            ledger.upsert(stored);
            Update::Write(ledger)
        })
        .await?;
        debug!("Change recorded");
        Ok(record)
    }

    /// Delete one change (or all, when `key` is `None`) from the ledger of `group`.
    ///
    /// The ledger must exist. Returns whether anything was written.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_changes(&self, group: &str, key: Option<&str>) -> Result<bool> {
        self.transact(group, OnMissing::Fail, |mut ledger: ChangeLedger| {
            if ledger.remove(key) {
                Update::Write(ledger)
            } else {
                Update::Keep
            }
        })
        .await
    }

    /// Copy the snapshot at `src` to `dest`, recording who did it.
    #[instrument(level = "debug", skip(self))]
    pub async fn copy_snapshot(&self, src: &str, dest: &str, author: &str) -> Result<()> {
        let store = self.store();
        self.sync(|| async move {
            let mut snapshot = SnapshotRecord::pull(store, src).await?;
            snapshot
                .metadata
                .insert(AUTHOR_FIELD.to_string(), author.to_string());
            snapshot.push(store, dest).await
        })
        .await
    }
}

impl std::fmt::Debug for SyncedOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedOps").finish_non_exhaustive()
    }
}
