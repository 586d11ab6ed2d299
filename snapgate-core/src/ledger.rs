//! Pending changes awaiting review.
//!
//! A [`ChangeLedger`] holds the unresolved differences of one group (a test
//! run or a tag) and is persisted as a single JSON array under the group key.
//! Each baseline key appears at most once.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hash::PerceptualHash;
use crate::store::{pull_json, BlobStore, Metadata};

/// One visual difference awaiting human review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Unix seconds of the last ledger write for this change.
    #[serde(default)]
    pub ts: i64,
    /// Baseline key the candidate was compared against.
    pub key: String,
    /// XOR of baseline and candidate hashes.
    #[serde(rename = "hash")]
    pub difference_hash: PerceptualHash,
    #[serde(default)]
    pub target_hash: PerceptualHash,
    /// Key of the uploaded candidate image.
    pub target: String,
    /// Key of the uploaded diff overlay.
    #[serde(rename = "otherness")]
    pub overlay: String,
    #[serde(default)]
    pub data: Metadata,
    /// Ledger group this change was recorded under.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ChangeRecord {
    /// Number of differing hash bits.
    pub fn score(&self) -> u32 {
        self.difference_hash.count_ones()
    }

    /// Link a reviewer follows to approve this change, when a group is known.
    pub fn approve_locator(&self, store: &dyn BlobStore) -> Option<String> {
        (!self.group.is_empty()).then(|| store.resolve(&format!("{}/{}", self.group, self.key)))
    }

    /// Human-readable summary with locators for every artifact.
    pub fn report(&self, store: &dyn BlobStore) -> String {
        let mut out = format!(
            "the page changed (score {})\n\
             \texpected:   {}\n\
             \tactual:     {}\n\
             \toverlay:    {}\n",
            self.score(),
            store.resolve(&self.key),
            store.resolve(&self.target),
            store.resolve(&self.overlay),
        );
        if let Some(link) = self.approve_locator(store) {
            let _ = writeln!(out, "please approve: {link}");
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeLedger {
    records: Vec<ChangeRecord>,
}

impl ChangeLedger {
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ChangeRecord> {
        self.records.iter().find(|r| r.key == key)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.records.iter().position(|r| r.key == key)
    }

    /// Insert `record`, replacing the one with the same baseline key in its slot.
    pub fn upsert(&mut self, record: ChangeRecord) {
        match self.position(&record.key) {
            Some(n) => self.records[n] = record,
            None => self.records.push(record),
        }
    }

    /// Remove one record by baseline key, or all records when `key` is `None`.
    ///
    /// Returns `false` when a key was given and no record matched.
    pub fn remove(&mut self, key: Option<&str>) -> bool {
        match key {
            None => {
                self.records.clear();
                true
            }
            Some(key) => match self.position(key) {
                Some(n) => {
                    self.records.swap_remove(n);
                    true
                }
                None => false,
            },
        }
    }

    /// Load the ledger of `group`. A missing ledger is an error.
    pub async fn pull(store: &dyn BlobStore, group: &str) -> Result<Self> {
        pull_json(store, group).await
    }
}
