//! Human-sanctioned differences.
//!
//! An [`ApprovalSet`] is a bounded list of difference hashes a reviewer has
//! accepted. A new difference is considered approved when it is within the
//! threshold of a single approval, or of the union (bitwise OR) of any two
//! approvals: two unrelated UI edits landing on the same screenshot produce a
//! difference that neither approval covers alone. Only pairs are searched,
//! which keeps the lookup quadratic.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hash::PerceptualHash;
use crate::store::{pull_json, push_json, BlobStore};

/// Default maximum number of approvals kept per set.
pub const DEFAULT_CAPACITY: usize = 100;

/// How long an approval stays valid after it was granted.
pub const VALIDITY_MONTHS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Unix seconds when the approval was (last) granted.
    pub ts: i64,
    pub hash: PerceptualHash,
    pub approver: String,
}

impl Approval {
    pub fn new(hash: PerceptualHash, approver: impl Into<String>) -> Self {
        Self {
            ts: 0,
            hash,
            approver: approver.into(),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.ts, 0)?.checked_add_months(Months::new(VALIDITY_MONTHS))
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expiry| expiry > now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// Approvals that explain an observed difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalMatch {
    Single(Approval),
    Pair(Approval, Approval),
}

impl ApprovalMatch {
    pub fn approvers(&self) -> Vec<&str> {
        match self {
            Self::Single(a) => vec![a.approver.as_str()],
            Self::Pair(a, b) => vec![a.approver.as_str(), b.approver.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalSet {
    entries: Vec<Approval>,
    capacity: usize,
}

impl Default for ApprovalSet {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ApprovalSet {
    pub fn new(capacity: usize) -> Self {
        Self::with_entries(Vec::new(), capacity)
    }

    pub fn with_entries(entries: Vec<Approval>, capacity: usize) -> Self {
        Self {
            entries,
            capacity: capacity.max(1),
        }
    }

    pub fn entries(&self) -> &[Approval] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Approval> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Accept `approval`, stamping it with the current time.
    pub fn accept(&mut self, approval: Approval) {
        self.accept_at(approval, Utc::now().timestamp());
    }

    /// Accept `approval` with an explicit timestamp.
    ///
    /// An entry with the same hash is updated in place. Otherwise, when the
    /// set is full, the oldest entry (earliest position on ties) is evicted.
    pub fn accept_at(&mut self, mut approval: Approval, ts: i64) {
        approval.ts = ts;

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|a| a.hash.equal(&approval.hash, 0))
        {
            *existing = approval;
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, a)| a.ts)
                .map(|(n, _)| n)
            {
                self.entries.remove(oldest);
            }
        }
        self.entries.push(approval);
    }

    /// Remove the approval for exactly `hash`. Returns whether one was removed.
    pub fn decline(&mut self, hash: &PerceptualHash) -> bool {
        match self.entries.iter().position(|a| a.hash.equal(hash, 0)) {
            Some(n) => {
                self.entries.swap_remove(n);
                true
            }
            None => false,
        }
    }

    /// Find approvals explaining `target` within `threshold`.
    ///
    /// Expired approvals are considered.
    pub fn find_match(&self, target: &PerceptualHash, threshold: u32) -> Option<ApprovalMatch> {
        search(&self.entries.iter().collect::<Vec<_>>(), target, threshold)
    }

    /// Like [`find_match`](Self::find_match), skipping approvals expired at `now`.
    pub fn find_valid_match(
        &self,
        target: &PerceptualHash,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Option<ApprovalMatch> {
        let valid: Vec<&Approval> = self.entries.iter().filter(|a| a.is_valid_at(now)).collect();
        search(&valid, target, threshold)
    }

    /// Load the set stored under `key`. A missing key is an error.
    pub async fn pull(store: &dyn BlobStore, key: &str, capacity: usize) -> Result<Self> {
        let entries: Vec<Approval> = pull_json(store, key).await?;
        Ok(Self::with_entries(entries, capacity))
    }

    pub async fn push(&self, store: &dyn BlobStore, key: &str) -> Result<()> {
        push_json(store, key, &self.entries).await
    }
}

fn search(
    approvals: &[&Approval],
    target: &PerceptualHash,
    threshold: u32,
) -> Option<ApprovalMatch> {
    if let Some(single) = approvals.iter().find(|a| target.equal(&a.hash, threshold)) {
        return Some(ApprovalMatch::Single((*single).clone()));
    }
    for (i, first) in approvals.iter().enumerate() {
        for second in &approvals[i..] {
            if target.equal(&first.hash.or(&second.hash), threshold) {
                return Some(ApprovalMatch::Pair((*first).clone(), (*second).clone()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;
    use chrono::TimeZone;

    fn hash(value: u64) -> PerceptualHash {
        PerceptualHash::from_u64(value)
    }

    fn approval_at(ts: i64, value: u64, approver: &str) -> Approval {
        Approval {
            ts,
            hash: hash(value),
            approver: approver.into(),
        }
    }

    #[test]
    fn test_accept_updates_existing_in_place() {
        let mut set = ApprovalSet::new(10);
        set.accept_at(Approval::new(hash(1), "u1"), 100);
        set.accept_at(Approval::new(hash(2), "u2"), 100);
        set.accept_at(Approval::new(hash(1), "u3"), 200);

        assert_eq!(set.len(), 2);
        assert_eq!(set.entries()[0].approver, "u3");
        assert_eq!(set.entries()[0].ts, 200);
    }

    #[test]
    fn test_accept_stamps_current_time() {
        let before = Utc::now().timestamp();
        let mut set = ApprovalSet::default();
        set.accept(Approval::new(hash(5), "qa"));
        assert!(set.entries()[0].ts >= before);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut set = ApprovalSet::with_entries(
            vec![
                approval_at(2, 2, "u2"),
                approval_at(5, 5, "u5"),
                approval_at(10, 10, "u10"),
                approval_at(-10, 1, "u"),
            ],
            4,
        );
        set.accept_at(Approval::new(hash(99), "new_user"), 20);

        assert_eq!(set.len(), 4);
        assert!(set.entries().iter().all(|a| a.hash != hash(1)));
        assert!(set.entries().iter().any(|a| a.approver == "new_user" && a.ts == 20));
    }

    #[test]
    fn test_capacity_keeps_newest_timestamps() {
        let capacity = 20;
        let mut set = ApprovalSet::new(capacity);
        for n in 0..(capacity as u64 + 5) {
            set.accept_at(Approval::new(hash(n + 1), "bot"), n as i64);
            assert!(set.len() <= capacity);
        }

        let mut kept: Vec<i64> = set.entries().iter().map(|a| a.ts).collect();
        kept.sort();
        assert_eq!(kept, (5..25).collect::<Vec<i64>>());
    }

    #[test]
    fn test_capacity_ties_broken_by_acceptance_order() {
        let mut set = ApprovalSet::new(2);
        set.accept_at(Approval::new(hash(1), "a"), 7);
        set.accept_at(Approval::new(hash(2), "b"), 7);
        set.accept_at(Approval::new(hash(3), "c"), 7);

        let approvers: Vec<&str> = set.entries().iter().map(|a| a.approver.as_str()).collect();
        assert_eq!(approvers, vec!["b", "c"]);
    }

    #[test]
    fn test_decline() {
        let mut set = ApprovalSet::new(10);
        set.accept_at(Approval::new(hash(1), "a"), 1);
        set.accept_at(Approval::new(hash(2), "b"), 1);
        set.accept_at(Approval::new(hash(3), "c"), 1);

        assert!(set.decline(&hash(1)));
        assert_eq!(set.len(), 2);
        assert!(!set.decline(&hash(1)));
        assert!(!set.decline(&hash(7)));
        assert_eq!(set.entries()[0].hash, hash(3));
    }

    #[test]
    fn test_single_match_threshold_boundary() {
        let mut set = ApprovalSet::new(10);
        set.accept_at(Approval::new(hash(0), "a"), 1);

        let within = hash(0b11_1111);
        let beyond = hash(0b111_1111);
        assert!(matches!(set.find_match(&within, 6), Some(ApprovalMatch::Single(_))));
        assert_eq!(set.find_match(&beyond, 6), None);
    }

    #[test]
    fn test_pair_match_covers_union() {
        let a = PerceptualHash::from_u64(0x0000_0000_FFFF_FFFF);
        let b = PerceptualHash::from_u64(0xFFFF_FFFF_0000_0000);
        let mut set = ApprovalSet::new(10);
        set.accept_at(Approval::new(a.clone(), "a"), 1);
        set.accept_at(Approval::new(b.clone(), "b"), 1);

        let target = a.or(&b);
        assert!(!target.equal(&a, 6));
        assert!(!target.equal(&b, 6));
        match set.find_match(&target, 6) {
            Some(ApprovalMatch::Pair(x, y)) => {
                assert_eq!(x.hash, a);
                assert_eq!(y.hash, b);
            }
            other => panic!("expected pair match, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        assert_eq!(ApprovalSet::default().find_match(&hash(0), 6), None);
    }

    #[test]
    fn test_validity_window() {
        let granted = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let approval = Approval {
            ts: granted.timestamp(),
            hash: hash(1),
            approver: "a".into(),
        };
        assert!(approval.is_valid_at(Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap()));
        assert!(!approval.is_valid_at(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_expired_approvals_still_match_unless_filtered() {
        let mut set = ApprovalSet::new(10);
        set.accept_at(Approval::new(hash(4), "old"), 0);
        let now = Utc::now();

        assert!(set.find_match(&hash(4), 0).is_some());
        assert!(set.find_valid_match(&hash(4), 0, now).is_none());
    }

    #[tokio::test]
    async fn test_pull_push_json_array() {
        let store = MemoryBlobStore::new();
        let mut set = ApprovalSet::new(4);
        set.accept_at(Approval::new(hash(62), "qa"), 42);
        set.push(&store, "approvals/stable").await.unwrap();

        let body = store.pull("approvals/stable", true).await.unwrap().body.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["hash"], "10");
        assert_eq!(json[0]["ts"], 42);

        let restored = ApprovalSet::pull(&store, "approvals/stable", 4).await.unwrap();
        assert_eq!(restored, set);
    }
}
