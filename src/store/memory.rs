//! In-process window store.
//!
//! Mirrors the Redis sorted-set semantics the limiter relies on: members are
//! unique, ordered by score, and an empty set does not exist. Each batch runs
//! while holding the record's shard lock, so batches on one record never
//! interleave.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{AdmitOutcome, AdmitRequest, Batch, BatchOp, BatchReply, OpResult, Ttl, WindowStore};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// One window record: a sorted set with an optional absolute expiry.
#[derive(Debug, Default)]
struct Record {
    by_score: BTreeSet<(u64, String)>,
    scores: HashMap<String, u64>,
    expires_at: Option<u64>,
}

impl Record {
    fn is_empty(&self) -> bool {
        self.by_score.is_empty()
    }

    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    fn clear(&mut self) {
        self.by_score.clear();
        self.scores.clear();
        self.expires_at = None;
    }

    /// Returns 1 if `token` is new, 0 if only its score was updated.
    fn add(&mut self, score: u64, token: String) -> u64 {
        match self.scores.insert(token.clone(), score) {
            Some(previous) => {
                self.by_score.remove(&(previous, token.clone()));
                self.by_score.insert((score, token));
                0
            }
            None => {
                self.by_score.insert((score, token));
                1
            }
        }
    }

    fn trim(&mut self, upper_bound: u64) -> u64 {
        let removed = match upper_bound.checked_add(1) {
            Some(first_kept) => {
                let kept = self.by_score.split_off(&(first_kept, String::new()));
                std::mem::replace(&mut self.by_score, kept)
            }
            None => std::mem::take(&mut self.by_score),
        };
        for (_, token) in &removed {
            self.scores.remove(token);
        }
        if self.is_empty() {
            self.expires_at = None;
        }
        removed.len() as u64
    }

    fn ttl(&self, now: u64) -> Ttl {
        if self.is_empty() {
            return Ttl::Absent;
        }
        match self.expires_at {
            Some(at) => Ttl::Expires(at.saturating_sub(now)),
            None => Ttl::Persistent,
        }
    }

    fn set_expiry(&mut self, now: u64, duration_ms: u64) -> bool {
        if self.is_empty() {
            return false;
        }
        self.expires_at = Some(now.saturating_add(duration_ms));
        true
    }

    fn apply(&mut self, op: &BatchOp, now: u64) -> OpResult {
        match op {
            BatchOp::Trim { upper_bound } => OpResult::Trimmed(self.trim(*upper_bound)),
            BatchOp::Cardinality => OpResult::Cardinality(self.by_score.len() as u64),
            BatchOp::TimeToLive => OpResult::TimeToLive(self.ttl(now)),
            BatchOp::Add { score, token } => OpResult::Added(self.add(*score, token.clone())),
            BatchOp::SetExpiry { duration_ms } => {
                OpResult::ExpirySet(self.set_expiry(now, *duration_ms))
            }
            BatchOp::Delete => {
                let existed = !self.is_empty();
                self.clear();
                OpResult::Deleted(existed)
            }
        }
    }
}

/// A [`WindowStore`] held in process memory.
///
/// Useful for tests and single-process deployments. Expired records are
/// dropped when next touched, or in bulk by [`purge_expired`](Self::purge_expired).
#[derive(Debug)]
pub struct MemoryWindowStore {
    records: DashMap<String, Record>,
    clock: Arc<dyn Clock>,
}

impl MemoryWindowStore {
    /// Create a store that reads the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store whose expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.records
            .iter()
            .filter(|r| !r.is_empty() && !r.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired or empty record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_empty() && !r.is_expired(now));
        before - self.records.len()
    }

    /// Run `f` against the record at `key` under its lock.
    fn with_record<T>(&self, key: &str, f: impl FnOnce(&mut Record, u64) -> T) -> T {
        let now = self.clock.now_millis();
        let out = {
            let mut record = self.records.entry(key.to_string()).or_default();
            if record.is_expired(now) {
                trace!(key = %key, "Dropping expired record");
                record.clear();
            }
            f(&mut record, now)
        };
        // Redis deletes a sorted set once its last member goes.
        self.records.remove_if(key, |_, r| r.is_empty());
        out
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn execute(&self, batch: Batch) -> Result<BatchReply> {
        let results = self.with_record(batch.key(), |record, now| {
            batch.ops().iter().map(|op| record.apply(op, now)).collect()
        });
        Ok(BatchReply::new(results))
    }

    fn supports_atomic_admit(&self) -> bool {
        true
    }

    async fn admit_atomic(&self, request: AdmitRequest) -> Result<AdmitOutcome> {
        let AdmitRequest {
            key,
            window_start,
            max,
            window_ms,
            entries,
        } = request;

        let outcome = self.with_record(&key, |record, now| {
            record.trim(window_start);
            let count = record.by_score.len() as u64;
            if count.saturating_add(entries.len() as u64) > max {
                return AdmitOutcome {
                    admitted: false,
                    count,
                    ttl: record.ttl(now),
                };
            }
            for (score, token) in entries {
                record.add(score, token);
            }
            record.set_expiry(now, window_ms);
            AdmitOutcome {
                admitted: true,
                count,
                ttl: record.ttl(now),
            }
        });
        Ok(outcome)
    }
}
