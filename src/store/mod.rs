//! Window store adapters.
//!
//! A window record is a sorted set of `(score, token)` entries plus an
//! optional expiry. The limiter never touches a record directly: it queues
//! primitive operations into a [`Batch`] and hands the batch to a
//! [`WindowStore`], which executes it as one indivisible unit.

use async_trait::async_trait;

use crate::error::{QuotaError, Result};

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryWindowStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisWindowStore;

/// A primitive operation against one window record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Remove every entry with score <= `upper_bound`.
    Trim { upper_bound: u64 },
    /// Count the surviving entries.
    Cardinality,
    /// Read the record's remaining lifetime.
    TimeToLive,
    /// Insert one entry.
    Add { score: u64, token: String },
    /// (Re)set the record's lifetime to `duration_ms` from now.
    SetExpiry { duration_ms: u64 },
    /// Remove the record entirely.
    Delete,
}

/// Remaining lifetime of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No such record.
    Absent,
    /// The record exists but has no expiry set.
    Persistent,
    /// The record expires in this many milliseconds.
    Expires(u64),
}

impl Ttl {
    /// Interpret a Redis `PTTL` reply.
    pub fn from_pttl(raw: i64) -> Self {
        match raw {
            -2 => Ttl::Absent,
            r if r < 0 => Ttl::Persistent,
            r => Ttl::Expires(r as u64),
        }
    }

    /// Milliseconds until expiry, if an expiry is active.
    pub fn remaining_millis(&self) -> Option<u64> {
        match self {
            Ttl::Expires(ms) => Some(*ms),
            Ttl::Absent | Ttl::Persistent => None,
        }
    }
}

/// The result of one [`BatchOp`], in queue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    Trimmed(u64),
    Cardinality(u64),
    TimeToLive(Ttl),
    Added(u64),
    ExpirySet(bool),
    Deleted(bool),
}

/// An ordered list of operations executed atomically against one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    key: String,
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Start an empty batch for the record at `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ops: Vec::new(),
        }
    }

    pub fn trim(mut self, upper_bound: u64) -> Self {
        self.ops.push(BatchOp::Trim { upper_bound });
        self
    }

    pub fn cardinality(mut self) -> Self {
        self.ops.push(BatchOp::Cardinality);
        self
    }

    pub fn time_to_live(mut self) -> Self {
        self.ops.push(BatchOp::TimeToLive);
        self
    }

    pub fn add(mut self, score: u64, token: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Add {
            score,
            token: token.into(),
        });
        self
    }

    /// Queue one `Add` per `(score, token)` pair.
    pub fn add_many<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (u64, String)>,
    {
        self.ops.extend(
            entries
                .into_iter()
                .map(|(score, token)| BatchOp::Add { score, token }),
        );
        self
    }

    pub fn set_expiry(mut self, duration_ms: u64) -> Self {
        self.ops.push(BatchOp::SetExpiry { duration_ms });
        self
    }

    pub fn delete(mut self) -> Self {
        self.ops.push(BatchOp::Delete);
        self
    }

    /// The record key this batch targets.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Per-operation results of an executed [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReply(Vec<OpResult>);

impl BatchReply {
    pub fn new(results: Vec<OpResult>) -> Self {
        Self(results)
    }

    pub fn results(&self) -> &[OpResult] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The cardinality read at position `index`.
    ///
    /// A reply of the wrong shape means the store broke protocol, which is
    /// reported as [`QuotaError::StoreUnavailable`].
    pub fn cardinality_at(&self, index: usize) -> Result<u64> {
        match self.0.get(index) {
            Some(OpResult::Cardinality(count)) => Ok(*count),
            other => Err(unexpected_reply("cardinality", index, other)),
        }
    }

    /// The time-to-live read at position `index`.
    pub fn ttl_at(&self, index: usize) -> Result<Ttl> {
        match self.0.get(index) {
            Some(OpResult::TimeToLive(ttl)) => Ok(*ttl),
            other => Err(unexpected_reply("time-to-live", index, other)),
        }
    }
}

fn unexpected_reply(expected: &str, index: usize, got: Option<&OpResult>) -> QuotaError {
    QuotaError::StoreUnavailable(format!(
        "expected {} reply at position {}, got {:?}",
        expected, index, got
    ))
}

/// A request to trim, count and conditionally admit in one store-side step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmitRequest {
    pub key: String,
    /// Entries with score <= this are expired.
    pub window_start: u64,
    pub max: u64,
    pub window_ms: u64,
    /// Entries to insert if `count + entries.len() <= max`.
    pub entries: Vec<(u64, String)>,
}

/// The outcome of an [`AdmitRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitOutcome {
    pub admitted: bool,
    /// Surviving entries before this request's entries were added.
    pub count: u64,
    pub ttl: Ttl,
}

/// Capability interface over a shared store of window records.
///
/// Implementations must execute each batch indivisibly with respect to other
/// batches on the same record, and must not retry on failure.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Execute every operation in `batch` as one atomic unit.
    async fn execute(&self, batch: Batch) -> Result<BatchReply>;

    /// Whether [`admit_atomic`](Self::admit_atomic) is available.
    fn supports_atomic_admit(&self) -> bool {
        false
    }

    /// Trim, count, and add `request.entries` only if they fit, all in one
    /// atomic step.
    async fn admit_atomic(&self, request: AdmitRequest) -> Result<AdmitOutcome> {
        Err(QuotaError::InvalidConfiguration(format!(
            "store does not support atomic admission (key {})",
            request.key
        )))
    }
}
