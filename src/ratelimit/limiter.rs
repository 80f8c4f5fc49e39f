//! Sliding window rate limiter.
//!
//! Every admitted unit is one entry in the identifier's window record, scored
//! with its timestamp. A call trims entries older than the window, counts the
//! rest, and compares against the quota. All state lives in the store, so any
//! number of processes sharing the store enforce one quota.
//!
//! # Concurrency
//!
//! In [`AdmissionMode::TwoPhase`], `consume` reads the count in one batch and
//! writes in a second. Two callers can both read a count under the quota and
//! both write. With `n` callers racing on one identifier the stored count can
//! exceed `max` by at most `(n - 1) * cost`. The reported `remaining` is
//! clamped at zero. [`AdmissionMode::Atomic`] closes the gap by running the
//! whole decision inside the store.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::decision::Decision;
use super::key::WindowKey;
use super::policy::{AdmissionMode, WindowConfig};
use super::token::TokenGenerator;
use crate::clock::{Clock, SystemClock};
use crate::error::{QuotaError, Result};
use crate::store::{AdmitRequest, Batch, BatchReply, Ttl, WindowStore};

/// Sliding window limiter over a shared [`WindowStore`].
///
/// Holds no locks and no per-identifier state; share it with `Arc`.
pub struct SlidingWindowLimiter<S: WindowStore> {
    store: Arc<S>,
    config: WindowConfig,
    clock: Arc<dyn Clock>,
    tokens: TokenGenerator,
}

impl<S: WindowStore> SlidingWindowLimiter<S> {
    /// Create a limiter that reads the system clock.
    pub fn new(store: Arc<S>, config: WindowConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit clock.
    ///
    /// Fails if atomic admission is requested from a store that cannot do it.
    pub fn with_clock(store: Arc<S>, config: WindowConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.mode() == AdmissionMode::Atomic && !store.supports_atomic_admit() {
            return Err(QuotaError::InvalidConfiguration(
                "atomic admission mode requires a store with scripted admission".to_string(),
            ));
        }

        debug!(
            window_ms = config.window_ms(),
            max = config.max(),
            prefix = %config.key_prefix(),
            mode = ?config.mode(),
            "Created sliding window limiter"
        );

        Ok(Self {
            store,
            config,
            clock,
            tokens: TokenGenerator::new(),
        })
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Report whether a request for `identifier` would be admitted, without
    /// recording one. Expired entries are trimmed as a side effect.
    pub async fn check(&self, identifier: &str) -> Result<Decision> {
        let key = self.key(identifier);
        let now = self.clock.now_millis();

        trace!(key = %key, "Checking window");

        let (count, ttl) = self.read_window(&key, now).await?;

        Ok(Decision {
            allowed: count < self.config.max(),
            remaining: self.config.max().saturating_sub(count),
            total: self.config.max(),
            reset_at: self.reset_at(now, ttl),
        })
    }

    /// Try to admit `cost` units for `identifier` as one all-or-nothing
    /// decision. A rejection records nothing.
    ///
    /// A `cost` of zero records nothing and reports the current standing.
    pub async fn consume(&self, identifier: &str, cost: u32) -> Result<Decision> {
        if cost == 0 {
            return self.check(identifier).await;
        }

        match self.config.mode() {
            AdmissionMode::TwoPhase => self.consume_two_phase(identifier, cost).await,
            AdmissionMode::Atomic => self.consume_atomic(identifier, cost).await,
        }
    }

    /// Shorthand for `consume(identifier, 1)`.
    pub async fn consume_one(&self, identifier: &str) -> Result<Decision> {
        self.consume(identifier, 1).await
    }

    /// Delete the window record for `identifier`. Absent records are fine.
    pub async fn reset(&self, identifier: &str) -> Result<()> {
        let key = self.key(identifier);
        self.execute(&key, Batch::new(key.to_store_key()).delete())
            .await?;
        debug!(key = %key, "Window reset");
        Ok(())
    }

    async fn consume_two_phase(&self, identifier: &str, cost: u32) -> Result<Decision> {
        let key = self.key(identifier);
        let now = self.clock.now_millis();
        let max = self.config.max();

        trace!(key = %key, cost = cost, "Consuming from window");

        let (count, ttl) = self.read_window(&key, now).await?;

        if count.saturating_add(u64::from(cost)) > max {
            return Ok(self.rejected(&key, now, count, cost, ttl));
        }

        if count == 0 {
            debug!(key = %key, "Creating window record");
        }

        // Another caller may have written since the read above; see the
        // module docs for the bound on the resulting overshoot.
        self.execute(
            &key,
            Batch::new(key.to_store_key())
                .add_many(self.tokens.entries(now, cost))
                .set_expiry(self.config.window_ms()),
        )
        .await?;

        Ok(self.admitted(now, count, cost))
    }

    async fn consume_atomic(&self, identifier: &str, cost: u32) -> Result<Decision> {
        let key = self.key(identifier);
        let now = self.clock.now_millis();

        trace!(key = %key, cost = cost, "Consuming from window atomically");

        // A cost above the quota can never fit. Reject it from a plain read
        // so no entries are built for it.
        if u64::from(cost) > self.config.max() {
            let (count, ttl) = self.read_window(&key, now).await?;
            return Ok(self.rejected(&key, now, count, cost, ttl));
        }

        let request = AdmitRequest {
            key: key.to_store_key(),
            window_start: self.window_start(now),
            max: self.config.max(),
            window_ms: self.config.window_ms(),
            entries: self.tokens.entries(now, cost),
        };
        let outcome = self.store.admit_atomic(request).await.map_err(|e| {
            warn!(key = %key, error = %e, "Window store failed during atomic admission");
            e
        })?;

        if !outcome.admitted {
            return Ok(self.rejected(&key, now, outcome.count, cost, outcome.ttl));
        }
        Ok(self.admitted(now, outcome.count, cost))
    }

    fn admitted(&self, now: u64, count: u64, cost: u32) -> Decision {
        let max = self.config.max();
        Decision {
            allowed: true,
            remaining: max.saturating_sub(count.saturating_add(u64::from(cost))),
            total: max,
            reset_at: now.saturating_add(self.config.window_ms()),
        }
    }

    fn rejected(&self, key: &WindowKey, now: u64, count: u64, cost: u32, ttl: Ttl) -> Decision {
        debug!(
            key = %key,
            count = count,
            cost = cost,
            limit = self.config.max(),
            "Rate limit exceeded"
        );
        Decision {
            allowed: false,
            remaining: 0,
            total: self.config.max(),
            reset_at: self.reset_at(now, ttl),
        }
    }

    /// Estimate the reset time from the record's lifetime.
    ///
    /// The lifetime is refreshed to a full window on every admission, so
    /// under bursty traffic this is later than when the oldest entry actually
    /// leaves the window.
    fn reset_at(&self, now: u64, ttl: Ttl) -> u64 {
        match ttl.remaining_millis() {
            Some(ms) => now.saturating_add(ms),
            None => now.saturating_add(self.config.window_ms()),
        }
    }

    /// Trim expired entries, then read the surviving count and the record's
    /// lifetime in one batch.
    async fn read_window(&self, key: &WindowKey, now: u64) -> Result<(u64, Ttl)> {
        let reply = self
            .execute(
                key,
                Batch::new(key.to_store_key())
                    .trim(self.window_start(now))
                    .cardinality()
                    .time_to_live(),
            )
            .await?;
        Ok((reply.cardinality_at(1)?, reply.ttl_at(2)?))
    }

    fn window_start(&self, now: u64) -> u64 {
        now.saturating_sub(self.config.window_ms())
    }

    fn key(&self, identifier: &str) -> WindowKey {
        WindowKey::new(self.config.key_prefix(), identifier)
    }

    async fn execute(&self, key: &WindowKey, batch: Batch) -> Result<BatchReply> {
        self.store.execute(batch).await.map_err(|e| {
            warn!(key = %key, error = %e, "Window store batch failed");
            e
        })
    }
}

impl<S: WindowStore> std::fmt::Debug for SlidingWindowLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
