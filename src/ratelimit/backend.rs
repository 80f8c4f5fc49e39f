//! Rate limiter trait for abstracting over store implementations.

use async_trait::async_trait;

use super::decision::Decision;
use super::limiter::SlidingWindowLimiter;
use super::policy::WindowConfig;
use crate::error::Result;
use crate::store::WindowStore;

/// Trait for rate limiter implementations.
///
/// This trait erases the store type so callers can hold an
/// `Arc<dyn RateLimiterBackend>` chosen at runtime.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Report the standing of `identifier` without recording a request.
    async fn check(&self, identifier: &str) -> Result<Decision>;

    /// Try to admit `cost` units for `identifier`.
    async fn consume(&self, identifier: &str, cost: u32) -> Result<Decision>;

    /// Forget all recorded requests for `identifier`.
    async fn reset(&self, identifier: &str) -> Result<()>;

    /// The window this limiter enforces.
    fn window(&self) -> &WindowConfig;
}

#[async_trait]
impl<S: WindowStore + 'static> RateLimiterBackend for SlidingWindowLimiter<S> {
    async fn check(&self, identifier: &str) -> Result<Decision> {
        SlidingWindowLimiter::check(self, identifier).await
    }

    async fn consume(&self, identifier: &str, cost: u32) -> Result<Decision> {
        SlidingWindowLimiter::consume(self, identifier, cost).await
    }

    async fn reset(&self, identifier: &str) -> Result<()> {
        SlidingWindowLimiter::reset(self, identifier).await
    }

    fn window(&self) -> &WindowConfig {
        self.config()
    }
}
