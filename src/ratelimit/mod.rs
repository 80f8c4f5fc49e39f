//! Sliding window rate limiting over a shared store.

mod backend;
mod decision;
mod key;
mod limiter;
mod policy;
mod token;

pub use backend::RateLimiterBackend;
pub use decision::Decision;
pub use key::WindowKey;
pub use limiter::SlidingWindowLimiter;
pub use policy::{AdmissionMode, PolicyConfig, WindowConfig, DEFAULT_KEY_PREFIX};
pub use token::TokenGenerator;
