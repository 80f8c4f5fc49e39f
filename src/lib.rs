//! Windowgate - Shared Sliding Window Rate Limiting
//!
//! This crate enforces a per-identifier request quota over a rolling time
//! window. Window state lives in an external store (Redis sorted sets), so
//! every process pointed at the same store enforces the same quota without
//! any coordination of its own.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
