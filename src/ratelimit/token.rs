//! Unique entry tokens.
//!
//! Sorted-set members must never collide, or two requests would count as
//! one. A token combines the entry's score, a per-generator sequence number
//! and 64 random bits, so two processes issuing tokens in the same
//! millisecond with the same sequence still differ.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free generator of entry tokens.
#[derive(Debug, Default)]
pub struct TokenGenerator {
    sequence: AtomicU64,
}

impl TokenGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token for an entry scored at `score`.
    ///
    /// Format: `<score>-<sequence>-<random hex>`.
    pub fn next(&self, score: u64) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let salt: u64 = rand::random();
        format!("{}-{}-{:016x}", score, seq, salt)
    }

    /// `cost` entries starting at `now`, the i-th scored `now + i`.
    pub fn entries(&self, now: u64, cost: u32) -> Vec<(u64, String)> {
        (0..u64::from(cost))
            .map(|i| {
                let score = now.saturating_add(i);
                (score, self.next(score))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_are_unique() {
        let generator = TokenGenerator::new();
        let tokens: HashSet<String> = (0..10_000).map(|_| generator.next(42)).collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn test_token_format() {
        let generator = TokenGenerator::new();
        let token = generator.next(1_700_000_000_000);
        let parts: Vec<&str> = token.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "1700000000000");
        assert_eq!(parts[1], "0");
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_entries_have_distinct_scores() {
        let generator = TokenGenerator::new();
        let entries = generator.entries(1_000, 3);
        let scores: Vec<u64> = entries.iter().map(|(s, _)| *s).collect();
        assert_eq!(scores, vec![1_000, 1_001, 1_002]);
        assert!(generator.entries(1_000, 0).is_empty());
    }

    #[test]
    fn test_separate_generators_do_not_collide() {
        let a = TokenGenerator::new();
        let b = TokenGenerator::new();
        // Same score and sequence; only the random component differs.
        assert_ne!(a.next(7), b.next(7));
    }
}
