//! The outcome of a limiter call.

use serde::{Deserialize, Serialize};

/// Whether a request fits in the window, and the standing of the window.
///
/// Carries everything needed to build rate limit response headers without
/// another store round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The request was (or would be) admitted
    pub allowed: bool,
    /// Units still available in the window, never negative
    pub remaining: u64,
    /// The configured quota
    pub total: u64,
    /// Estimated epoch milliseconds at which the quota resets
    pub reset_at: u64,
}

impl Decision {
    /// Seconds until `reset_at`, rounded up.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at.saturating_sub(now_ms).div_ceil(1000)
    }

    /// `reset_at` as epoch seconds, rounded up.
    pub fn reset_epoch_secs(&self) -> u64 {
        self.reset_at.div_ceil(1000)
    }

    /// Standard rate limit headers for this decision.
    ///
    /// `Retry-After` is only present when the request was rejected.
    pub fn headers(&self, now_ms: u64) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.total.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_epoch_secs().to_string()),
        ];
        if !self.allowed {
            headers.push(("Retry-After", self.retry_after_secs(now_ms).to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_headers() {
        let decision = Decision {
            allowed: true,
            remaining: 4,
            total: 5,
            reset_at: 1_700_000_000_500,
        };
        let headers = decision.headers(1_700_000_000_000);
        assert_eq!(
            headers,
            vec![
                ("X-RateLimit-Limit", "5".to_string()),
                ("X-RateLimit-Remaining", "4".to_string()),
                ("X-RateLimit-Reset", "1700000001".to_string()),
            ]
        );
    }

    #[test]
    fn test_rejected_headers_include_retry_after() {
        let decision = Decision {
            allowed: false,
            remaining: 0,
            total: 2,
            reset_at: 1_100,
        };
        let headers = decision.headers(200);
        assert_eq!(headers.last().unwrap(), &("Retry-After", "1".to_string()));
        assert_eq!(decision.retry_after_secs(200), 1);
        assert_eq!(decision.retry_after_secs(5_000), 0);
    }

    #[test]
    fn test_retry_after_rounds_up_at_second_boundaries() {
        let decision = Decision {
            allowed: false,
            remaining: 0,
            total: 1,
            reset_at: 10_000,
        };
        assert_eq!(decision.retry_after_secs(9_000), 1);
        assert_eq!(decision.retry_after_secs(8_999), 2);
        assert_eq!(decision.retry_after_secs(10_000), 0);
        assert_eq!(decision.retry_after_secs(9_999), 1);
    }

    #[test]
    fn test_reset_epoch_secs_rounds_up() {
        let exact = Decision {
            allowed: true,
            remaining: 1,
            total: 1,
            reset_at: 3_000,
        };
        assert_eq!(exact.reset_epoch_secs(), 3);

        let partial = Decision {
            reset_at: 3_001,
            ..exact
        };
        assert_eq!(partial.reset_epoch_secs(), 4);
    }
}
