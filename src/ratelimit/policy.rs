//! Window policies: the validated limiter configuration and the raw form it
//! is loaded from.

use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};

/// Default namespace for window record keys.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit:";
/// Default rolling window length.
const DEFAULT_WINDOW_MS: i64 = 60_000;
/// Default quota per window.
const DEFAULT_MAX: i64 = 100;

/// How `consume` turns a count into an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Read the count in one batch, write in a second. Concurrent callers can
    /// overshoot `max` by at most `(callers - 1) * cost`.
    #[default]
    TwoPhase,
    /// Trim, count and write in one store-side step. Exact, but requires a
    /// store that supports scripted admission.
    Atomic,
}

/// Immutable configuration of one sliding window limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    window_ms: u64,
    max: u64,
    key_prefix: String,
    mode: AdmissionMode,
}

impl WindowConfig {
    /// Create a two-phase window configuration.
    ///
    /// Fails with [`QuotaError::InvalidConfiguration`] if `window_ms` is zero.
    pub fn new(window_ms: u64, max: u64, key_prefix: impl Into<String>) -> Result<Self> {
        if window_ms == 0 {
            return Err(QuotaError::InvalidConfiguration(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        if window_ms > i64::MAX as u64 {
            return Err(QuotaError::InvalidConfiguration(format!(
                "window_ms {} is too large",
                window_ms
            )));
        }

        Ok(Self {
            window_ms,
            max,
            key_prefix: key_prefix.into(),
            mode: AdmissionMode::TwoPhase,
        })
    }

    /// Switch the admission mode.
    pub fn with_mode(mut self, mode: AdmissionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }
}

/// A window policy as written in a configuration file.
///
/// Numbers are signed so that negative values reach validation and are
/// reported as configuration errors instead of parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Rolling window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,

    /// Requests allowed per window
    #[serde(default = "default_max")]
    pub max: i64,

    /// Key namespace; defaults to [`DEFAULT_KEY_PREFIX`]
    #[serde(default)]
    pub key_prefix: Option<String>,

    #[serde(default)]
    pub mode: AdmissionMode,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max: DEFAULT_MAX,
            key_prefix: None,
            mode: AdmissionMode::default(),
        }
    }
}

fn default_window_ms() -> i64 {
    DEFAULT_WINDOW_MS
}

fn default_max() -> i64 {
    DEFAULT_MAX
}

impl TryFrom<PolicyConfig> for WindowConfig {
    type Error = QuotaError;

    fn try_from(policy: PolicyConfig) -> Result<Self> {
        if policy.window_ms <= 0 {
            return Err(QuotaError::InvalidConfiguration(format!(
                "window_ms must be positive, got {}",
                policy.window_ms
            )));
        }
        if policy.max < 0 {
            return Err(QuotaError::InvalidConfiguration(format!(
                "max must not be negative, got {}",
                policy.max
            )));
        }

        let prefix = policy
            .key_prefix
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
        Ok(WindowConfig::new(policy.window_ms as u64, policy.max as u64, prefix)?
            .with_mode(policy.mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_window_rejected() {
        let err = WindowConfig::new(0, 10, "rl:").unwrap_err();
        assert!(matches!(err, QuotaError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_zero_max_is_allowed() {
        let config = WindowConfig::new(1_000, 0, "rl:").unwrap();
        assert_eq!(config.max(), 0);
        assert_eq!(config.mode(), AdmissionMode::TwoPhase);
    }

    #[test]
    fn test_policy_conversion() {
        let policy = PolicyConfig {
            window_ms: 30_000,
            max: 7,
            key_prefix: Some("login:".to_string()),
            mode: AdmissionMode::Atomic,
        };
        let config = WindowConfig::try_from(policy).unwrap();
        assert_eq!(config.window_ms(), 30_000);
        assert_eq!(config.max(), 7);
        assert_eq!(config.key_prefix(), "login:");
        assert_eq!(config.mode(), AdmissionMode::Atomic);
    }

    #[test]
    fn test_policy_default_prefix() {
        let config = WindowConfig::try_from(PolicyConfig::default()).unwrap();
        assert_eq!(config.key_prefix(), DEFAULT_KEY_PREFIX);
        assert_eq!(config.window_ms(), 60_000);
        assert_eq!(config.max(), 100);
    }

    #[test]
    fn test_policy_negative_values_rejected() {
        let negative_max = PolicyConfig {
            max: -5,
            ..PolicyConfig::default()
        };
        assert!(matches!(
            WindowConfig::try_from(negative_max),
            Err(QuotaError::InvalidConfiguration(_))
        ));

        let negative_window = PolicyConfig {
            window_ms: -1,
            ..PolicyConfig::default()
        };
        assert!(matches!(
            WindowConfig::try_from(negative_window),
            Err(QuotaError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_mode_parses_snake_case() {
        let policy: PolicyConfig = serde_yaml::from_str("mode: two_phase\nmax: 3").unwrap();
        assert_eq!(policy.mode, AdmissionMode::TwoPhase);
        assert_eq!(policy.max, 3);
        assert_eq!(policy.window_ms, 60_000);
    }
}
