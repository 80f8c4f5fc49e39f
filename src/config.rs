//! Configuration management for windowgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{QuotaError, Result};
use crate::ratelimit::{PolicyConfig, WindowConfig};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "WINDOWGATE";

/// Main configuration for windowgate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowgateConfig {
    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Named window policies
    #[serde(default = "default_policies")]
    pub policies: HashMap<String, PolicyConfig>,

    /// Policy used when the caller does not name one
    #[serde(default = "default_policy_name")]
    pub default_policy: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for WindowgateConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            policies: default_policies(),
            default_policy: default_policy_name(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_policy_name() -> String {
    "default".to_string()
}

fn default_policies() -> HashMap<String, PolicyConfig> {
    let mut policies = HashMap::new();
    policies.insert(default_policy_name(), PolicyConfig::default());
    policies
}

/// Which store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,

    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_url(),
            connection_timeout_ms: default_connection_timeout(),
            response_timeout_ms: default_response_timeout(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connection_timeout() -> u64 {
    1000
}

fn default_response_timeout() -> u64 {
    500
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl WindowgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WindowgateConfig =
            serde_yaml::from_str(yaml).map_err(|e| QuotaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then apply
    /// `WINDOWGATE__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let config: WindowgateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every policy and the default policy reference.
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in &self.policies {
            WindowConfig::try_from(policy.clone()).map_err(|e| {
                QuotaError::InvalidConfiguration(format!("policy '{}': {}", name, e))
            })?;
        }

        if !self.policies.contains_key(&self.default_policy) {
            return Err(QuotaError::InvalidConfiguration(format!(
                "default policy '{}' is not defined",
                self.default_policy
            )));
        }

        Ok(())
    }

    /// Look up a policy by name, falling back to the default policy.
    pub fn policy(&self, name: Option<&str>) -> Result<&PolicyConfig> {
        let name = name.unwrap_or(&self.default_policy);
        self.policies
            .get(name)
            .ok_or_else(|| QuotaError::InvalidConfiguration(format!("unknown policy '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::AdmissionMode;

    #[test]
    fn test_default_config_is_valid() {
        let config = WindowgateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");
        assert!(config.policy(None).is_ok());
    }

    #[test]
    fn test_parse_policies() {
        let yaml = r#"
store:
  backend: memory
default_policy: api
policies:
  api:
    window_ms: 60000
    max: 100
    key_prefix: "api:"
  login:
    window_ms: 900000
    max: 5
    mode: atomic
"#;
        let config = WindowgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);

        let api = config.policy(None).unwrap();
        assert_eq!(api.max, 100);
        assert_eq!(api.key_prefix.as_deref(), Some("api:"));
        assert_eq!(api.mode, AdmissionMode::TwoPhase);

        let login = config.policy(Some("login")).unwrap();
        assert_eq!(login.mode, AdmissionMode::Atomic);
    }

    #[test]
    fn test_negative_max_rejected() {
        let yaml = r#"
policies:
  default:
    window_ms: 1000
    max: -1
"#;
        let err = WindowgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, QuotaError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
policies:
  default:
    window_ms: 0
    max: 10
"#;
        let err = WindowgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, QuotaError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_missing_default_policy_rejected() {
        let yaml = r#"
default_policy: nope
policies:
  api:
    window_ms: 1000
    max: 10
"#;
        let err = WindowgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, QuotaError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_unknown_policy_lookup() {
        let config = WindowgateConfig::default();
        assert!(matches!(
            config.policy(Some("missing")),
            Err(QuotaError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_example_config_parses() {
        let yaml = include_str!("../config/windowgate.example.yaml");
        let config = WindowgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.default_policy, "api");
        assert_eq!(config.policies.len(), 2);
        assert_eq!(config.store.response_timeout_ms, 500);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = WindowgateConfig::load(None).unwrap();
        assert_eq!(config.default_policy, "default");
        assert_eq!(config.logging.level, "info");
    }
}
