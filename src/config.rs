//! Core Configuration
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Project config (storyloom.toml, if present)
//! 3. Environment variables (STORYLOOM_* prefix)
//!
//! API keys are never serialized back out and are redacted in debug output.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::{credits, network, sampling};
use crate::request::SamplingParams;

/// Setup-time configuration failure. Never crosses a session's result
/// boundary; it happens before any session exists.
#[derive(Debug, Clone, Error)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);

// =============================================================================
// Sections
// =============================================================================

/// Generation backend connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the generation service.
    pub endpoint: String,
    /// Model name requested per generation.
    pub model: String,
    /// Bearer token; never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            model: "narrator-large".to_string(),
            api_key: None,
        }
    }
}

/// Deadlines applied by the controller. The upstream protocol specifies no
/// timeout of its own, so these are deliberately conservative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for opening the stream (seconds).
    pub open_secs: u64,
    /// Maximum silence between fragments (seconds).
    pub stall_secs: u64,
    /// Deadline for the balance query (seconds).
    pub balance_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            open_secs: network::OPEN_TIMEOUT_SECS,
            stall_secs: network::STALL_TIMEOUT_SECS,
            balance_secs: network::BALANCE_TIMEOUT_SECS,
        }
    }
}

impl TimeoutConfig {
    /// Short deadlines for tests and local development.
    pub fn fast() -> Self {
        Self {
            open_secs: 2,
            stall_secs: 2,
            balance_secs: 2,
        }
    }

    pub fn open(&self) -> Duration {
        Duration::from_secs(self.open_secs)
    }

    pub fn stall(&self) -> Duration {
        Duration::from_secs(self.stall_secs)
    }

    pub fn balance(&self) -> Duration {
        Duration::from_secs(self.balance_secs)
    }
}

/// Credit ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditConfig {
    /// Balance-query endpoint of the account service.
    pub balance_endpoint: String,
    /// Delay before the post-session balance re-read (milliseconds).
    pub settle_delay_ms: u64,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            balance_endpoint: "http://localhost:8080/v1/credits".to_string(),
            settle_delay_ms: credits::SETTLE_DELAY_MS,
        }
    }
}

impl CreditConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// =============================================================================
// Root Config
// =============================================================================

/// Root configuration of the generation core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub credits: CreditConfig,
}

impl CoreConfig {
    /// Load with the full resolution chain: defaults → `storyloom.toml`
    /// (if present) → `STORYLOOM_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let project = Path::new("storyloom.toml");
        if project.exists() {
            debug!("loading config from {}", project.display());
            figment = figment.merge(Toml::file(project));
        }

        figment = figment.merge(Env::prefixed("STORYLOOM_").split("_").lowercase(true));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file only (plus defaults).
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants figment cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.backend.endpoint)?;
        validate_endpoint(&self.credits.balance_endpoint)?;

        if !(0.0..=sampling::MAX_TEMPERATURE).contains(&self.sampling.temperature) {
            return Err(ConfigError(format!(
                "temperature {} out of range 0.0..={}",
                self.sampling.temperature,
                sampling::MAX_TEMPERATURE
            )));
        }
        if self.timeouts.open_secs == 0 || self.timeouts.stall_secs == 0 {
            return Err(ConfigError("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Endpoint Validation
// =============================================================================

/// Validate an endpoint URL: http/https only, warn for non-localhost
/// targets, strip a trailing slash for consistency.
pub(crate) fn validate_endpoint(endpoint: &str) -> Result<String, ConfigError> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| ConfigError(format!("invalid endpoint URL '{}': {}", endpoint, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError(format!(
            "endpoint must use http or https scheme, got: {}",
            url.scheme()
        )));
    }

    if let Some(host) = url.host_str()
        && !matches!(host, "localhost" | "127.0.0.1" | "::1")
    {
        warn!(
            "generation endpoint is not localhost: {}. Ensure this is intentional.",
            host
        );
    }

    let mut result = url.to_string();
    if result.ends_with('/') {
        result.pop();
    }
    Ok(result)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.open_secs, network::OPEN_TIMEOUT_SECS);
        assert_eq!(config.credits.settle_delay_ms, credits::SETTLE_DELAY_MS);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[backend]
endpoint = "http://localhost:9999"
model = "narrator-small"

[timeouts]
stall_secs = 30
"#
        )
        .unwrap();

        let config = CoreConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.backend.endpoint, "http://localhost:9999");
        assert_eq!(config.backend.model, "narrator-small");
        assert_eq!(config.timeouts.stall_secs, 30);
        // Untouched sections keep defaults.
        assert_eq!(config.timeouts.open_secs, network::OPEN_TIMEOUT_SECS);
    }

    #[test]
    fn test_env_override() {
        // SAFETY: This test runs in isolation
        unsafe {
            std::env::set_var("STORYLOOM_BACKEND_MODEL", "narrator-test");
        }
        let config = CoreConfig::load().unwrap();
        assert_eq!(config.backend.model, "narrator-test");
        unsafe {
            std::env::remove_var("STORYLOOM_BACKEND_MODEL");
        }
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let config = CoreConfig {
            backend: BackendConfig {
                endpoint: "ftp://localhost".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_temperature() {
        let config = CoreConfig {
            sampling: SamplingParams {
                temperature: 9.0,
                seed: None,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_trailing_slash_stripped() {
        let endpoint = validate_endpoint("http://localhost:8080/").unwrap();
        assert_eq!(endpoint, "http://localhost:8080");
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let config = BackendConfig {
            api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("sk-secret"));
    }
}
