//! Configuration for wildid-ai
//!
//! Loaded from `wildid.toml` (see `wildid_common::config` for file resolution).
//! Every section and field is optional; missing values take built-in defaults.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1"
//! port = 5780
//!
//! [providers]
//! vision_api_key = "..."
//!
//! [fusion]
//! acceptance_threshold = 0.4
//!
//! [fusion.provider_weights]
//! vision = 0.6
//! plantid = 1.0
//! inaturalist = 0.9
//! ```
//!
//! API keys resolve ENV → TOML; a warning is logged when both are set.

use crate::types::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use wildid_common::config::{load_toml_config, resolve_secret, ConfigFileResolver, LoggingConfig};

/// Config file name under the platform config directory
pub const CONFIG_FILE_NAME: &str = "wildid.toml";
/// Environment variable overriding the config file path
pub const CONFIG_ENV_VAR: &str = "WILDID_CONFIG";
/// Environment variable holding the Vision API key
pub const VISION_KEY_ENV_VAR: &str = "WILDID_VISION_API_KEY";
/// Environment variable holding the Plant.id API key
pub const PLANT_ID_KEY_ENV_VAR: &str = "WILDID_PLANT_ID_API_KEY";

/// Fusion configuration validation failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("provider weight for '{provider}' must be finite and non-negative, got {value}")]
    InvalidWeight { provider: String, value: f64 },

    #[error("unknown provider '{0}' in provider_weights")]
    UnknownProvider(String),

    #[error("per_provider_timeout_ms must be greater than zero")]
    ZeroTimeout,
}

impl From<ConfigError> for wildid_common::Error {
    fn from(err: ConfigError) -> Self {
        wildid_common::Error::Config(err.to_string())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// `[server]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Concurrent recognitions allowed before requests queue
    pub max_concurrent_requests: usize,
    /// How long a request waits for a free slot before 503
    pub queue_wait_ms: u64,
    /// Largest decoded image accepted by `POST /recognize`
    pub max_image_mb: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5780,
            max_concurrent_requests: 8,
            queue_wait_ms: 2000,
            max_image_mb: 2,
        }
    }
}

impl ServerConfig {
    pub fn max_image_bytes(&self) -> usize {
        self.max_image_mb as usize * 1024 * 1024
    }
}

/// `[providers]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub vision_api_key: Option<String>,
    pub plant_id_api_key: Option<String>,
    /// Daily Vision request budget (`None` = unlimited)
    pub vision_max_per_day: Option<u32>,
    /// Daily Plant.id request budget (`None` = unlimited)
    pub plant_id_max_per_day: Option<u32>,
    pub user_agent: String,
    /// Transport-level timeout for any single HTTP request
    pub http_timeout_ms: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            vision_api_key: None,
            plant_id_api_key: None,
            vision_max_per_day: Some(300),
            plant_id_max_per_day: Some(200),
            user_agent: format!("wildid/{}", env!("CARGO_PKG_VERSION")),
            http_timeout_ms: 15_000,
        }
    }
}

impl ProvidersConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms.max(1))
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Knowledge-Graph resolution TTL
    pub kg_ttl_secs: u64,
    /// Wikipedia card TTL
    pub wiki_ttl_secs: u64,
    /// Maximum entries per cache
    pub capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kg_ttl_secs: 60 * 60,
            wiki_ttl_secs: 7 * 24 * 60 * 60,
            capacity: 10_000,
        }
    }
}

/// `[fusion]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Trust weight per provider wire id; missing providers weigh 1.0
    pub provider_weights: HashMap<String, f64>,
    /// Minimum fused confidence for an identification
    pub acceptance_threshold: f64,
    /// Budget for each provider call (and for enrichment)
    pub per_provider_timeout_ms: u64,
    /// Candidates below this confidence are dropped before canonicalization
    pub min_candidate_confidence: f64,
    /// Multiplier applied to Vision label scores
    pub vision_prior: f64,
    /// Confidence assigned to Vision web best guesses
    pub web_guess_confidence: f64,
    /// Multiplier for clusters that stayed on a synthesized identity
    pub unresolved_penalty: f64,
    /// Winner margin below which the result is flagged ambiguous
    pub disambiguation_margin: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        let provider_weights = [("vision", 0.6), ("plantid", 1.0), ("inaturalist", 0.9)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        Self {
            provider_weights,
            acceptance_threshold: 0.4,
            per_provider_timeout_ms: 8000,
            min_candidate_confidence: 0.05,
            vision_prior: 0.5,
            web_guess_confidence: 0.4,
            unresolved_penalty: 0.85,
            disambiguation_margin: 0.15,
        }
    }
}

impl FusionConfig {
    /// Weight for `provider`, defaulting to 1.0
    pub fn weight(&self, provider: Provider) -> f64 {
        self.provider_weights
            .get(provider.as_str())
            .copied()
            .unwrap_or(1.0)
    }

    pub fn per_provider_timeout(&self) -> Duration {
        Duration::from_millis(self.per_provider_timeout_ms)
    }

    /// Reject values that would make fusion misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_fields = [
            ("acceptance_threshold", self.acceptance_threshold),
            ("min_candidate_confidence", self.min_candidate_confidence),
            ("vision_prior", self.vision_prior),
            ("web_guess_confidence", self.web_guess_confidence),
            ("unresolved_penalty", self.unresolved_penalty),
            ("disambiguation_margin", self.disambiguation_margin),
        ];
        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }

        if self.per_provider_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let mut providers: Vec<_> = self.provider_weights.iter().collect();
        providers.sort_by(|a, b| a.0.cmp(b.0));
        for (provider, &value) in providers {
            if Provider::from_wire(provider).is_none() {
                return Err(ConfigError::UnknownProvider(provider.clone()));
            }
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    provider: provider.clone(),
                    value,
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// Service configuration
// ============================================================================

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub providers: ProvidersConfig,
    pub cache: CacheConfig,
    pub fusion: FusionConfig,
    /// Vision key after ENV → TOML resolution
    #[serde(skip)]
    pub vision_api_key: Option<String>,
    /// Plant.id key after ENV → TOML resolution
    #[serde(skip)]
    pub plant_id_api_key: Option<String>,
}

impl ServiceConfig {
    /// Resolve, load and post-process configuration
    ///
    /// `cli_path` takes priority over `WILDID_CONFIG` and the user config directory.
    pub fn load(cli_path: Option<&Path>) -> wildid_common::Result<Self> {
        let resolver = ConfigFileResolver::new(CONFIG_FILE_NAME, CONFIG_ENV_VAR);
        let path = resolver.resolve(cli_path);
        let mut config: ServiceConfig = load_toml_config(path.as_deref())?;
        config.resolve_api_keys();
        Ok(config)
    }

    /// Fill the resolved key fields from environment and TOML
    pub fn resolve_api_keys(&mut self) {
        self.vision_api_key = resolve_secret(
            VISION_KEY_ENV_VAR,
            self.providers.vision_api_key.as_deref(),
            "Vision API key",
        );
        self.plant_id_api_key = resolve_secret(
            PLANT_ID_KEY_ENV_VAR,
            self.providers.plant_id_api_key.as_deref(),
            "Plant.id API key",
        );
    }
}
