//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/transroute/) and project (./transroute.toml) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{budget, cache, database, models, network, pricing};
use crate::types::{BrokerError, ProviderKind, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Embedded database settings
    pub database: DatabaseConfig,

    /// Tier ordering and call timeouts
    pub routing: RoutingConfig,

    /// Post-hoc refinement settings
    pub refinement: RefinementConfig,

    /// Translation cache settings
    pub cache: CacheConfig,

    /// Per-backend settings
    pub providers: ProvidersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database: DatabaseConfig::default(),
            routing: RoutingConfig::default(),
            refinement: RefinementConfig::default(),
            cache: CacheConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `BrokerError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.routing.tier_order.is_empty() {
            return Err(BrokerError::Config(
                "routing.tier_order must list at least one provider".to_string(),
            ));
        }

        for (idx, kind) in self.routing.tier_order.iter().enumerate() {
            if !kind.is_backend() {
                return Err(BrokerError::Config(format!(
                    "routing.tier_order contains '{}', which is not a translation backend",
                    kind
                )));
            }
            if self.routing.tier_order[..idx].contains(kind) {
                return Err(BrokerError::Config(format!(
                    "routing.tier_order lists '{}' more than once",
                    kind
                )));
            }
        }

        if self.routing.request_timeout_secs == 0 {
            return Err(BrokerError::Config(
                "routing.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !self.refinement.provider.is_backend() {
            return Err(BrokerError::Config(
                "refinement.provider must be a translation backend".to_string(),
            ));
        }

        if self.refinement.timeout_secs == 0 {
            return Err(BrokerError::Config(
                "refinement.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.cache.expire_after_days == 0 {
            return Err(BrokerError::Config(
                "cache.expire_after_days must be greater than 0".to_string(),
            ));
        }

        if self.cache.ttl_days == Some(0) {
            return Err(BrokerError::Config(
                "cache.ttl_days must be greater than 0 when set".to_string(),
            ));
        }

        for kind in ProviderKind::BACKENDS {
            if let Some(backend) = self.providers.get(kind) {
                backend.validate(kind)?;
            }
        }

        Ok(())
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file (defaults to the platform data directory)
    pub path: Option<PathBuf>,

    /// How long a writer waits on a locked database (milliseconds)
    pub busy_timeout_ms: u32,

    /// Connection pool size (defaults to CPU-based sizing)
    pub pool_size: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: database::BUSY_TIMEOUT_MS,
            pool_size: None,
        }
    }
}

impl DatabaseConfig {
    /// Configured path, else `<data dir>/transroute.db`, else the working directory
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }

        directories::ProjectDirs::from("", "", "transroute")
            .map(|dirs| dirs.data_dir().join(database::DEFAULT_DB_FILE))
            .unwrap_or_else(|| PathBuf::from(database::DEFAULT_DB_FILE))
    }
}

// =============================================================================
// Routing Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Translation tiers in priority order
    pub tier_order: Vec<ProviderKind>,

    /// Per-call timeout used when a backend sets none (seconds)
    pub request_timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            tier_order: ProviderKind::BACKENDS.to_vec(),
            request_timeout_secs: network::DEFAULT_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Refinement Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Backend that performs refinement
    pub provider: ProviderKind,

    /// Default model when the request names none
    pub model: String,

    /// Refinement call timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: models::OPENAI_REFINEMENT_MODEL.to_string(),
            timeout_secs: network::REFINEMENT_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Sweep removes entries not read for this many days
    pub expire_after_days: u32,

    /// Hard lifetime of new entries; `None` keeps them until swept
    pub ttl_days: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expire_after_days: cache::EXPIRE_AFTER_DAYS,
            ttl_days: None,
        }
    }
}

// =============================================================================
// Provider Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub deepl: BackendConfig,
    pub openai: BackendConfig,
    pub google: BackendConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            deepl: BackendConfig {
                pricing: Pricing::Free,
                daily_budget_usd: None,
                ..BackendConfig::default()
            },
            openai: BackendConfig {
                model: Some(models::OPENAI_TRANSLATION_MODEL.to_string()),
                pricing: Pricing::PerToken {
                    input_per_million: pricing::OPENAI_INPUT_PER_MILLION,
                    output_per_million: pricing::OPENAI_OUTPUT_PER_MILLION,
                },
                daily_budget_usd: Some(budget::OPENAI_DAILY_USD),
                ..BackendConfig::default()
            },
            google: BackendConfig {
                pricing: Pricing::PerChar {
                    per_million_chars: pricing::GOOGLE_PER_MILLION_CHARS,
                },
                daily_budget_usd: Some(budget::GOOGLE_DAILY_USD),
                ..BackendConfig::default()
            },
        }
    }
}

impl ProvidersConfig {
    /// Settings for a backend; `None` for the cache pseudo-provider
    pub fn get(&self, kind: ProviderKind) -> Option<&BackendConfig> {
        match kind {
            ProviderKind::DeepL => Some(&self.deepl),
            ProviderKind::OpenAi => Some(&self.openai),
            ProviderKind::Google => Some(&self.google),
            ProviderKind::Cache => None,
        }
    }

    pub fn get_mut(&mut self, kind: ProviderKind) -> Option<&mut BackendConfig> {
        match kind {
            ProviderKind::DeepL => Some(&mut self.deepl),
            ProviderKind::OpenAi => Some(&mut self.openai),
            ProviderKind::Google => Some(&mut self.google),
            ProviderKind::Cache => None,
        }
    }
}

/// Settings for one external backend
///
/// Note: `api_key` is never serialized to output and is redacted in debug
/// output. Backends convert it to `SecretString` on construction.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub enabled: bool,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Custom endpoint (e.g. DeepL free-tier host or an OpenAI-compatible proxy)
    pub api_base: Option<String>,

    /// Model name, for model-based backends
    pub model: Option<String>,

    /// Per-call timeout (seconds); falls back to `routing.request_timeout_secs`
    pub timeout_secs: Option<u64>,

    /// Daily spend limit in USD; `None` means unlimited
    pub daily_budget_usd: Option<f64>,

    /// Ignore `daily_budget_usd`, including a built-in default
    pub unlimited_budget: bool,

    pub pricing: Pricing,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            api_base: None,
            model: None,
            timeout_secs: None,
            daily_budget_usd: None,
            unlimited_budget: false,
            pricing: Pricing::Free,
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("daily_budget_usd", &self.daily_budget_usd)
            .field("unlimited_budget", &self.unlimited_budget)
            .field("pricing", &self.pricing)
            .finish()
    }
}

impl BackendConfig {
    fn validate(&self, kind: ProviderKind) -> Result<()> {
        if let Some(budget) = self.daily_budget_usd
            && !(budget.is_finite() && budget >= 0.0)
        {
            return Err(BrokerError::Config(format!(
                "providers.{}.daily_budget_usd must be a non-negative number, got {}",
                kind, budget
            )));
        }

        if self.timeout_secs == Some(0) {
            return Err(BrokerError::Config(format!(
                "providers.{}.timeout_secs must be greater than 0",
                kind
            )));
        }

        if let Some(base) = &self.api_base {
            url::Url::parse(base).map_err(|e| {
                BrokerError::Config(format!(
                    "providers.{}.api_base '{}' is not a valid URL: {}",
                    kind, base, e
                ))
            })?;
        }

        self.pricing.validate(kind)
    }

    /// Effective daily limit in USD
    pub fn daily_budget(&self) -> Option<f64> {
        if self.unlimited_budget {
            None
        } else {
            self.daily_budget_usd
        }
    }

    /// Whether an API key is present and non-blank
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// How a backend bills usage (USD)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "billing", rename_all = "snake_case")]
pub enum Pricing {
    /// No metered cost (flat-rate or quota-only plans)
    #[default]
    Free,
    PerChar {
        per_million_chars: f64,
    },
    PerToken {
        input_per_million: f64,
        output_per_million: f64,
    },
}

impl Pricing {
    fn validate(&self, kind: ProviderKind) -> Result<()> {
        let prices: &[f64] = match self {
            Self::Free => &[],
            Self::PerChar { per_million_chars } => &[*per_million_chars],
            Self::PerToken {
                input_per_million,
                output_per_million,
            } => &[*input_per_million, *output_per_million],
        };

        if prices.iter().any(|p| !(p.is_finite() && *p >= 0.0)) {
            return Err(BrokerError::Config(format!(
                "providers.{}.pricing must not contain negative prices",
                kind
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
