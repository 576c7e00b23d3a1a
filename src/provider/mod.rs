//! Translation Backend Abstraction
//!
//! Defines the backend traits the orchestrator routes over. Every backend
//! reports usage (characters and, for model backends, tokens) so cost can
//! be recorded in the ledger.
//!
//! ## Modules
//!
//! - `deepl`: DeepL REST API (quota signalled by HTTP 456)
//! - `openai`: OpenAI chat completions, translation and refinement
//! - `google`: Google Cloud Translation v2 REST
//! - `timeout`: per-call deadline helper

mod deepl;
mod google;
mod openai;
pub mod timeout;

pub use deepl::DeepLBackend;
pub use google::GoogleBackend;
pub use openai::OpenAiBackend;
pub use timeout::with_timeout;

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::broker::tier::{RefinerTier, Tier};
use crate::config::{BackendConfig, Config};
use crate::constants::network;
use crate::types::{OutputFormat, ProviderError, ProviderKind, Result};

/// Result of one backend call
pub type BackendResult<T> = std::result::Result<T, ProviderError>;

// =============================================================================
// Call payloads
// =============================================================================

/// Input to a translate call
#[derive(Debug, Clone, PartialEq)]
pub struct TranslateInput {
    pub text: String,
    /// `None` asks the backend to detect the source language
    pub source_lang: Option<String>,
    pub target_lang: String,
    pub format: OutputFormat,
}

/// Input to a refine call
#[derive(Debug, Clone, PartialEq)]
pub struct RefineInput {
    pub original: String,
    pub draft: String,
    pub source_lang: Option<String>,
    pub target_lang: String,
    pub model: String,
}

/// Metered usage of one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendUsage {
    pub chars: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl BackendUsage {
    pub fn chars(chars: u64) -> Self {
        Self {
            chars,
            ..Default::default()
        }
    }

    pub fn tokens(chars: u64, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            chars,
            input_tokens,
            output_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendTranslation {
    pub text: String,
    pub usage: BackendUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
    pub text: String,
    pub model: String,
    pub usage: BackendUsage,
}

/// Rough token count for backends that do not report usage (4 chars per token)
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(4) as u64
}

// =============================================================================
// Traits
// =============================================================================

#[async_trait]
pub trait TranslationBackend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn translate(&self, input: &TranslateInput) -> BackendResult<BackendTranslation>;

    /// Check whether the backend accepts our credentials
    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait RefinementBackend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn refine(&self, input: &RefineInput) -> BackendResult<Refinement>;

    async fn health_check(&self) -> bool {
        true
    }
}

pub type SharedBackend = Arc<dyn TranslationBackend>;
pub type SharedRefiner = Arc<dyn RefinementBackend>;

// =============================================================================
// Gateway
// =============================================================================

/// The ordered translation tiers plus the optional refinement backend
#[derive(Clone, Default)]
pub struct ProviderGateway {
    tiers: Vec<Tier>,
    refiner: Option<RefinerTier>,
}

impl ProviderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, backend: SharedBackend, timeout: Duration) -> Self {
        self.tiers.push(Tier::new(backend, timeout));
        self
    }

    pub fn with_refiner(mut self, refiner: SharedRefiner, timeout: Duration) -> Self {
        self.refiner = Some(RefinerTier::new(refiner, timeout));
        self
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn refiner(&self) -> Option<&RefinerTier> {
        self.refiner.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Health-check every tier and a refiner that is not also a tier, concurrently.
    /// A check that outlives its backend's deadline counts as unhealthy.
    pub async fn health_report(&self) -> Vec<(ProviderKind, bool)> {
        let tier_checks = join_all(self.tiers.iter().map(|tier| async move {
            let healthy = tokio::time::timeout(tier.timeout(), tier.backend().health_check())
                .await
                .unwrap_or(false);
            (tier.kind(), healthy)
        }));

        let refiner = self
            .refiner
            .as_ref()
            .filter(|r| !self.tiers.iter().any(|t| t.kind() == r.kind()));
        let refiner_check = async move {
            let refiner = refiner?;
            let healthy = tokio::time::timeout(refiner.timeout(), refiner.refiner().health_check())
                .await
                .unwrap_or(false);
            Some((refiner.kind(), healthy))
        };

        let (mut report, refiner_health) = futures::join!(tier_checks, refiner_check);
        report.extend(refiner_health);
        report
    }

    /// Build backends for every enabled tier that has credentials.
    /// Unusable tiers are skipped with a warning.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut gateway = Self::new();
        let mut openai: Option<Arc<OpenAiBackend>> = None;
        let default_timeout = config.routing.request_timeout_secs;

        for &kind in &config.routing.tier_order {
            let Some(backend_cfg) = usable_backend(config, kind) else {
                continue;
            };
            let timeout = Duration::from_secs(backend_cfg.timeout_secs.unwrap_or(default_timeout));

            let backend: SharedBackend = match kind {
                ProviderKind::DeepL => Arc::new(DeepLBackend::new(backend_cfg)?),
                ProviderKind::Google => Arc::new(GoogleBackend::new(backend_cfg)?),
                ProviderKind::OpenAi => {
                    let backend = Arc::new(OpenAiBackend::new(backend_cfg)?);
                    openai = Some(Arc::clone(&backend));
                    backend
                }
                ProviderKind::Cache => continue,
            };
            info!(provider = %kind, timeout_secs = timeout.as_secs(), "Configured translation tier");
            gateway = gateway.with_tier(backend, timeout);
        }

        if config.refinement.provider == ProviderKind::OpenAi {
            let refine_timeout = Duration::from_secs(config.refinement.timeout_secs);
            let refiner = match openai {
                Some(backend) => Some(backend),
                None => match usable_backend(config, ProviderKind::OpenAi) {
                    Some(cfg) => Some(Arc::new(OpenAiBackend::new(cfg)?)),
                    None => None,
                },
            };
            if let Some(refiner) = refiner {
                gateway = gateway.with_refiner(refiner, refine_timeout);
            }
        } else {
            warn!(
                provider = %config.refinement.provider,
                "Refinement backend does not support refinement; refinement disabled"
            );
        }

        if gateway.is_empty() {
            warn!("No translation tiers are configured; every request will fail");
        }

        Ok(gateway)
    }
}

fn usable_backend(config: &Config, kind: ProviderKind) -> Option<&BackendConfig> {
    let backend = config.providers.get(kind)?;
    if !backend.enabled {
        info!(provider = %kind, "Provider disabled in configuration");
        return None;
    }
    if !backend.has_api_key() {
        warn!(provider = %kind, "No API key configured; tier skipped");
        return None;
    }
    Some(backend)
}

/// HTTP client for a backend. Call deadlines are applied by the caller.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
        .build()
        .map_err(|e| crate::types::BrokerError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Read a non-success response into a classified error
pub(crate) async fn error_from_response(
    response: reqwest::Response,
    provider: ProviderKind,
) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    crate::types::ErrorClassifier::classify_http_status(status, &body, provider.as_str())
}
