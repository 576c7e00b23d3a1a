//! Tier descriptors and per-attempt outcomes

use std::time::Duration;

use super::cost_control::Eligibility;
use crate::provider::{BackendTranslation, SharedBackend, SharedRefiner};
use crate::types::{ProviderError, ProviderKind};

/// One translation backend in the chain with its call deadline
#[derive(Clone)]
pub struct Tier {
    backend: SharedBackend,
    timeout: Duration,
}

impl Tier {
    pub fn new(backend: SharedBackend, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn kind(&self) -> ProviderKind {
        self.backend.kind()
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("kind", &self.kind())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// The refinement backend with its call deadline
#[derive(Clone)]
pub struct RefinerTier {
    refiner: SharedRefiner,
    timeout: Duration,
}

impl RefinerTier {
    pub fn new(refiner: SharedRefiner, timeout: Duration) -> Self {
        Self { refiner, timeout }
    }

    pub fn kind(&self) -> ProviderKind {
        self.refiner.kind()
    }

    pub fn refiner(&self) -> &SharedRefiner {
        &self.refiner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// What happened at one tier of the translate chain
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    Success(BackendTranslation),
    /// Hard quota signal; the provider is latched for the day
    QuotaExceeded(String),
    /// Timeout, 5xx, rate limit or request-specific rejection
    Transient(String),
    /// Auth/config failure; the provider is disabled for the process
    Fatal(String),
    /// Not called: latched, over budget or disabled
    Skipped(Eligibility),
}

impl TierOutcome {
    pub fn from_error(err: ProviderError) -> Self {
        let reason = err.message().to_string();
        if err.is_quota() {
            Self::QuotaExceeded(reason)
        } else if err.is_permanent() {
            Self::Fatal(reason)
        } else {
            Self::Transient(reason)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
            Self::Skipped(_) => "skipped",
        }
    }
}

/// Tier list for one request: the preferred provider, when present in the
/// chain, moves to the front and the rest keep their order.
pub fn reorder_for_preference(tiers: &[Tier], preferred: Option<ProviderKind>) -> Vec<Tier> {
    let mut ordered: Vec<Tier> = tiers.to_vec();
    if let Some(preferred) = preferred
        && let Some(idx) = ordered.iter().position(|t| t.kind() == preferred)
    {
        let tier = ordered.remove(idx);
        ordered.insert(0, tier);
    }
    ordered
}
