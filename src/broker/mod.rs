//! Request broker
//!
//! - `key`: deterministic cache keys from normalized request content
//! - `cost_control`: daily budgets, quota latches and process-level disables
//! - `tier`: tier descriptors and per-attempt outcomes
//! - `orchestrator`: the per-request workflow

pub mod cost_control;
pub mod key;
pub mod orchestrator;
pub mod tier;

pub use cost_control::{
    CostControl, DailySummary, Eligibility, ProviderDaySummary, ProviderPolicy, estimate_cost,
};
pub use key::{CacheKey, KeyMaterial, compute_key, normalize_lang, normalize_text};
pub use orchestrator::Orchestrator;
pub use tier::{RefinerTier, Tier, TierOutcome, reorder_for_preference};
