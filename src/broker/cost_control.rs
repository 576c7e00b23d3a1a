//! Budget and quota gatekeeping
//!
//! All state is scoped to (UTC day, provider):
//! - Quota latches are written to the ledger database and stay set for
//!   the rest of the day. Positive lookups are cached in memory.
//! - Budget exceedance is recomputed from the day's ledger counters on
//!   every check and is never latched.
//! - Auth/config failures disable a provider for the process lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{Pricing, ProvidersConfig};
use crate::constants::{budget::WARNING_THRESHOLD, pricing::MILLION};
use crate::storage::{
    QuotaLatch, UsageAccount, UsageCategory, UsageDelta, UsageLedger, UsageTotals,
};
use crate::types::{ProviderKind, Result, SharedClock};

/// Billing and budget settings for one backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderPolicy {
    pub pricing: Pricing,
    /// `None` means unlimited
    pub daily_budget_usd: Option<f64>,
}

impl Default for ProviderPolicy {
    fn default() -> Self {
        Self {
            pricing: Pricing::Free,
            daily_budget_usd: None,
        }
    }
}

/// Cost of a usage quantity under a pricing model (USD)
pub fn estimate_cost(pricing: &Pricing, chars: u64, input_tokens: u64, output_tokens: u64) -> f64 {
    match pricing {
        Pricing::Free => 0.0,
        Pricing::PerChar { per_million_chars } => chars as f64 / MILLION * per_million_chars,
        Pricing::PerToken {
            input_per_million,
            output_per_million,
        } => {
            input_tokens as f64 / MILLION * input_per_million
                + output_tokens as f64 / MILLION * output_per_million
        }
    }
}

/// Why a provider may not be called right now
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible,
    QuotaLatched,
    BudgetExceeded { spent_usd: f64, limit_usd: f64 },
    Disabled(String),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Eligible => "eligible".to_string(),
            Self::QuotaLatched => "quota exhausted for today".to_string(),
            Self::BudgetExceeded {
                spent_usd,
                limit_usd,
            } => format!(
                "daily budget of ${:.2} reached (${:.4} spent); resumes at midnight UTC",
                limit_usd, spent_usd
            ),
            Self::Disabled(reason) => format!("disabled for this process: {}", reason),
        }
    }
}

/// One provider's line in the daily summary
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDaySummary {
    pub provider: ProviderKind,
    pub request_count: u64,
    pub refinement_requests: u64,
    pub char_count: u64,
    pub token_input: u64,
    pub token_output: u64,
    pub cost_usd: f64,
    pub daily_budget_usd: Option<f64>,
    pub budget_exceeded: bool,
    pub quota_latched: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub providers: Vec<ProviderDaySummary>,
    pub total_requests: u64,
    pub total_cost_usd: f64,
    #[serde(skip)]
    pub latches: Vec<QuotaLatch>,
}

pub struct CostControl {
    ledger: Arc<UsageLedger>,
    clock: SharedClock,
    policies: HashMap<ProviderKind, ProviderPolicy>,
    /// Positive latch lookups; the key carries the day so rollover misses
    latched: DashMap<(NaiveDate, ProviderKind), ()>,
    disabled: DashMap<ProviderKind, String>,
}

impl CostControl {
    pub fn new(ledger: Arc<UsageLedger>, clock: SharedClock) -> Self {
        Self {
            ledger,
            clock,
            policies: HashMap::new(),
            latched: DashMap::new(),
            disabled: DashMap::new(),
        }
    }

    /// Policies for every configured backend
    pub fn from_config(
        ledger: Arc<UsageLedger>,
        clock: SharedClock,
        providers: &ProvidersConfig,
    ) -> Self {
        ProviderKind::BACKENDS
            .into_iter()
            .filter_map(|kind| providers.get(kind).map(|cfg| (kind, cfg)))
            .fold(Self::new(ledger, clock), |control, (kind, cfg)| {
                control.with_policy(
                    kind,
                    ProviderPolicy {
                        pricing: cfg.pricing,
                        daily_budget_usd: cfg.daily_budget(),
                    },
                )
            })
    }

    pub fn with_policy(mut self, provider: ProviderKind, policy: ProviderPolicy) -> Self {
        self.policies.insert(provider, policy);
        self
    }

    pub fn policy(&self, provider: ProviderKind) -> ProviderPolicy {
        self.policies.get(&provider).copied().unwrap_or_default()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    // =========================================================================
    // Quota latch
    // =========================================================================

    pub fn is_quota_latched(&self, provider: ProviderKind) -> Result<bool> {
        let today = self.today();
        if self.latched.contains_key(&(today, provider)) {
            return Ok(true);
        }

        let latched = self.ledger.is_latched(today, provider)?;
        if latched {
            self.latched.insert((today, provider), ());
        }
        Ok(latched)
    }

    /// Mark the provider quota-exhausted for the rest of today.
    /// Returns `true` for the caller whose write created the latch.
    pub fn latch_quota(&self, provider: ProviderKind, reason: &str) -> Result<bool> {
        let now = self.clock.now();
        let today = now.date_naive();

        let created = self.ledger.latch(today, provider, Some(reason), now)?;
        self.latched.insert((today, provider), ());

        if created {
            warn!(provider = %provider, reason, "Quota exhausted; provider latched until midnight UTC");
        }
        Ok(created)
    }

    // =========================================================================
    // Budget
    // =========================================================================

    /// Today's spend over every ledger sub-category of the provider
    pub fn spend_today(&self, provider: ProviderKind) -> Result<f64> {
        let totals = self.ledger.provider_totals(self.today(), provider)?;
        Ok(self.cost_of_totals(provider, &totals))
    }

    pub fn is_budget_exceeded(&self, provider: ProviderKind) -> Result<bool> {
        let Some(limit) = self.policy(provider).daily_budget_usd else {
            return Ok(false);
        };
        let spent = self.spend_today(provider)?;
        Ok(spent >= limit)
    }

    fn cost_of_totals(&self, provider: ProviderKind, totals: &UsageTotals) -> f64 {
        estimate_cost(
            &self.policy(provider).pricing,
            totals.char_count,
            totals.token_input,
            totals.token_output,
        )
    }

    // =========================================================================
    // Usage
    // =========================================================================

    /// Add one successful call to today's ledger row for the account.
    /// A zero `cost_usd` is filled in from the provider's pricing.
    pub fn record_usage(&self, account: UsageAccount, delta: UsageDelta) -> Result<()> {
        let provider = account.provider;
        let policy = self.policy(provider);
        let delta = if delta.cost_usd > 0.0 {
            delta
        } else {
            delta.with_cost(estimate_cost(
                &policy.pricing,
                delta.chars,
                delta.input_tokens,
                delta.output_tokens,
            ))
        };

        let today = self.today();
        self.ledger.increment(today, account, &delta)?;
        debug!(
            account = %account.key(),
            chars = delta.chars,
            input_tokens = delta.input_tokens,
            output_tokens = delta.output_tokens,
            cost_usd = delta.cost_usd,
            "Recorded usage"
        );

        if let Some(limit) = policy.daily_budget_usd
            && limit > 0.0
            && let Err(e) = self.warn_on_threshold(provider, limit, delta.cost_usd)
        {
            warn!(provider = %provider, error = %e, "Failed to check budget after recording usage");
        }

        Ok(())
    }

    fn warn_on_threshold(&self, provider: ProviderKind, limit: f64, added: f64) -> Result<()> {
        let spent = self.spend_today(provider)?;
        let before = spent - added;
        let warn_at = limit * WARNING_THRESHOLD;
        if spent >= limit && before < limit {
            warn!(provider = %provider, spent, limit, "Daily budget reached; provider skipped until midnight UTC");
        } else if spent >= warn_at && before < warn_at {
            warn!(provider = %provider, spent, limit, "Approaching daily budget cap (80%+)");
        }
        Ok(())
    }

    // =========================================================================
    // Process-level disable
    // =========================================================================

    pub fn disable_for_process(&self, provider: ProviderKind, reason: &str) {
        if self
            .disabled
            .insert(provider, reason.to_string())
            .is_none()
        {
            warn!(provider = %provider, reason, "Provider disabled for this process");
        }
    }

    pub fn is_disabled(&self, provider: ProviderKind) -> bool {
        self.disabled.contains_key(&provider)
    }

    pub fn disabled_reason(&self, provider: ProviderKind) -> Option<String> {
        self.disabled.get(&provider).map(|r| r.value().clone())
    }

    /// Combined pre-call check, cheapest first
    pub fn eligibility(&self, provider: ProviderKind) -> Result<Eligibility> {
        if let Some(reason) = self.disabled_reason(provider) {
            return Ok(Eligibility::Disabled(reason));
        }
        if self.is_quota_latched(provider)? {
            return Ok(Eligibility::QuotaLatched);
        }
        if let Some(limit) = self.policy(provider).daily_budget_usd {
            let spent = self.spend_today(provider)?;
            if spent >= limit {
                return Ok(Eligibility::BudgetExceeded {
                    spent_usd: spent,
                    limit_usd: limit,
                });
            }
        }
        Ok(Eligibility::Eligible)
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    pub fn daily_summary(&self, date: Option<NaiveDate>) -> Result<DailySummary> {
        let date = date.unwrap_or_else(|| self.today());
        let records = self.ledger.for_date(date)?;
        let latches = self.ledger.latches_for_date(date)?;

        let mut providers: Vec<ProviderDaySummary> = Vec::new();
        for record in &records {
            let Some(account) = record.usage_account() else {
                warn!(account = %record.account, "Skipping unknown ledger account");
                continue;
            };

            let idx = match providers.iter().position(|p| p.provider == account.provider) {
                Some(idx) => idx,
                None => {
                    providers.push(self.empty_line(account.provider, &latches));
                    providers.len() - 1
                }
            };
            let line = &mut providers[idx];
            line.request_count += record.request_count;
            if account.category == UsageCategory::Refinement {
                line.refinement_requests += record.request_count;
            }
            line.char_count += record.char_count;
            line.token_input += record.token_input;
            line.token_output += record.token_output;
        }

        for latch in &latches {
            if !providers.iter().any(|p| p.provider == latch.provider) {
                providers.push(self.empty_line(latch.provider, &latches));
            }
        }

        for line in &mut providers {
            let pricing = self.policy(line.provider).pricing;
            line.cost_usd =
                estimate_cost(&pricing, line.char_count, line.token_input, line.token_output);
            line.budget_exceeded = line
                .daily_budget_usd
                .is_some_and(|limit| line.cost_usd >= limit);
        }

        providers.sort_by_key(|p| {
            ProviderKind::BACKENDS
                .iter()
                .position(|k| *k == p.provider)
                .unwrap_or(usize::MAX)
        });

        Ok(DailySummary {
            date,
            total_requests: providers.iter().map(|p| p.request_count).sum(),
            total_cost_usd: providers.iter().map(|p| p.cost_usd).sum(),
            providers,
            latches,
        })
    }

    fn empty_line(&self, provider: ProviderKind, latches: &[QuotaLatch]) -> ProviderDaySummary {
        ProviderDaySummary {
            provider,
            request_count: 0,
            refinement_requests: 0,
            char_count: 0,
            token_input: 0,
            token_output: 0,
            cost_usd: 0.0,
            daily_budget_usd: self.policy(provider).daily_budget_usd,
            budget_exceeded: false,
            quota_latched: latches.iter().any(|l| l.provider == provider),
        }
    }
}
