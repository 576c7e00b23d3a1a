//! Request orchestration
//!
//! ```text
//! CACHE_LOOKUP ─┬─> CACHE_HIT_RETURN
//!               └─> TRANSLATE_CHAIN ─┬─> REFINE_OPTIONAL ─> PERSIST ─> DONE
//!                                    └─> ALL_FAILED
//! ```
//!
//! Tiers are tried in priority order until one succeeds. A quota signal
//! latches the tier for the day, an auth failure disables it for the
//! process, anything else moves on to the next tier. Only successful calls
//! are written to the ledger.

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration as ChronoDuration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::cost_control::CostControl;
use super::key::KeyMaterial;
use super::tier::{RefinerTier, TierOutcome, reorder_for_preference};
use crate::config::Config;
use crate::provider::{
    BackendTranslation, ProviderGateway, RefineInput, Refinement, TranslateInput, with_timeout,
};
use crate::storage::{
    CacheStore, Database, PoolConfig, TranslationRecord, UsageAccount, UsageDelta, UsageLedger,
};
use crate::types::{
    BrokerError, ProviderKind, Result, SharedClock, TranslationData, TranslationRequest,
    TranslationResponse,
};

pub struct Orchestrator {
    cache: Arc<CacheStore>,
    cost: Arc<CostControl>,
    gateway: ProviderGateway,
    clock: SharedClock,
    refinement_model: String,
    ttl: Option<ChronoDuration>,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<CacheStore>,
        cost: Arc<CostControl>,
        gateway: ProviderGateway,
        clock: SharedClock,
    ) -> Self {
        Self {
            cache,
            cost,
            gateway,
            clock,
            refinement_model: crate::constants::models::OPENAI_REFINEMENT_MODEL.to_string(),
            ttl: None,
        }
    }

    /// Model used when a request does not name one
    pub fn with_refinement_model(mut self, model: impl Into<String>) -> Self {
        self.refinement_model = model.into();
        self
    }

    /// New rows expire this many days after they are written
    pub fn with_ttl_days(mut self, days: Option<u32>) -> Self {
        self.ttl = days.map(|d| ChronoDuration::days(i64::from(d)));
        self
    }

    /// Open the configured database and wire every component
    pub fn from_config(config: &Config, clock: SharedClock) -> Result<Self> {
        let mut pool = PoolConfig::auto().with_busy_timeout(config.database.busy_timeout_ms);
        if let Some(size) = config.database.pool_size {
            pool = pool.with_max_size(size);
        }
        let db = Arc::new(Database::open_with_config(config.database.resolved_path(), pool)?);
        db.initialize()?;

        let cache = Arc::new(CacheStore::new(Arc::clone(&db), Arc::clone(&clock)));
        let ledger = Arc::new(UsageLedger::new(db));
        let cost = Arc::new(CostControl::from_config(
            ledger,
            Arc::clone(&clock),
            &config.providers,
        ));
        let gateway = ProviderGateway::from_config(config)?;

        Ok(Self::new(cache, cost, gateway, clock)
            .with_refinement_model(config.refinement.model.clone())
            .with_ttl_days(config.cache.ttl_days))
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn cost_control(&self) -> &CostControl {
        &self.cost
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Run one request to completion. Failures are reported in the
    /// response; the original text is never returned in place of a
    /// translation.
    #[instrument(
        skip(self, request),
        fields(
            request_id = %Uuid::new_v4(),
            target_lang = %request.target_lang,
            refine = request.enable_refinement,
        )
    )]
    pub async fn translate(&self, request: &TranslationRequest) -> TranslationResponse {
        let start = Instant::now();
        match self.run(request, start).await {
            Ok(data) => {
                info!(
                    provider = %data.provider,
                    cached = data.is_cached,
                    refined = data.is_refined,
                    elapsed_ms = data.processing_time_ms,
                    "Translation complete"
                );
                TranslationResponse::ok(data)
            }
            Err(e) => {
                warn!(error = %e, "Translation failed");
                TranslationResponse::failed(e.to_string())
            }
        }
    }

    async fn run(&self, request: &TranslationRequest, start: Instant) -> Result<TranslationData> {
        validate_request(request)?;

        let material = KeyMaterial::from_request(request);
        let key = material.key();

        if let Some(record) = self.cache.get(key.as_str())? {
            return self.serve_cached(request, &material, record, start).await;
        }
        debug!(cache_key = %key, "Cache miss");

        let (provider, draft) = self.translate_chain(request, &material).await?;

        let refinement = if request.enable_refinement {
            self.refine(request, &material, provider, &draft.text).await
        } else {
            None
        };

        let now = self.clock.now();
        let is_refined = refinement.is_some();
        let (text, refinement_model) = match refinement {
            Some(r) => (r.text, Some(r.model)),
            None => (draft.text, None),
        };
        let char_count = material.text.chars().count();

        let record = TranslationRecord {
            cache_key: key.to_string(),
            source_lang: material.source_lang.clone(),
            target_lang: material.target_lang.clone(),
            output_format: material.format,
            original_text: material.text.clone(),
            translated_text: text.clone(),
            provider,
            is_refined,
            refinement_model,
            char_count,
            created_at: now,
            last_accessed_at: now,
            expires_at: self.ttl.map(|ttl| now + ttl),
        };
        self.persist(&record);

        Ok(TranslationData {
            text,
            provider,
            is_refined,
            is_cached: false,
            char_count,
            processing_time_ms: elapsed_ms(start),
        })
    }

    /// A hit is returned as-is unless refinement was asked for and the row
    /// is still a draft. In that case only the cached draft is refined.
    async fn serve_cached(
        &self,
        request: &TranslationRequest,
        material: &KeyMaterial,
        mut record: TranslationRecord,
        start: Instant,
    ) -> Result<TranslationData> {
        if request.enable_refinement && !record.is_refined {
            debug!(cache_key = %record.cache_key, "Cached draft needs refinement");
            if let Some(refinement) = self
                .refine(request, material, record.provider, &record.translated_text)
                .await
            {
                let now = self.clock.now();
                record.translated_text = refinement.text;
                record.is_refined = true;
                record.refinement_model = Some(refinement.model);
                record.last_accessed_at = now;
                self.persist(&record);

                return Ok(TranslationData {
                    text: record.translated_text,
                    provider: record.provider,
                    is_refined: true,
                    is_cached: false,
                    char_count: record.char_count,
                    processing_time_ms: elapsed_ms(start),
                });
            }
        }

        if let Err(e) = self.cache.touch(&record.cache_key) {
            warn!(cache_key = %record.cache_key, error = %e, "Failed to update cache access time");
        }
        debug!(cache_key = %record.cache_key, "Cache hit");

        Ok(TranslationData {
            text: record.translated_text,
            provider: ProviderKind::Cache,
            is_refined: record.is_refined,
            is_cached: true,
            char_count: record.char_count,
            processing_time_ms: elapsed_ms(start),
        })
    }

    // =========================================================================
    // Translate chain
    // =========================================================================

    async fn translate_chain(
        &self,
        request: &TranslationRequest,
        material: &KeyMaterial,
    ) -> Result<(ProviderKind, BackendTranslation)> {
        let tiers = reorder_for_preference(self.gateway.tiers(), request.preferred_provider);
        let input = TranslateInput {
            text: material.text.clone(),
            source_lang: material.backend_source_lang().map(str::to_string),
            target_lang: material.target_lang.clone(),
            format: material.format,
        };

        for tier in &tiers {
            let kind = tier.kind();

            let eligibility = self.cost.eligibility(kind)?;
            let outcome = if eligibility.is_eligible() {
                let call = async {
                    tier.backend()
                        .translate(&input)
                        .await
                        .map_err(BrokerError::from)
                };
                match with_timeout(tier.timeout(), call, &format!("{} translate", kind)).await {
                    Ok(translation) => TierOutcome::Success(translation),
                    Err(e) => TierOutcome::from_error(e.into_provider_error()),
                }
            } else {
                TierOutcome::Skipped(eligibility)
            };

            match outcome {
                TierOutcome::Success(translation) => {
                    self.record(
                        UsageAccount::translation(kind),
                        UsageDelta::request(translation.usage.chars).with_tokens(
                            translation.usage.input_tokens,
                            translation.usage.output_tokens,
                        ),
                    );
                    info!(provider = %kind, "Tier succeeded");
                    return Ok((kind, translation));
                }
                TierOutcome::QuotaExceeded(reason) => {
                    self.latch(kind, &reason);
                }
                TierOutcome::Transient(reason) => {
                    warn!(provider = %kind, reason = %reason, "Tier failed; trying next");
                }
                TierOutcome::Fatal(reason) => {
                    self.cost.disable_for_process(kind, &reason);
                }
                TierOutcome::Skipped(why) => {
                    debug!(provider = %kind, reason = %why.describe(), "Tier skipped");
                }
            }
        }

        Err(BrokerError::AllProvidersExhausted)
    }

    // =========================================================================
    // Refinement
    // =========================================================================

    /// Refine a draft. Every failure is logged and yields `None`.
    async fn refine(
        &self,
        request: &TranslationRequest,
        material: &KeyMaterial,
        draft_provider: ProviderKind,
        draft: &str,
    ) -> Option<Refinement> {
        let refiner = self.gateway.refiner()?;
        let kind = refiner.kind();

        if kind == draft_provider {
            debug!(provider = %kind, "Draft already produced by the refinement backend");
            return None;
        }

        match self.cost.eligibility(kind) {
            Ok(eligibility) if eligibility.is_eligible() => {}
            Ok(eligibility) => {
                debug!(provider = %kind, reason = %eligibility.describe(), "Refinement skipped");
                return None;
            }
            Err(e) => {
                warn!(provider = %kind, error = %e, "Refinement eligibility check failed");
                return None;
            }
        }

        let input = RefineInput {
            original: material.text.clone(),
            draft: draft.to_string(),
            source_lang: material.backend_source_lang().map(str::to_string),
            target_lang: material.target_lang.clone(),
            model: request
                .refinement_model
                .clone()
                .unwrap_or_else(|| self.refinement_model.clone()),
        };

        match self.call_refiner(refiner, &input).await {
            Ok(refinement) => {
                self.record(
                    UsageAccount::refinement(kind),
                    UsageDelta::request(refinement.usage.chars).with_tokens(
                        refinement.usage.input_tokens,
                        refinement.usage.output_tokens,
                    ),
                );
                info!(provider = %kind, model = %refinement.model, "Refinement applied");
                Some(refinement)
            }
            Err(TierOutcome::QuotaExceeded(reason)) => {
                debug!(provider = %kind, "Refinement quota exhausted; keeping draft");
                self.latch(kind, &reason);
                None
            }
            Err(TierOutcome::Fatal(reason)) => {
                self.cost.disable_for_process(kind, &reason);
                None
            }
            Err(other) => {
                warn!(provider = %kind, outcome = other.label(), "Refinement failed; keeping draft");
                None
            }
        }
    }

    async fn call_refiner(
        &self,
        refiner: &RefinerTier,
        input: &RefineInput,
    ) -> std::result::Result<Refinement, TierOutcome> {
        let call = async {
            refiner
                .refiner()
                .refine(input)
                .await
                .map_err(BrokerError::from)
        };
        with_timeout(refiner.timeout(), call, &format!("{} refine", refiner.kind()))
            .await
            .map_err(|e| TierOutcome::from_error(e.into_provider_error()))
    }

    // =========================================================================
    // Write-through
    // =========================================================================

    fn record(&self, account: UsageAccount, delta: UsageDelta) {
        if let Err(e) = self.cost.record_usage(account, delta) {
            error!(account = %account.key(), error = %e, "Failed to record usage");
        }
    }

    fn latch(&self, provider: ProviderKind, reason: &str) {
        if let Err(e) = self.cost.latch_quota(provider, reason) {
            error!(provider = %provider, error = %e, "Failed to persist quota latch");
        }
    }

    fn persist(&self, record: &TranslationRecord) {
        if let Err(e) = self.cache.upsert(record) {
            error!(cache_key = %record.cache_key, error = %e, "Failed to write translation to cache");
        }
    }
}

fn validate_request(request: &TranslationRequest) -> Result<()> {
    if request.text.trim().is_empty() {
        return Err(BrokerError::InvalidRequest("text is empty".to_string()));
    }
    if request.target_lang.trim().is_empty() {
        return Err(BrokerError::InvalidRequest(
            "target language is empty".to_string(),
        ));
    }
    Ok(())
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ProviderPolicy;
    use crate::config::Pricing;
    use crate::provider::{BackendResult, BackendUsage, RefinementBackend, TranslationBackend};
    use crate::types::{ManualClock, OutputFormat, ProviderError};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const CALL_TIMEOUT: Duration = Duration::from_millis(300);

    #[derive(Clone)]
    enum Behavior {
        Succeed(&'static str),
        Fail(ProviderError),
        Hang,
    }

    struct MockBackend {
        kind: ProviderKind,
        behavior: Behavior,
        calls: AtomicU32,
    }

    impl MockBackend {
        fn new(kind: ProviderKind, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationBackend for MockBackend {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn translate(&self, input: &TranslateInput) -> BackendResult<BackendTranslation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed(text) => Ok(BackendTranslation {
                    text: text.to_string(),
                    usage: BackendUsage::tokens(input.text.chars().count() as u64, 100, 50),
                }),
                Behavior::Fail(err) => Err(err.clone()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(ProviderError::Transient("unreachable".into()))
                }
            }
        }
    }

    #[async_trait]
    impl RefinementBackend for MockBackend {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn refine(&self, input: &RefineInput) -> BackendResult<Refinement> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed(text) => Ok(Refinement {
                    text: text.to_string(),
                    model: input.model.clone(),
                    usage: BackendUsage::tokens(input.original.chars().count() as u64, 200, 80),
                }),
                Behavior::Fail(err) => Err(err.clone()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(ProviderError::Transient("unreachable".into()))
                }
            }
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn cost(&self) -> &CostControl {
            self.orchestrator.cost_control()
        }

        fn ledger_requests(&self, account: UsageAccount) -> u64 {
            self.cost()
                .ledger()
                .get(self.cost().today(), account)
                .unwrap()
                .map(|r| r.request_count)
                .unwrap_or(0)
        }

        fn cache_rows(&self) -> u64 {
            self.orchestrator.cache().stats().unwrap().total_entries
        }
    }

    fn harness(tiers: Vec<Arc<MockBackend>>, refiner: Option<Arc<MockBackend>>) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.initialize().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
        ));
        let shared_clock: SharedClock = clock.clone();

        let cache = Arc::new(CacheStore::new(Arc::clone(&db), Arc::clone(&shared_clock)));
        let ledger = Arc::new(UsageLedger::new(db));
        let cost = CostControl::new(ledger, Arc::clone(&shared_clock))
            .with_policy(
                ProviderKind::Google,
                ProviderPolicy {
                    pricing: Pricing::PerChar {
                        per_million_chars: 20.0,
                    },
                    daily_budget_usd: Some(10.0),
                },
            )
            .with_policy(
                ProviderKind::OpenAi,
                ProviderPolicy {
                    pricing: Pricing::PerToken {
                        input_per_million: 0.15,
                        output_per_million: 0.60,
                    },
                    daily_budget_usd: Some(5.0),
                },
            );

        let mut gateway = ProviderGateway::new();
        for tier in tiers {
            gateway = gateway.with_tier(tier, CALL_TIMEOUT);
        }
        if let Some(refiner) = refiner {
            gateway = gateway.with_refiner(refiner, CALL_TIMEOUT);
        }

        Harness {
            orchestrator: Orchestrator::new(cache, Arc::new(cost), gateway, shared_clock),
            clock,
        }
    }

    fn request(text: &str) -> TranslationRequest {
        TranslationRequest::new(text, "fr").from_lang("en")
    }

    #[tokio::test]
    async fn test_fresh_request_uses_first_tier_and_caches() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("Bonjour"));
        let h = harness(vec![deepl.clone()], None);

        let response = h.orchestrator.translate(&request("Hello")).await;
        let data = response.data.unwrap();
        assert!(response.success);
        assert_eq!(data.text, "Bonjour");
        assert_eq!(data.provider, ProviderKind::DeepL);
        assert!(!data.is_cached);
        assert_eq!(data.char_count, 5);

        let key = KeyMaterial::from_request(&request("Hello")).key();
        let row = h.orchestrator.cache().get(key.as_str()).unwrap().unwrap();
        assert_eq!(row.translated_text, "Bonjour");
        assert_eq!(row.provider, ProviderKind::DeepL);
        assert_eq!(h.ledger_requests(UsageAccount::translation(ProviderKind::DeepL)), 1);
    }

    #[tokio::test]
    async fn test_latched_first_tier_falls_through() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("unused"));
        let google = MockBackend::new(ProviderKind::Google, Behavior::Succeed("Salut"));
        let h = harness(vec![deepl.clone(), google.clone()], None);
        h.cost().latch_quota(ProviderKind::DeepL, "test").unwrap();

        let data = h.orchestrator.translate(&request("Hi")).await.data.unwrap();
        assert_eq!(data.provider, ProviderKind::Google);
        assert!(!data.is_refined);
        assert_eq!(deepl.calls(), 0);
    }

    #[tokio::test]
    async fn test_two_tiers_down_third_serves() {
        let deepl = MockBackend::new(
            ProviderKind::DeepL,
            Behavior::Fail(ProviderError::QuotaExceeded("456".into())),
        );
        let google = MockBackend::new(
            ProviderKind::Google,
            Behavior::Fail(ProviderError::Transient("503".into())),
        );
        let openai = MockBackend::new(ProviderKind::OpenAi, Behavior::Succeed("Salut"));
        let h = harness(vec![deepl, google, openai], None);

        let data = h.orchestrator.translate(&request("Hi")).await.data.unwrap();
        assert_eq!(data.provider, ProviderKind::OpenAi);
        assert!(h.cost().is_quota_latched(ProviderKind::DeepL).unwrap());
        // Transient failures are never latched
        assert!(!h.cost().is_quota_latched(ProviderKind::Google).unwrap());
    }

    #[tokio::test]
    async fn test_all_tiers_unavailable_writes_nothing() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("unused"));
        let google = MockBackend::new(
            ProviderKind::Google,
            Behavior::Fail(ProviderError::QuotaExceeded("dailyLimitExceeded".into())),
        );
        let h = harness(vec![deepl.clone(), google.clone()], None);
        h.cost().latch_quota(ProviderKind::DeepL, "test").unwrap();

        let response = h.orchestrator.translate(&request("Hello")).await;
        assert!(!response.success);
        assert!(response.data.is_none());
        assert!(response.error.is_some());
        assert_eq!(h.cache_rows(), 0);
        assert!(h.cost().ledger().for_date(h.cost().today()).unwrap().is_empty());
        assert_eq!(google.calls(), 1);
    }

    #[tokio::test]
    async fn test_translate_then_refine_records_both_accounts() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("Bonjour"));
        let refiner = MockBackend::new(ProviderKind::OpenAi, Behavior::Succeed("Bonjour !"));
        let h = harness(vec![deepl], Some(refiner.clone()));

        let req = request("Hello").with_refinement(true);
        let data = h.orchestrator.translate(&req).await.data.unwrap();
        assert_eq!(data.provider, ProviderKind::DeepL);
        assert!(data.is_refined);
        assert_eq!(data.text, "Bonjour !");

        let key = KeyMaterial::from_request(&req).key();
        let row = h.orchestrator.cache().get(key.as_str()).unwrap().unwrap();
        assert!(row.is_refined);
        assert_eq!(
            row.refinement_model.as_deref(),
            Some(crate::constants::models::OPENAI_REFINEMENT_MODEL)
        );
        assert_eq!(h.cache_rows(), 1);
        assert_eq!(h.ledger_requests(UsageAccount::translation(ProviderKind::DeepL)), 1);
        assert_eq!(h.ledger_requests(UsageAccount::refinement(ProviderKind::OpenAi)), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_provider_calls() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("Bonjour"));
        let h = harness(vec![deepl.clone()], None);

        h.orchestrator.translate(&request("Hello")).await;
        // Whitespace differences normalize to the same key
        let data = h
            .orchestrator
            .translate(&request("  Hello \n"))
            .await
            .data
            .unwrap();

        assert!(data.is_cached);
        assert_eq!(data.provider, ProviderKind::Cache);
        assert_eq!(data.text, "Bonjour");
        assert_eq!(deepl.calls(), 1);
        assert_eq!(h.ledger_requests(UsageAccount::translation(ProviderKind::DeepL)), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_honor_shared_latch() {
        let deepl = MockBackend::new(
            ProviderKind::DeepL,
            Behavior::Fail(ProviderError::QuotaExceeded("456".into())),
        );
        let google = MockBackend::new(ProviderKind::Google, Behavior::Succeed("ok"));
        let h = Arc::new(harness(vec![deepl.clone(), google.clone()], None));

        let first = h.orchestrator.translate(&request("first")).await;
        assert_eq!(first.data.unwrap().provider, ProviderKind::Google);

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let h = Arc::clone(&h);
                tokio::spawn(async move {
                    h.orchestrator
                        .translate(&request(&format!("line {i}")))
                        .await
                })
            })
            .collect();
        for handle in handles {
            let data = handle.await.unwrap().data.unwrap();
            assert_eq!(data.provider, ProviderKind::Google);
        }

        assert_eq!(deepl.calls(), 1);
        assert_eq!(google.calls(), 65);
        assert_eq!(h.ledger_requests(UsageAccount::translation(ProviderKind::Google)), 65);
        assert_eq!(h.ledger_requests(UsageAccount::translation(ProviderKind::DeepL)), 0);
        assert_eq!(h.cache_rows(), 65);
    }

    #[tokio::test]
    async fn test_quota_latch_holds_across_requests() {
        let deepl = MockBackend::new(
            ProviderKind::DeepL,
            Behavior::Fail(ProviderError::QuotaExceeded("456".into())),
        );
        let google = MockBackend::new(ProviderKind::Google, Behavior::Succeed("ok"));
        let h = harness(vec![deepl.clone(), google.clone()], None);

        for i in 0..5 {
            let response = h.orchestrator.translate(&request(&format!("text {i}"))).await;
            assert_eq!(response.data.unwrap().provider, ProviderKind::Google);
        }
        assert_eq!(deepl.calls(), 1);
        assert_eq!(google.calls(), 5);
    }

    #[tokio::test]
    async fn test_latch_clears_on_day_rollover() {
        let deepl = MockBackend::new(
            ProviderKind::DeepL,
            Behavior::Fail(ProviderError::QuotaExceeded("456".into())),
        );
        let google = MockBackend::new(ProviderKind::Google, Behavior::Succeed("ok"));
        let h = harness(vec![deepl.clone(), google], None);

        h.orchestrator.translate(&request("one")).await;
        h.clock.advance(ChronoDuration::days(1));
        h.orchestrator.translate(&request("two")).await;
        assert_eq!(deepl.calls(), 2);
    }

    #[tokio::test]
    async fn test_budget_exceeded_tier_is_not_called() {
        let google = MockBackend::new(ProviderKind::Google, Behavior::Succeed("unused"));
        let openai = MockBackend::new(ProviderKind::OpenAi, Behavior::Succeed("ok"));
        let h = harness(vec![google.clone(), openai], None);
        // 500k chars at $20/M = $10, exactly the limit
        h.cost()
            .record_usage(
                UsageAccount::translation(ProviderKind::Google),
                UsageDelta::request(500_000),
            )
            .unwrap();

        let data = h.orchestrator.translate(&request("Hi")).await.data.unwrap();
        assert_eq!(data.provider, ProviderKind::OpenAi);
        assert_eq!(google.calls(), 0);
        assert!(!h.cost().is_quota_latched(ProviderKind::Google).unwrap());
    }

    #[tokio::test]
    async fn test_auth_failure_disables_for_process() {
        let deepl = MockBackend::new(
            ProviderKind::DeepL,
            Behavior::Fail(ProviderError::Auth("403".into())),
        );
        let google = MockBackend::new(ProviderKind::Google, Behavior::Succeed("ok"));
        let h = harness(vec![deepl.clone(), google], None);

        h.orchestrator.translate(&request("one")).await;
        h.orchestrator.translate(&request("two")).await;
        assert_eq!(deepl.calls(), 1);
        assert!(h.cost().is_disabled(ProviderKind::DeepL));
        assert!(!h.cost().is_quota_latched(ProviderKind::DeepL).unwrap());
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Hang);
        let google = MockBackend::new(ProviderKind::Google, Behavior::Succeed("ok"));
        let h = harness(vec![deepl.clone(), google], None);

        let data = h.orchestrator.translate(&request("Hi")).await.data.unwrap();
        assert_eq!(data.provider, ProviderKind::Google);
        assert!(!h.cost().is_quota_latched(ProviderKind::DeepL).unwrap());
        assert!(!h.cost().is_disabled(ProviderKind::DeepL));
    }

    #[tokio::test]
    async fn test_preferred_provider_goes_first() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("deepl"));
        let google = MockBackend::new(ProviderKind::Google, Behavior::Succeed("google"));
        let h = harness(vec![deepl.clone(), google.clone()], None);

        let req = request("Hello").prefer(ProviderKind::Google);
        let data = h.orchestrator.translate(&req).await.data.unwrap();
        assert_eq!(data.provider, ProviderKind::Google);
        assert_eq!(deepl.calls(), 0);
    }

    #[tokio::test]
    async fn test_refinement_failure_keeps_draft() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("Bonjour"));
        let refiner = MockBackend::new(
            ProviderKind::OpenAi,
            Behavior::Fail(ProviderError::Transient("500".into())),
        );
        let h = harness(vec![deepl], Some(refiner));

        let response = h
            .orchestrator
            .translate(&request("Hello").with_refinement(true))
            .await;
        let data = response.data.unwrap();
        assert!(response.success);
        assert_eq!(data.text, "Bonjour");
        assert!(!data.is_refined);
        assert_eq!(h.ledger_requests(UsageAccount::refinement(ProviderKind::OpenAi)), 0);
    }

    #[tokio::test]
    async fn test_no_refinement_when_draft_came_from_refiner() {
        let openai = MockBackend::new(ProviderKind::OpenAi, Behavior::Succeed("Bonjour"));
        let refiner = MockBackend::new(ProviderKind::OpenAi, Behavior::Succeed("refined"));
        let h = harness(vec![openai], Some(refiner.clone()));

        let data = h
            .orchestrator
            .translate(&request("Hello").with_refinement(true))
            .await
            .data
            .unwrap();
        assert!(!data.is_refined);
        assert_eq!(refiner.calls(), 0);
    }

    #[tokio::test]
    async fn test_refinement_skipped_when_refiner_over_budget() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("Bonjour"));
        let refiner = MockBackend::new(ProviderKind::OpenAi, Behavior::Succeed("refined"));
        let h = harness(vec![deepl], Some(refiner.clone()));
        h.cost()
            .record_usage(
                UsageAccount::refinement(ProviderKind::OpenAi),
                // 10M output tokens at $0.60/M = $6
                UsageDelta::request(0).with_tokens(0, 10_000_000),
            )
            .unwrap();

        let data = h
            .orchestrator
            .translate(&request("Hello").with_refinement(true))
            .await
            .data
            .unwrap();
        assert!(!data.is_refined);
        assert_eq!(refiner.calls(), 0);
    }

    #[tokio::test]
    async fn test_cached_draft_is_refined_in_place() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("Bonjour"));
        let refiner = MockBackend::new(ProviderKind::OpenAi, Behavior::Succeed("Bonjour !"));
        let h = harness(vec![deepl.clone()], Some(refiner.clone()));

        h.orchestrator.translate(&request("Hello")).await;
        let req = request("Hello")
            .with_refinement(true)
            .with_refinement_model("gpt-4o");
        let data = h.orchestrator.translate(&req).await.data.unwrap();

        assert_eq!(deepl.calls(), 1);
        assert_eq!(refiner.calls(), 1);
        assert!(data.is_refined);
        assert!(!data.is_cached);
        assert_eq!(data.provider, ProviderKind::DeepL);

        let key = KeyMaterial::from_request(&req).key();
        let row = h.orchestrator.cache().get(key.as_str()).unwrap().unwrap();
        assert_eq!(row.translated_text, "Bonjour !");
        assert_eq!(row.provider, ProviderKind::DeepL);
        assert_eq!(row.refinement_model.as_deref(), Some("gpt-4o"));
        assert_eq!(h.cache_rows(), 1);

        // Now refined, so the next request is a plain hit
        let again = h.orchestrator.translate(&req).await.data.unwrap();
        assert!(again.is_cached);
        assert!(again.is_refined);
        assert_eq!(refiner.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_draft_served_when_refinement_fails() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("Bonjour"));
        let refiner = MockBackend::new(
            ProviderKind::OpenAi,
            Behavior::Fail(ProviderError::QuotaExceeded("insufficient_quota".into())),
        );
        let h = harness(vec![deepl.clone()], Some(refiner));

        h.orchestrator.translate(&request("Hello")).await;
        let data = h
            .orchestrator
            .translate(&request("Hello").with_refinement(true))
            .await
            .data
            .unwrap();

        assert!(data.is_cached);
        assert_eq!(data.provider, ProviderKind::Cache);
        assert!(!data.is_refined);
        assert_eq!(deepl.calls(), 1);
        assert!(h.cost().is_quota_latched(ProviderKind::OpenAi).unwrap());
    }

    #[tokio::test]
    async fn test_ttl_sets_expiry() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("Bonjour"));
        let mut h = harness(vec![deepl.clone()], None);
        h.orchestrator = h.orchestrator.with_ttl_days(Some(1));

        h.orchestrator.translate(&request("Hello")).await;
        h.clock.advance(ChronoDuration::days(2));
        let data = h.orchestrator.translate(&request("Hello")).await.data.unwrap();
        assert!(!data.is_cached);
        assert_eq!(deepl.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("x"));
        let h = harness(vec![deepl.clone()], None);

        let empty_text = h.orchestrator.translate(&request("   ")).await;
        assert!(!empty_text.success);

        let no_target = TranslationRequest::new("Hello", " ");
        assert!(!h.orchestrator.translate(&no_target).await.success);
        assert_eq!(deepl.calls(), 0);
    }

    #[tokio::test]
    async fn test_format_separates_cache_entries() {
        let deepl = MockBackend::new(ProviderKind::DeepL, Behavior::Succeed("x"));
        let h = harness(vec![deepl.clone()], None);

        h.orchestrator.translate(&request("<b>Hi</b>")).await;
        let html = request("<b>Hi</b>").with_format(OutputFormat::Html);
        let data = h.orchestrator.translate(&html).await.data.unwrap();
        assert!(!data.is_cached);
        assert_eq!(deepl.calls(), 2);
    }
}
