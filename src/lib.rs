//! transroute - Cost-Aware Translation Broker
//!
//! Routes each translation request through an ordered chain of backends,
//! guarded by a content-addressed cache and per-backend daily budgets.
//!
//! ## Core Features
//!
//! - **Content-addressed cache**: normalized text plus languages and format
//!   hash to a stable key; repeated requests never reach a backend
//! - **Tiered failover**: DeepL, OpenAI and Google in configurable order
//! - **Quota latches**: a backend's hard quota signal parks it until the
//!   next UTC day, across restarts and instances sharing the database
//! - **Daily budgets**: spend is recomputed from the usage ledger before
//!   every call
//! - **Refinement**: optional second pass over the draft by a model backend
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use transroute::{ConfigLoader, Orchestrator, SystemClock, TranslationRequest};
//!
//! let config = ConfigLoader::load()?;
//! let broker = Orchestrator::from_config(&config, Arc::new(SystemClock))?;
//! let response = broker
//!     .translate(&TranslationRequest::new("Hello, {name}!", "fr").with_refinement(true))
//!     .await;
//! ```
//!
//! ## Modules
//!
//! - [`broker`]: cache keys, cost control and the orchestrator
//! - [`provider`]: backend traits and HTTP backends
//! - [`storage`]: SQLite persistence with connection pooling
//! - [`config`]: layered configuration

pub mod broker;
pub mod cli;
pub mod config;
pub mod constants;
pub mod provider;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{BackendConfig, Config, ConfigLoader, Pricing};

// Error Types
pub use types::error::{BrokerError, ProviderError, Result, ResultExt};

// Request/Response
pub use types::{
    Clock, ManualClock, OutputFormat, ProviderKind, SharedClock, SystemClock, TranslationData,
    TranslationRequest, TranslationResponse,
};

// Storage
pub use storage::database::PoolConfig;
pub use storage::{CacheStore, Database, SharedDatabase, TranslationRecord, UsageLedger};

// =============================================================================
// Broker Re-exports
// =============================================================================

pub use broker::{CacheKey, CostControl, DailySummary, Eligibility, Orchestrator, compute_key};

pub use provider::{
    DeepLBackend, GoogleBackend, OpenAiBackend, ProviderGateway, RefinementBackend,
    TranslationBackend, with_timeout,
};
