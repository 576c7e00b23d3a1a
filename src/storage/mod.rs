pub mod cache_store;
pub mod database;
pub mod usage_ledger;

pub use cache_store::{CacheStats, CacheStore, TranslationRecord};
pub use database::{Database, PoolConfig, SharedDatabase};
pub use usage_ledger::{
    QuotaLatch, UsageAccount, UsageCategory, UsageDelta, UsageLedger, UsageRecord, UsageTotals,
};
