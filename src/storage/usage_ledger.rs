//! Daily usage ledger and quota latches
//!
//! Rows are keyed by (UTC date, account). An account is a backend name,
//! optionally suffixed with a sub-category (`openai:refine`), so one
//! backend's translation and refinement spend are counted separately but
//! can be summed for budget checks.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::params;

use super::SharedDatabase;
use super::cache_store::{from_sql_count, to_sql_count};
use crate::types::clock::{db_date, db_timestamp, parse_db_timestamp};
use crate::types::{ProviderKind, Result, ResultExt, log_filter_error};

/// Ledger sub-category of a backend's usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageCategory {
    Translation,
    Refinement,
}

impl UsageCategory {
    fn suffix(&self) -> Option<&'static str> {
        match self {
            Self::Translation => None,
            Self::Refinement => Some("refine"),
        }
    }
}

/// Ledger row identity for one backend sub-category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsageAccount {
    pub provider: ProviderKind,
    pub category: UsageCategory,
}

impl UsageAccount {
    pub fn translation(provider: ProviderKind) -> Self {
        Self {
            provider,
            category: UsageCategory::Translation,
        }
    }

    pub fn refinement(provider: ProviderKind) -> Self {
        Self {
            provider,
            category: UsageCategory::Refinement,
        }
    }

    /// Key stored in the `provider` column
    pub fn key(&self) -> String {
        match self.category.suffix() {
            Some(suffix) => format!("{}:{}", self.provider.as_str(), suffix),
            None => self.provider.as_str().to_string(),
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        let (name, suffix) = match key.split_once(':') {
            Some((name, suffix)) => (name, Some(suffix)),
            None => (key, None),
        };
        let provider = name.parse().ok()?;
        let category = match suffix {
            None => UsageCategory::Translation,
            Some("refine") => UsageCategory::Refinement,
            Some(_) => return None,
        };
        Some(Self { provider, category })
    }
}

/// Amount added to a ledger row by one successful call
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageDelta {
    pub requests: u64,
    pub chars: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl UsageDelta {
    pub fn request(chars: u64) -> Self {
        Self {
            requests: 1,
            chars,
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }
}

/// Counters for one (date, account)
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub date: NaiveDate,
    pub account: String,
    pub request_count: u64,
    pub char_count: u64,
    pub token_input: u64,
    pub token_output: u64,
    pub cost_estimated: f64,
}

impl UsageRecord {
    pub fn usage_account(&self) -> Option<UsageAccount> {
        UsageAccount::parse(&self.account)
    }
}

/// Counters summed over every account of one backend
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    pub request_count: u64,
    pub char_count: u64,
    pub token_input: u64,
    pub token_output: u64,
    pub cost_estimated: f64,
}

/// Sticky hard-quota marker for one backend and day
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaLatch {
    pub date: NaiveDate,
    pub provider: ProviderKind,
    pub reason: Option<String>,
    pub latched_at: DateTime<Utc>,
}

pub struct UsageLedger {
    db: SharedDatabase,
}

impl UsageLedger {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Atomically add `delta` to the row, creating it on first use
    pub fn increment(&self, date: NaiveDate, account: UsageAccount, delta: &UsageDelta) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute(
            r#"
            INSERT INTO daily_usage (
                date, provider, request_count, char_count, token_input, token_output, cost_estimated
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(date, provider) DO UPDATE SET
                request_count = request_count + excluded.request_count,
                char_count = char_count + excluded.char_count,
                token_input = token_input + excluded.token_input,
                token_output = token_output + excluded.token_output,
                cost_estimated = cost_estimated + excluded.cost_estimated
            "#,
            params![
                db_date(date),
                account.key(),
                to_sql_count(delta.requests),
                to_sql_count(delta.chars),
                to_sql_count(delta.input_tokens),
                to_sql_count(delta.output_tokens),
                delta.cost_usd.max(0.0),
            ],
        )
        .with_context_fn(|| format!("Failed to record usage for {}", account.key()))?;
        Ok(())
    }

    pub fn get(&self, date: NaiveDate, account: UsageAccount) -> Result<Option<UsageRecord>> {
        let conn = self.db.connection()?;
        let mut stmt = conn.prepare(
            "SELECT date, provider, request_count, char_count, token_input, token_output,
                    cost_estimated
             FROM daily_usage WHERE date = ?1 AND provider = ?2",
        )?;

        let result = stmt.query_row(params![db_date(date), account.key()], |row| {
            Self::row_to_record(date, row)
        });

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Sum of every sub-category row of `provider` on `date`
    pub fn provider_totals(&self, date: NaiveDate, provider: ProviderKind) -> Result<UsageTotals> {
        let conn = self.db.connection()?;
        let name = provider.as_str();
        let totals = conn.query_row(
            "SELECT COALESCE(SUM(request_count), 0), COALESCE(SUM(char_count), 0),
                    COALESCE(SUM(token_input), 0), COALESCE(SUM(token_output), 0),
                    COALESCE(SUM(cost_estimated), 0.0)
             FROM daily_usage
             WHERE date = ?1 AND (provider = ?2 OR provider LIKE ?2 || ':%')",
            params![db_date(date), name],
            |row| {
                Ok(UsageTotals {
                    request_count: from_sql_count(row.get(0)?),
                    char_count: from_sql_count(row.get(1)?),
                    token_input: from_sql_count(row.get(2)?),
                    token_output: from_sql_count(row.get(3)?),
                    cost_estimated: row.get(4)?,
                })
            },
        )?;
        Ok(totals)
    }

    pub fn for_date(&self, date: NaiveDate) -> Result<Vec<UsageRecord>> {
        let conn = self.db.connection()?;
        let mut stmt = conn.prepare(
            "SELECT date, provider, request_count, char_count, token_input, token_output,
                    cost_estimated
             FROM daily_usage WHERE date = ?1 ORDER BY provider",
        )?;

        let records = stmt
            .query_map(params![db_date(date)], |row| Self::row_to_record(date, row))?
            .filter_map(|r| log_filter_error(r, "reading usage row"))
            .collect();

        Ok(records)
    }

    /// Set the quota latch. Returns `true` only for the call that created it.
    pub fn latch(
        &self,
        date: NaiveDate,
        provider: ProviderKind,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.db.connection()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO quota_latches (date, provider, reason, latched_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![db_date(date), provider.as_str(), reason, db_timestamp(at)],
            )
            .with_context_fn(|| format!("Failed to latch quota for {provider}"))?;
        Ok(inserted > 0)
    }

    pub fn is_latched(&self, date: NaiveDate, provider: ProviderKind) -> Result<bool> {
        let conn = self.db.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM quota_latches WHERE date = ?1 AND provider = ?2",
            params![db_date(date), provider.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn latches_for_date(&self, date: NaiveDate) -> Result<Vec<QuotaLatch>> {
        let conn = self.db.connection()?;
        let mut stmt = conn.prepare(
            "SELECT provider, reason, latched_at FROM quota_latches
             WHERE date = ?1 ORDER BY latched_at",
        )?;

        let rows: Vec<(String, Option<String>, String)> = stmt
            .query_map(params![db_date(date)], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .filter_map(|r| log_filter_error(r, "reading quota latch"))
            .collect();

        let latches = rows
            .into_iter()
            .filter_map(|(provider, reason, latched_at)| {
                let provider = log_filter_error(provider.parse::<ProviderKind>(), "parsing latch")?;
                Some(QuotaLatch {
                    date,
                    provider,
                    reason,
                    latched_at: parse_db_timestamp(&latched_at),
                })
            })
            .collect();

        Ok(latches)
    }

    fn row_to_record(date: NaiveDate, row: &rusqlite::Row) -> rusqlite::Result<UsageRecord> {
        Ok(UsageRecord {
            date,
            account: row.get(1)?,
            request_count: from_sql_count(row.get(2)?),
            char_count: from_sql_count(row.get(3)?),
            token_input: from_sql_count(row.get(4)?),
            token_output: from_sql_count(row.get(5)?),
            cost_estimated: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()
    }

    fn setup() -> UsageLedger {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        UsageLedger::new(Arc::new(db))
    }

    #[test]
    fn test_account_keys() {
        assert_eq!(UsageAccount::translation(ProviderKind::OpenAi).key(), "openai");
        assert_eq!(UsageAccount::refinement(ProviderKind::OpenAi).key(), "openai:refine");
        assert_eq!(
            UsageAccount::parse("openai:refine"),
            Some(UsageAccount::refinement(ProviderKind::OpenAi))
        );
        assert_eq!(
            UsageAccount::parse("deepl"),
            Some(UsageAccount::translation(ProviderKind::DeepL))
        );
        assert!(UsageAccount::parse("openai:bogus").is_none());
    }

    #[test]
    fn test_increment_creates_then_accumulates() {
        let ledger = setup();
        let account = UsageAccount::translation(ProviderKind::Google);
        assert!(ledger.get(day(), account).unwrap().is_none());

        ledger.increment(day(), account, &UsageDelta::request(100)).unwrap();
        ledger
            .increment(day(), account, &UsageDelta::request(50).with_cost(0.001))
            .unwrap();

        let record = ledger.get(day(), account).unwrap().unwrap();
        assert_eq!(record.request_count, 2);
        assert_eq!(record.char_count, 150);
        assert!((record.cost_estimated - 0.001).abs() < 1e-12);
        assert_eq!(record.usage_account(), Some(account));
    }

    #[test]
    fn test_days_are_separate_rows() {
        let ledger = setup();
        let account = UsageAccount::translation(ProviderKind::DeepL);
        let tomorrow = day().succ_opt().unwrap();

        ledger.increment(day(), account, &UsageDelta::request(10)).unwrap();
        ledger.increment(tomorrow, account, &UsageDelta::request(20)).unwrap();

        assert_eq!(ledger.get(day(), account).unwrap().unwrap().char_count, 10);
        assert_eq!(ledger.get(tomorrow, account).unwrap().unwrap().char_count, 20);
        assert_eq!(ledger.for_date(day()).unwrap().len(), 1);
    }

    #[test]
    fn test_provider_totals_sum_sub_categories() {
        let ledger = setup();
        ledger
            .increment(
                day(),
                UsageAccount::translation(ProviderKind::OpenAi),
                &UsageDelta::request(10).with_tokens(100, 50),
            )
            .unwrap();
        ledger
            .increment(
                day(),
                UsageAccount::refinement(ProviderKind::OpenAi),
                &UsageDelta::request(10).with_tokens(200, 70),
            )
            .unwrap();
        ledger
            .increment(
                day(),
                UsageAccount::translation(ProviderKind::Google),
                &UsageDelta::request(999),
            )
            .unwrap();

        let totals = ledger.provider_totals(day(), ProviderKind::OpenAi).unwrap();
        assert_eq!(totals.request_count, 2);
        assert_eq!(totals.token_input, 300);
        assert_eq!(totals.token_output, 120);
        assert_eq!(totals.char_count, 20);

        let empty = ledger.provider_totals(day(), ProviderKind::DeepL).unwrap();
        assert_eq!(empty, UsageTotals::default());
    }

    #[test]
    fn test_latch_is_idempotent_and_day_scoped() {
        let ledger = setup();
        let at = Utc.with_ymd_and_hms(2026, 6, 15, 9, 30, 0).unwrap();

        assert!(!ledger.is_latched(day(), ProviderKind::DeepL).unwrap());
        assert!(ledger.latch(day(), ProviderKind::DeepL, Some("HTTP 456"), at).unwrap());
        assert!(!ledger.latch(day(), ProviderKind::DeepL, None, at).unwrap());
        assert!(ledger.is_latched(day(), ProviderKind::DeepL).unwrap());
        assert!(!ledger.is_latched(day().succ_opt().unwrap(), ProviderKind::DeepL).unwrap());

        let latches = ledger.latches_for_date(day()).unwrap();
        assert_eq!(latches.len(), 1);
        assert_eq!(latches[0].reason.as_deref(), Some("HTTP 456"));
        assert_eq!(latches[0].latched_at, at);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path().join("ledger.db")).unwrap());
        db.initialize().unwrap();
        let ledger = Arc::new(UsageLedger::new(db));
        let account = UsageAccount::translation(ProviderKind::Google);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        ledger.increment(day(), account, &UsageDelta::request(4)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let record = ledger.get(day(), account).unwrap().unwrap();
        assert_eq!(record.request_count, 200);
        assert_eq!(record.char_count, 800);
    }
}
