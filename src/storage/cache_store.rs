//! Translation cache persistence
//!
//! One row per cache key. Reads hide expired rows; deletion only happens
//! through [`CacheStore::sweep`].

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::SharedDatabase;
use crate::types::clock::{db_timestamp, parse_db_timestamp};
use crate::types::{
    BrokerError, OutputFormat, ProviderKind, Result, ResultExt, SharedClock, log_filter_error,
};

/// A produced translation, keyed by its cache key
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRecord {
    pub cache_key: String,
    pub source_lang: String,
    pub target_lang: String,
    pub output_format: OutputFormat,
    /// Normalized source text
    pub original_text: String,
    pub translated_text: String,
    /// Backend that produced the base translation
    pub provider: ProviderKind,
    pub is_refined: bool,
    pub refinement_model: Option<String>,
    pub char_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Aggregate view of the cache table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub total_entries: u64,
    pub refined_entries: u64,
    pub total_chars: u64,
    pub by_provider: Vec<(String, u64)>,
    pub oldest_access: Option<DateTime<Utc>>,
}

const SELECT_COLUMNS: &str = "cache_key, source_lang, target_lang, output_format, original_text, \
     translated_text, provider, is_refined, refinement_model, char_count, created_at, \
     last_accessed_at, expires_at";

pub struct CacheStore {
    db: SharedDatabase,
    clock: SharedClock,
}

impl CacheStore {
    pub fn new(db: SharedDatabase, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Look up a record; rows with `expires_at <= now` are treated as absent
    pub fn get(&self, cache_key: &str) -> Result<Option<TranslationRecord>> {
        let now = db_timestamp(self.clock.now());
        let conn = self.db.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM translations
             WHERE cache_key = ?1 AND (expires_at IS NULL OR expires_at > ?2)"
        ))?;

        let record = stmt
            .query_row(params![cache_key, now], |row| Ok(Self::row_to_record(row)))
            .optional()?;

        record.transpose()
    }

    /// Insert or replace by key, keeping `created_at` of an existing row
    pub fn upsert(&self, record: &TranslationRecord) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute(
            r#"
            INSERT INTO translations (
                cache_key, source_lang, target_lang, output_format, original_text,
                translated_text, provider, is_refined, refinement_model, char_count,
                created_at, last_accessed_at, expires_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(cache_key) DO UPDATE SET
                source_lang = excluded.source_lang,
                target_lang = excluded.target_lang,
                output_format = excluded.output_format,
                original_text = excluded.original_text,
                translated_text = excluded.translated_text,
                provider = excluded.provider,
                is_refined = excluded.is_refined,
                refinement_model = excluded.refinement_model,
                char_count = excluded.char_count,
                last_accessed_at = excluded.last_accessed_at,
                expires_at = excluded.expires_at
            "#,
            params![
                record.cache_key,
                record.source_lang,
                record.target_lang,
                record.output_format.as_str(),
                record.original_text,
                record.translated_text,
                record.provider.as_str(),
                record.is_refined,
                record.refinement_model,
                to_sql_count(record.char_count as u64),
                db_timestamp(record.created_at),
                db_timestamp(record.last_accessed_at),
                record.expires_at.map(db_timestamp),
            ],
        )
        .with_context_fn(|| format!("Failed to upsert translation {}", record.cache_key))?;
        Ok(())
    }

    /// Mark a record as read now. Returns whether a row was updated.
    pub fn touch(&self, cache_key: &str) -> Result<bool> {
        let conn = self.db.connection()?;
        let updated = conn.execute(
            "UPDATE translations SET last_accessed_at = ?2 WHERE cache_key = ?1",
            params![cache_key, db_timestamp(self.clock.now())],
        )?;
        Ok(updated > 0)
    }

    /// Delete rows not accessed since `older_than`, plus any expired rows
    pub fn sweep(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.db.connection()?;
        let deleted = conn
            .execute(
                "DELETE FROM translations
                 WHERE last_accessed_at < ?1
                    OR (expires_at IS NOT NULL AND expires_at <= ?2)",
                params![db_timestamp(older_than), db_timestamp(self.clock.now())],
            )
            .with_context("Failed to sweep translation cache")?;

        tracing::info!(deleted, cutoff = %older_than, "Swept translation cache");
        Ok(deleted)
    }

    /// Number of rows `sweep(older_than)` would delete
    pub fn count_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let conn = self.db.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM translations
             WHERE last_accessed_at < ?1
                OR (expires_at IS NOT NULL AND expires_at <= ?2)",
            params![db_timestamp(older_than), db_timestamp(self.clock.now())],
            |row| row.get(0),
        )?;
        Ok(from_sql_count(count))
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.db.connection()?;

        let (total, refined, chars, oldest): (i64, i64, i64, Option<String>) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_refined), 0), COALESCE(SUM(char_count), 0),
                    MIN(last_accessed_at)
             FROM translations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT provider, COUNT(*) FROM translations GROUP BY provider ORDER BY COUNT(*) DESC",
        )?;
        let by_provider = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, from_sql_count(row.get(1)?)))
            })?
            .filter_map(|r| log_filter_error(r, "reading cache stats"))
            .collect();

        Ok(CacheStats {
            total_entries: from_sql_count(total),
            refined_entries: from_sql_count(refined),
            total_chars: from_sql_count(chars),
            by_provider,
            oldest_access: oldest.as_deref().map(parse_db_timestamp),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<TranslationRecord> {
        let format_str: String = row.get(3)?;
        let provider_str: String = row.get(6)?;
        let created_at: String = row.get(10)?;
        let last_accessed_at: String = row.get(11)?;
        let expires_at: Option<String> = row.get(12)?;

        Ok(TranslationRecord {
            cache_key: row.get(0)?,
            source_lang: row.get(1)?,
            target_lang: row.get(2)?,
            output_format: format_str.parse().map_err(BrokerError::Storage)?,
            original_text: row.get(4)?,
            translated_text: row.get(5)?,
            provider: provider_str.parse().map_err(BrokerError::Storage)?,
            is_refined: row.get(7)?,
            refinement_model: row.get(8)?,
            char_count: from_sql_count(row.get(9)?) as usize,
            created_at: parse_db_timestamp(&created_at),
            last_accessed_at: parse_db_timestamp(&last_accessed_at),
            expires_at: expires_at.as_deref().map(parse_db_timestamp),
        })
    }
}

pub(crate) fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::{Clock, ManualClock};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (CacheStore, Arc<ManualClock>) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        (CacheStore::new(Arc::new(db), clock.clone()), clock)
    }

    fn record(key: &str, now: DateTime<Utc>) -> TranslationRecord {
        TranslationRecord {
            cache_key: key.to_string(),
            source_lang: "en".to_string(),
            target_lang: "zh-tw".to_string(),
            output_format: OutputFormat::Plain,
            original_text: "Hello".to_string(),
            translated_text: "你好".to_string(),
            provider: ProviderKind::DeepL,
            is_refined: false,
            refinement_model: None,
            char_count: 5,
            created_at: now,
            last_accessed_at: now,
            expires_at: None,
        }
    }

    #[test]
    fn test_get_missing_key() {
        let (store, _) = setup();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_then_get() {
        let (store, _) = setup();
        let rec = record("k1", start());
        store.upsert(&rec).unwrap();

        let loaded = store.get("k1").unwrap().expect("record should exist");
        assert_eq!(loaded, rec);
    }

    #[test]
    fn test_upsert_preserves_created_at() {
        let (store, clock) = setup();
        store.upsert(&record("k1", start())).unwrap();

        clock.advance(Duration::hours(3));
        let mut refined = record("k1", clock.now());
        refined.translated_text = "您好".to_string();
        refined.is_refined = true;
        refined.refinement_model = Some("gpt-4o-mini".to_string());
        store.upsert(&refined).unwrap();
        store.upsert(&refined).unwrap();

        let loaded = store.get("k1").unwrap().unwrap();
        assert_eq!(loaded.created_at, start());
        assert_eq!(loaded.translated_text, "您好");
        assert!(loaded.is_refined);
        assert_eq!(loaded.provider, ProviderKind::DeepL);
        assert_eq!(store.stats().unwrap().total_entries, 1);
    }

    #[test]
    fn test_expired_rows_are_invisible() {
        let (store, clock) = setup();
        let mut rec = record("k1", start());
        rec.expires_at = Some(start() + Duration::days(1));
        store.upsert(&rec).unwrap();

        assert!(store.get("k1").unwrap().is_some());
        clock.advance(Duration::days(1));
        assert!(store.get("k1").unwrap().is_none());
    }

    #[test]
    fn test_touch_updates_last_accessed() {
        let (store, clock) = setup();
        store.upsert(&record("k1", start())).unwrap();

        clock.advance(Duration::minutes(10));
        assert!(store.touch("k1").unwrap());
        assert!(!store.touch("missing").unwrap());

        let loaded = store.get("k1").unwrap().unwrap();
        assert_eq!(loaded.last_accessed_at, start() + Duration::minutes(10));
    }

    #[test]
    fn test_sweep_removes_stale_and_expired() {
        let (store, clock) = setup();
        store.upsert(&record("old", start())).unwrap();

        clock.advance(Duration::days(100));
        let now = clock.now();
        store.upsert(&record("fresh", now)).unwrap();
        let mut expired = record("expired", now);
        expired.expires_at = Some(now - Duration::seconds(1));
        store.upsert(&expired).unwrap();

        let cutoff = now - Duration::days(90);
        assert_eq!(store.count_stale(cutoff).unwrap(), 2);
        assert_eq!(store.sweep(cutoff).unwrap(), 2);
        assert_eq!(store.count_stale(cutoff).unwrap(), 0);
        assert!(store.get("fresh").unwrap().is_some());
        assert!(store.get("old").unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let (store, _) = setup();
        store.upsert(&record("a", start())).unwrap();
        let mut b = record("b", start());
        b.provider = ProviderKind::Google;
        b.is_refined = true;
        store.upsert(&b).unwrap();
        store.upsert(&record("c", start())).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.refined_entries, 1);
        assert_eq!(stats.total_chars, 15);
        assert_eq!(stats.by_provider[0], ("deepl".to_string(), 2));
        assert_eq!(stats.oldest_access, Some(start()));
    }

    #[test]
    fn test_concurrent_upserts_for_different_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path().join("cache.db")).unwrap());
        db.initialize().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(CacheStore::new(db, clock));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        store.upsert(&record(&format!("k{i}-{j}"), start())).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.stats().unwrap().total_entries, 80);
    }
}
