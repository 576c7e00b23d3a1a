//! Database Layer with Connection Pooling
//!
//! Embedded SQLite store featuring:
//! - Connection pooling via r2d2 for concurrent readers
//! - WAL mode so readers never block the single writer
//! - Busy timeout to absorb brief write contention
//! - Version-tracked migrations

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::constants::database as db_constants;
use crate::types::{BrokerError, Result, ResultExt};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

/// Migration definitions
struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Add quota_latches table",
        up: "CREATE TABLE IF NOT EXISTS quota_latches (
                 date TEXT NOT NULL,
                 provider TEXT NOT NULL,
                 reason TEXT,
                 latched_at TEXT NOT NULL,
                 PRIMARY KEY (date, provider)
             )",
    },
    Migration {
        version: 2,
        description: "Add translation expiry index",
        up: "CREATE INDEX IF NOT EXISTS idx_translations_expires ON translations(expires_at)",
    },
];

/// Connection pool configuration
///
/// Pool size is dynamically calculated based on CPU cores.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: u32,
    /// Minimum idle connections to keep ready
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
    /// SQLite busy timeout (milliseconds)
    pub busy_timeout_ms: u32,
}

impl PoolConfig {
    /// Minimum pool size regardless of CPU count
    const MIN_POOL_SIZE: u32 = 4;
    /// Maximum pool size regardless of CPU count
    const MAX_POOL_SIZE: u32 = 32;
    /// Multiplier for CPU cores to pool size
    const POOL_SIZE_MULTIPLIER: f32 = 2.0;

    /// Formula: clamp(cores * 2, MIN, MAX)
    pub fn optimal_pool_size() -> u32 {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);

        let calculated = (cores as f32 * Self::POOL_SIZE_MULTIPLIER) as u32;
        calculated.clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE)
    }

    /// Create config with automatic pool sizing based on CPU cores
    pub fn auto() -> Self {
        let max_size = Self::optimal_pool_size();
        Self {
            max_size,
            min_idle: (max_size / 4).max(1),
            connection_timeout_secs: db_constants::CONNECTION_TIMEOUT_SECS,
            busy_timeout_ms: db_constants::BUSY_TIMEOUT_MS,
        }
    }

    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self.min_idle = self.min_idle.min(self.max_size);
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout_ms: u32) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open database with connection pooling at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    /// Open database with custom pool configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let busy_timeout_ms = config.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_init(move |conn| Self::configure_connection(conn, busy_timeout_ms));

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .build(manager)
            .map_err(|e| {
                BrokerError::Storage(format!("Failed to create connection pool: {}", e))
            })?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    ///
    /// A single pooled connection backs the whole database, so callers are
    /// serialized.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.busy_timeout(Duration::from_millis(u64::from(db_constants::BUSY_TIMEOUT_MS)))?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| {
                BrokerError::Storage(format!("Failed to create in-memory pool: {}", e))
            })?;

        Ok(Self { pool })
    }

    /// Configure a new connection for concurrent readers and one writer.
    fn configure_connection(
        conn: &mut Connection,
        busy_timeout_ms: u32,
    ) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        conn.busy_timeout(Duration::from_millis(u64::from(busy_timeout_ms)))?;
        Ok(())
    }

    /// Get a connection from the pool.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            BrokerError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Initialize database schema and apply pending migrations.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.connection()?;

        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .with_context("Failed to read schema version")?;

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        // A fresh database already has every column from schema.sql
        if current_version > 0 {
            for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
                conn.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;

                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }
}
