//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Cache key derivation constants
pub mod key {
    /// Version tag mixed into every digest; bump to invalidate all keys
    pub const KEY_VERSION: &str = "v1";

    /// Stand-in for an absent source language (auto-detect)
    pub const AUTO_SOURCE_LANG: &str = "auto";

    /// Maximum consecutive line breaks kept by normalization
    pub const MAX_LINE_BREAKS: usize = 2;
}

/// Pricing defaults (USD)
pub mod pricing {
    /// Google Cloud Translation, per million characters
    pub const GOOGLE_PER_MILLION_CHARS: f64 = 20.0;

    /// gpt-4o-mini input, per million tokens
    pub const OPENAI_INPUT_PER_MILLION: f64 = 0.15;

    /// gpt-4o-mini output, per million tokens
    pub const OPENAI_OUTPUT_PER_MILLION: f64 = 0.60;

    /// Units in one pricing bucket
    pub const MILLION: f64 = 1_000_000.0;
}

/// Daily budget defaults (USD per UTC day)
pub mod budget {
    pub const GOOGLE_DAILY_USD: f64 = 10.0;

    pub const OPENAI_DAILY_USD: f64 = 5.0;

    /// Fraction of a budget at which a warning is logged
    pub const WARNING_THRESHOLD: f64 = 0.8;
}

/// Translation cache constants
pub mod cache {
    /// Entries not read for this many days are removed by the sweep
    pub const EXPIRE_AFTER_DAYS: u32 = 90;
}

/// Database constants
pub mod database {
    /// Default database file name inside the data directory
    pub const DEFAULT_DB_FILE: &str = "transroute.db";

    /// How long a writer waits on a locked database (milliseconds)
    pub const BUSY_TIMEOUT_MS: u32 = 5000;

    /// Timeout for acquiring a pooled connection (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
}

/// HTTP/Network constants
pub mod network {
    /// Default per-call timeout for a backend request (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Timeout for a refinement call (seconds)
    pub const REFINEMENT_TIMEOUT_SECS: u64 = 60;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 10;
}

/// Model defaults
pub mod models {
    pub const OPENAI_TRANSLATION_MODEL: &str = "gpt-4o-mini";

    pub const OPENAI_REFINEMENT_MODEL: &str = "gpt-4o-mini";
}
