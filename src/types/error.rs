//! Unified Error Type System
//!
//! Centralized error types for the broker.
//!
//! ## Provider Error Categories
//!
//! - **QuotaExceeded**: Backend reported hard quota exhaustion (latched for the day)
//! - **Transient**: Timeout, 5xx or rate limiting (try next tier, retry next request)
//! - **Auth**: Invalid credentials or misconfiguration (disabled for the process)
//! - **Rejected**: Backend refused this particular request (try next tier)
//!
//! Per-tier errors never escape the translate chain; only
//! `AllProvidersExhausted` is surfaced to callers.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Provider Errors
// =============================================================================

/// Classified failure of a single backend call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Hard quota signal from the backend itself
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Timeout, 5xx-class or rate limit
    #[error("transient failure: {0}")]
    Transient(String),

    /// Authentication or configuration failure
    #[error("authentication/config failure: {0}")]
    Auth(String),

    /// Request-specific refusal (bad request, input too long)
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether this failure should latch the provider for the rest of the day
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }

    /// Whether retrying without operator intervention is pointless
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::QuotaExceeded(m) | Self::Transient(m) | Self::Auth(m) | Self::Rejected(m) => m,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // URLs may carry an API key as a query parameter
        let err = err.without_url();
        if err.is_builder() {
            return Self::Auth(format!("invalid request configuration: {err}"));
        }
        if err.is_decode() {
            return Self::Transient(format!("malformed response: {err}"));
        }
        Self::Transient(err.to_string())
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps raw HTTP failures to `ProviderError`
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an HTTP status code with the response body for context
    pub fn classify_http_status(status: u16, body: &str, provider: &str) -> ProviderError {
        let message = format!("{provider} HTTP {status}: {}", truncate_body(body));
        let lower = body.to_lowercase();

        match status {
            // DeepL reports exhausted character quota with 456
            456 => ProviderError::QuotaExceeded(message),
            429 if Self::mentions_quota(&lower) => ProviderError::QuotaExceeded(message),
            429 => ProviderError::Transient(message),
            403 if Self::mentions_quota(&lower) => ProviderError::QuotaExceeded(message),
            401 | 403 => ProviderError::Auth(message),
            408 => ProviderError::Transient(message),
            400 | 404 | 413 | 422 => ProviderError::Rejected(message),
            500..=599 => ProviderError::Transient(message),
            _ => ProviderError::Transient(message),
        }
    }

    fn mentions_quota(lower_body: &str) -> bool {
        lower_body.contains("insufficient_quota")
            || lower_body.contains("dailylimitexceeded")
            || lower_body.contains("quotaexceeded")
            || lower_body.contains("quota exceeded")
    }
}

fn truncate_body(body: &str) -> &str {
    const MAX: usize = 300;
    if body.len() <= MAX {
        return body.trim();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].trim()
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum BrokerError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Provider Errors
    // -------------------------------------------------------------------------
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("All translation providers failed or exceeded budget")]
    AllProvidersExhausted,

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Convert into the provider taxonomy used by the translate chain
    pub fn into_provider_error(self) -> ProviderError {
        match self {
            Self::Provider(err) => err,
            Self::Timeout { .. } => ProviderError::Transient(self.to_string()),
            Self::Config(msg) => ProviderError::Auth(msg),
            other => ProviderError::Transient(other.to_string()),
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| BrokerError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| BrokerError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
