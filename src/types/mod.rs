pub mod clock;
pub mod error;
pub mod request;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{BrokerError, ErrorClassifier, ProviderError, Result, ResultExt};
pub use request::{
    OutputFormat, ProviderKind, TranslationData, TranslationRequest, TranslationResponse,
};

/// Log an error from a row iterator and drop it.
pub fn log_filter_error<T, E: std::fmt::Display>(
    result: std::result::Result<T, E>,
    context: &str,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Skipping row while {}: {}", context, e);
            None
        }
    }
}
