//! Per-call deadlines
//!
//! Every backend call runs under a deadline. An expired deadline is a
//! `BrokerError::Timeout`, which the translate chain treats as transient.

use std::future::Future;
use std::time::Duration;

use crate::types::{BrokerError, Result};

/// Execute an async operation with a timeout
///
/// Returns a timeout error if the operation doesn't complete within the specified duration.
///
/// ```ignore
/// let translation = with_timeout(
///     Duration::from_secs(30),
///     async { backend.translate(&input).await.map_err(BrokerError::from) },
///     "deepl translate",
/// )
/// .await?;
/// ```
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::timeout(operation_name, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderError;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(
            Duration::from_secs(1),
            async { Ok::<_, BrokerError>(42) },
            "test operation",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, BrokerError>(42)
            },
            "slow operation",
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, BrokerError::Timeout { .. }));
        assert!(matches!(
            err.into_provider_error(),
            ProviderError::Transient(_)
        ));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<u32> = with_timeout(
            Duration::from_secs(1),
            async { Err(ProviderError::QuotaExceeded("456".to_string()).into()) },
            "quota",
        )
        .await;
        assert!(result.unwrap_err().into_provider_error().is_quota());
    }
}
