//! Bounded waits for configuration store calls.

use std::future::Future;
use std::time::Duration;

use telederive_domain::error::{DeriveError, TimeoutError};

/// Await a store call for at most `limit`.
///
/// # Errors
///
/// Returns the call's own error, or [`DeriveError::StoreUnavailable`] wrapping
/// a [`TimeoutError`] when the deadline passes first.
pub async fn store_call<T, F>(limit: Duration, call: F) -> Result<T, DeriveError>
where
    F: Future<Output = Result<T, DeriveError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(DeriveError::store(TimeoutError {
            millis: limit.as_millis(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_return_result_when_call_completes() {
        let value = store_call(Duration::from_secs(1), async { Ok::<_, DeriveError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn should_map_timeout_to_store_unavailable() {
        let result = store_call(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, DeriveError>(())
        })
        .await;
        assert!(matches!(result, Err(DeriveError::StoreUnavailable(_))));
    }
}
