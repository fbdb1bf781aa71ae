//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::TriggerError;

/// Wrap a trigger future with a deadline; expiry surfaces as a network error.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, TriggerError>>,
) -> Result<T, TriggerError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(TriggerError::Network(format!(
            "request timed out after {}ms",
            duration.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_is_a_network_error() {
        let result: Result<(), TriggerError> = with_timeout(Duration::from_millis(250), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(
            result,
            Err(TriggerError::Network("request timed out after 250ms".into()))
        );
    }

    #[tokio::test]
    async fn completed_future_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, TriggerError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
