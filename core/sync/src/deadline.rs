//! Upper bound on collaborator calls.

use std::future::Future;
use std::time::Duration;

use crmsync_common::{Error, Result};

/// Await `call`, turning expiry of `limit` into a transport error.
pub(crate) async fn bounded<T, F>(limit: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Transport(format!(
            "{} timed out after {}ms",
            what,
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expiry_is_transport() {
        let result: Result<()> = bounded(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("slow call timed out"));
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok = bounded(Duration::from_secs(1), "fast", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<()> = bounded(Duration::from_secs(1), "auth", async {
            Err(Error::Auth("401".to_string()))
        })
        .await;
        assert!(err.unwrap_err().is_fatal());
    }
}
