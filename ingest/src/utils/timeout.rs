use common::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Runs `operation`, failing with `Error::Timeout` if it has not finished within `limit`.
pub async fn with_timeout<T, Fut>(limit: Duration, what: &str, operation: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("{} did not finish within {:?}", what, limit))),
    }
}
