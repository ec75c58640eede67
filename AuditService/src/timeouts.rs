use audit_models::{AuditError, AuditResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Bounds a call to an external service. Expiry is an `ExternalService` error.
pub async fn external_call<T, F>(service: &'static str, limit: Duration, fut: F) -> AuditResult<T>
where
    F: Future<Output = AuditResult<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(service, timeout_secs = limit.as_secs(), "external call timed out");
            Err(AuditError::external(
                service,
                format!("timed out after {}s", limit.as_secs()),
            ))
        }
    }
}

/// Bounds a record store call. Expiry is a `Persistence` error.
pub async fn store_call<T, F>(limit: Duration, fut: F) -> AuditResult<T>
where
    F: Future<Output = AuditResult<T>>,
{
    timeout(limit, fut).await.unwrap_or_else(|_| {
        warn!(timeout_secs = limit.as_secs(), "record store call timed out");
        Err(AuditError::Persistence(format!(
            "record store timed out after {}s",
            limit.as_secs()
        )))
    })
}
