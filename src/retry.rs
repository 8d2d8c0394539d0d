macro_rules! retry_operation {
    ($context:expr, $operation:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;
        const RETRY_DELAY_MS: u64 = 500;
        const RETRY_JITTER_MS: u64 = 250;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= MAX_ATTEMPTS || $crate::retry::is_permanent(&err) => {
                    break Err(err)
                }
                Err(err) => {
                    let delay_ms = RETRY_DELAY_MS + fastrand::u64(0..=RETRY_JITTER_MS);
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}ms.",
                        attempt,
                        MAX_ATTEMPTS,
                        context_value,
                        err,
                        delay_ms
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_operation;

use anyhow::anyhow;
use reqwest::StatusCode;

/// A failure another attempt cannot fix; `retry_operation!` gives up at once.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub(crate) struct PermanentFailure(pub String);

pub(crate) fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<PermanentFailure>())
}

/// Error for a non-success HTTP status. Client errors are permanent except
/// request timeouts and rate limiting.
pub(crate) fn status_error(status: StatusCode, message: String) -> anyhow::Error {
    let transient = status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS;
    if status.is_client_error() && !transient {
        anyhow::Error::new(PermanentFailure(message))
    } else {
        anyhow!(message)
    }
}

#[cfg(test)]
mod tests {
    use super::{retry_operation, status_error};
    use anyhow::{anyhow, Context, Result};
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_operation!("flaky call", async {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 2 {
                Err(anyhow!("attempt {call} failed"))
            } else {
                Ok(call)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_operation!("broken call", async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("always fails"))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_operation!("missing resource", async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(status_error(StatusCode::NOT_FOUND, "not found".to_string()))
                .context("GET /chart failed")
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn throttling_and_server_errors_are_retried() {
        for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::BAD_GATEWAY] {
            let calls = AtomicU32::new(0);
            let result: Result<()> = retry_operation!("busy upstream", async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(status_error(status, status.to_string()))
            });
            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 3);
        }
    }
}
