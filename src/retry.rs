use std::future::Future;
use std::time::Duration;

/// Runs an async function in a loop until it returns `Ok`, sleeping
/// `retry_interval` between attempts. Used by [`crate::durable_queue`] and
/// [`crate::service_discovery`] collaborators that are I/O-backed in a real
/// deployment (grounded on `rabbitmq_client::retry`, generalized beyond
/// `amqprs::error::Error`).
pub async fn retry<AttemptF, ErrF, F, Fut, T, E>(
    retry_interval: Duration,
    attempt_log_fn: AttemptF,
    error_log_fn: ErrF,
    async_fn: F,
) -> T
where
    AttemptF: Fn(u32),
    ErrF: Fn(u32, E),
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        attempt_log_fn(attempt);
        match async_fn().await {
            Ok(output) => return output,
            Err(err) => error_log_fn(attempt, err),
        }

        tokio::time::sleep(retry_interval).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_ok() {
        let attempts = AtomicU32::new(0);

        let result = retry(
            Duration::from_millis(1),
            |_attempt| (),
            |_attempt, _err: &str| (),
            || async {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            },
        )
        .await;

        assert_eq!(result, 3);
    }
}
