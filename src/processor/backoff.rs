//! Exponential backoff loop shared by the fetch path. The caller classifies
//! each failure; only failures marked `Retry` are attempted again.

use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<usize>,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: None,
            cancellation: None,
        }
    }

    pub(crate) fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Runs `operation` until it succeeds, `classify_error` aborts, or the attempt
/// budget is spent. `on_retry` sees every retryable failure together with the
/// delay before the next attempt and whether another attempt follows.
pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L, C>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error, bool),
    C: FnMut(usize, &anyhow::Error) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        attempt += 1;

        if attempt > 1 && config.cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(anyhow!("retry cancelled"));
        }

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if let RetryDisposition::Abort = classify_error(attempt, &err) {
            return Err(err);
        }

        let exhausted = config
            .max_attempts
            .map(|max| attempt >= max)
            .unwrap_or(false);

        on_retry(attempt, backoff, &err, !exhausted);

        if exhausted {
            return Err(err);
        }

        sleep_with_cancellation(backoff, config.cancellation).await?;
        backoff = next_backoff(backoff, config.max_delay);
    }
}

async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    match cancellation {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(anyhow!("retry cancelled")),
            _ = sleep(delay) => Ok(()),
        },
        None => {
            sleep(delay).await;
            Ok(())
        }
    }
}

pub(crate) fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }
    current.saturating_mul(2).min(max_backoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn backoff_doubles_until_capped() {
        let max = Duration::from_secs(2);
        let mut delay = Duration::from_millis(200);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(delay.as_millis());
            delay = next_backoff(delay, max);
        }
        assert_eq!(seen, vec![200, 400, 800, 1600, 2000, 2000]);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let mut final_flags = Vec::new();

        let result: Result<()> = retry_with_backoff(
            RetryBackoff::new(Duration::from_millis(200), Duration::from_secs(2))
                .with_max_attempts(3),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow!("boom")) }
            },
            |_, _, _, will_retry| final_flags.push(will_retry),
            |_, _| RetryDisposition::Retry,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(final_flags, vec![true, true, false]);
    }

    #[tokio::test]
    async fn abort_skips_remaining_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_with_backoff(
            RetryBackoff::new(Duration::from_millis(1), Duration::from_millis(1))
                .with_max_attempts(5),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow!("fatal")) }
            },
            |_, _, _, _| panic!("aborted errors are not retried"),
            |_, _| RetryDisposition::Abort,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_further_attempts() {
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result: Result<u8> = retry_with_backoff(
            RetryBackoff::new(Duration::from_secs(30), Duration::from_secs(30))
                .with_max_attempts(5)
                .with_cancellation(&token),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                async { Err(anyhow!("unreachable upstream")) }
            },
            |_, _, _, _| {},
            |_, _| RetryDisposition::Retry,
        )
        .await;

        let err = result.expect_err("cancelled retries must fail");
        assert!(err.to_string().contains("cancelled"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
