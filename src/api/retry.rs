//! Message templates and request context shared by the fetch retry loop so
//! page fetches and count probes log the same way.

use anyhow::Error;
use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        let ctx: &RetryContext<'_> = $ctx;
        let tags = ctx.tags;
        match ctx.page {
            Some(page) => tracing::$level!(tags = %tags, page, $($rest)*),
            None => tracing::$level!(tags = %tags, $($rest)*),
        }
    }};
}

#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) aborted: &'static str,
    pub(crate) completed: &'static str,
}

/// Identifies the request being retried in every log line.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    tags: &'a str,
    page: Option<u64>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages, tags: &'a str, page: Option<u64>) -> Self {
        Self {
            tags,
            page,
            messages,
        }
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &Error) {
        let backoff_ms = duration_to_millis(backoff);
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms,
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(error, self, attempt, error = %err, "{}", self.messages.exhausted);
    }

    pub(crate) fn log_aborted(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(warn, self, attempt, error = %err, "{}", self.messages.aborted);
    }

    pub(crate) fn log_completed(&self, posts: usize) {
        log_with_retry_ctx!(debug, self, posts, "{}", self.messages.completed);
    }
}

fn duration_to_millis(backoff: Duration) -> u64 {
    backoff.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const PAGE_FETCH_RETRY: RetryMessages = RetryMessages {
    retry: "page request failed; retrying",
    exhausted: "page request exhausted retries",
    aborted: "page request failed with a non-retryable error",
    completed: "page request completed",
};

pub(crate) const COUNT_PROBE_RETRY: RetryMessages = RetryMessages {
    retry: "count probe failed; retrying",
    exhausted: "count probe exhausted retries",
    aborted: "count probe failed with a non-retryable error",
    completed: "count probe completed",
};
