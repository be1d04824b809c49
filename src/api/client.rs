//! Page fetcher: one logical request against the post API with bounded
//! retry, response decoding, metrics, and max-id bookkeeping.

use crate::api::decode::decode_page;
use crate::api::error::ApiError;
use crate::api::metrics::{ApiMetrics, ApiMetricsSnapshot};
use crate::api::options::ApiClientOptions;
use crate::api::post::{Post, PostPage};
use crate::api::query::PostQuery;
use crate::api::retry::{RetryContext, RetryMessages, COUNT_PROBE_RETRY, PAGE_FETCH_RETRY};
use crate::api::transport::PageTransport;
use crate::processor::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::processor::max_id::MaxIdTracker;
use anyhow::{Context, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn PageTransport>,
    options: ApiClientOptions,
    metrics: Arc<ApiMetrics>,
    max_id: Arc<MaxIdTracker>,
    cancellation: Option<CancellationToken>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("options", &self.options)
            .field("max_id", &self.max_id.current())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(transport: Arc<dyn PageTransport>, max_id: Arc<MaxIdTracker>) -> Result<Self> {
        Self::with_options(transport, ApiClientOptions::default(), max_id)
    }

    pub fn with_options(
        transport: Arc<dyn PageTransport>,
        options: ApiClientOptions,
        max_id: Arc<MaxIdTracker>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            transport,
            options,
            metrics: Arc::new(ApiMetrics::default()),
            max_id,
            cancellation: None,
        })
    }

    /// Skips further retries once `token` is cancelled. The first attempt
    /// of every request still runs.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn options(&self) -> &ApiClientOptions {
        &self.options
    }

    pub fn max_id(&self) -> &Arc<MaxIdTracker> {
        &self.max_id
    }

    pub fn metrics(&self) -> ApiMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fetches and decodes one response for an arbitrary query.
    pub async fn fetch(&self, query: &PostQuery) -> Result<PostPage> {
        self.fetch_with(query, &PAGE_FETCH_RETRY).await
    }

    /// Fetches page `page` of the tag search.
    pub async fn fetch_page(
        &self,
        tags: &[String],
        page: u64,
        page_size: usize,
    ) -> Result<Vec<Post>> {
        let query = PostQuery::page(tags, page, page_size);
        let page = self.fetch_with(&query, &PAGE_FETCH_RETRY).await?;
        Ok(page.posts)
    }

    /// Reads the total number of posts matching `tags`.
    pub async fn fetch_count(&self, tags: &[String]) -> Result<u64> {
        let query = PostQuery::count_probe(tags);
        let page = self.fetch_with(&query, &COUNT_PROBE_RETRY).await?;
        page.count.ok_or_else(|| {
            ApiError::decode(format!(
                "count probe for '{}' returned no count attribute",
                query.tag_filter()
            ))
            .into()
        })
    }

    async fn fetch_with(&self, query: &PostQuery, messages: &RetryMessages) -> Result<PostPage> {
        let tags = query.tag_filter();
        let context = RetryContext::new(messages, &tags, query.page);

        let mut backoff = RetryBackoff::new(self.options.initial_backoff, self.options.max_backoff)
            .with_max_attempts(self.options.max_attempts);
        if let Some(token) = self.cancellation.as_ref() {
            backoff = backoff.with_cancellation(token);
        }

        let body = retry_with_backoff(
            backoff,
            |_| self.fetch_body(query),
            |attempt, delay, err, will_retry| {
                if will_retry {
                    context.log_retry(attempt, delay, err);
                } else {
                    context.log_exhausted(attempt, err);
                }
            },
            |attempt, err| match err.downcast_ref::<ApiError>() {
                Some(api) if !api.is_retryable() => {
                    context.log_aborted(attempt, err);
                    RetryDisposition::Abort
                }
                _ => RetryDisposition::Retry,
            },
        )
        .await?;

        let page = decode_page(&body).with_context(|| match query.page {
            Some(page) => format!("failed to decode page {page} for tags '{tags}'"),
            None => format!("failed to decode response for tags '{tags}'"),
        })?;

        if let Some(id) = page.first_id() {
            self.max_id.observe(id);
        }
        context.log_completed(page.posts.len());

        Ok(page)
    }

    async fn fetch_body(&self, query: &PostQuery) -> Result<Bytes> {
        let start = Instant::now();
        let result = self.transport.fetch(query).await.and_then(|body| {
            if body.iter().all(u8::is_ascii_whitespace) {
                Err(ApiError::EmptyResponse.into())
            } else {
                Ok(body)
            }
        });
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => self.metrics.record_success(elapsed),
            Err(err) => match err.downcast_ref::<ApiError>() {
                Some(ApiError::Timeout) => self.metrics.record_timeout(elapsed),
                Some(ApiError::EmptyResponse) => self.metrics.record_empty_response(elapsed),
                _ => self.metrics.record_failure(elapsed),
            },
        }

        result
    }
}
