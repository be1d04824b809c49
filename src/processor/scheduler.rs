//! Concurrent page scheduler.
//!
//! A scheduled query resolves the total match count, works out which pages
//! cover the requested range, and fetches them in windows of `concurrency`
//! pages. Each page runs in its own task and its posts are emitted as soon as
//! it completes, so output follows completion order across pages and source
//! order within a page. Failed pages are requeued at the head of the next
//! window until they exceed the per-page attempt ceiling. A window that
//! carries requeued pages waits first, and the wait doubles with each
//! consecutive failing window.

use crate::api::client::ApiClient;
use crate::api::post::Post;
use crate::api::query::MAX_PAGE_SIZE;
use crate::processor::backoff::next_backoff;
use crate::processor::stream::PostStream;
use crate::runtime::config::{DEFAULT_CONCURRENCY, DEFAULT_MAX_PAGE_ATTEMPTS, DEFAULT_PAGE_SIZE};
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Result};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub tags: Vec<String>,
    pub start_page: u64,
    /// Maximum posts to emit; `None` emits every match from `start_page` on.
    pub size_limit: Option<usize>,
    pub page_size: usize,
    pub concurrency: usize,
    /// Skips the count probe when the total is already known.
    pub known_total: Option<u64>,
}

impl ScheduleRequest {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            start_page: 0,
            size_limit: None,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            known_total: None,
        }
    }

    pub fn start_page(mut self, page: u64) -> Self {
        self.start_page = page;
        self
    }

    pub fn size_limit(mut self, limit: Option<usize>) -> Self {
        self.size_limit = limit;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn concurrency(mut self, pages: usize) -> Self {
        self.concurrency = pages;
        self
    }

    pub fn known_total(mut self, total: u64) -> Self {
        self.known_total = Some(total);
        self
    }

    fn normalized(mut self) -> Self {
        self.tags.retain(|tag| !tag.trim().is_empty());
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        self.concurrency = self.concurrency.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// A page failed `attempts` times in a row and the range was abandoned.
    Stalled { page: u64, attempts: usize },
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::Stalled { page, attempts } => {
                write!(f, "page {page} failed {attempts} times; abandoning the range")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Pages and post count covered by one scheduled range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PagePlan {
    pub(crate) first_page: u64,
    pub(crate) page_count: u64,
    pub(crate) limit: usize,
}

impl PagePlan {
    pub(crate) fn new(
        total: u64,
        start_page: u64,
        page_size: usize,
        size_limit: Option<usize>,
    ) -> Self {
        let page_size = page_size.max(1) as u64;
        let available = total.saturating_sub(start_page.saturating_mul(page_size));
        let limit = match size_limit {
            Some(cap) => available.min(cap as u64),
            None => available,
        };
        Self {
            first_page: start_page,
            page_count: limit.div_ceil(page_size),
            limit: usize::try_from(limit).unwrap_or(usize::MAX),
        }
    }

    pub(crate) fn pages(&self) -> Range<u64> {
        self.first_page..self.first_page.saturating_add(self.page_count)
    }
}

#[derive(Clone)]
pub struct RangeScheduler {
    client: Arc<ApiClient>,
    telemetry: Arc<Telemetry>,
    max_page_attempts: Option<usize>,
    requeue_backoff: Duration,
    max_requeue_backoff: Duration,
}

impl RangeScheduler {
    /// Requeue delays start from the client's retry backoff settings.
    pub fn new(client: Arc<ApiClient>, telemetry: Arc<Telemetry>) -> Self {
        let requeue_backoff = client.options().initial_backoff;
        let max_requeue_backoff = client.options().max_backoff;
        Self {
            client,
            telemetry,
            max_page_attempts: Some(DEFAULT_MAX_PAGE_ATTEMPTS),
            requeue_backoff,
            max_requeue_backoff,
        }
    }

    /// Delay before re-dispatching requeued pages, doubled per consecutive
    /// failing window up to `max`.
    pub fn with_requeue_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.requeue_backoff = initial;
        self.max_requeue_backoff = max.max(initial);
        self
    }

    /// Attempt ceiling per page; `None` requeues failed pages forever.
    pub fn with_max_page_attempts(mut self, attempts: Option<usize>) -> Self {
        self.max_page_attempts = attempts.filter(|attempts| *attempts > 0);
        self
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Starts fetching the range in the background and returns its stream.
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, request: ScheduleRequest) -> PostStream {
        let request = request.normalized();
        if request.tags.is_empty() {
            return PostStream::empty();
        }

        let capacity = request
            .page_size
            .saturating_mul(request.concurrency)
            .max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let driver = RangeDriver {
            client: Arc::clone(&self.client),
            telemetry: Arc::clone(&self.telemetry),
            max_page_attempts: self.max_page_attempts,
            requeue_backoff: self.requeue_backoff,
            max_requeue_backoff: self.max_requeue_backoff,
            tags: Arc::new(request.tags.clone()),
            tx,
        };
        tokio::spawn(driver.run(request));

        PostStream::live(rx)
    }
}

struct RangeDriver {
    client: Arc<ApiClient>,
    telemetry: Arc<Telemetry>,
    max_page_attempts: Option<usize>,
    requeue_backoff: Duration,
    max_requeue_backoff: Duration,
    tags: Arc<Vec<String>>,
    tx: mpsc::Sender<Result<Post>>,
}

enum Flow {
    Continue,
    Stop,
}

impl RangeDriver {
    async fn run(self, request: ScheduleRequest) {
        let tag_filter = self.tags.join(" ");

        let total = match request.known_total {
            Some(total) => total,
            None => match self.client.fetch_count(&self.tags).await {
                Ok(total) => total,
                Err(err) => {
                    tracing::warn!(tags = %tag_filter, error = %err, "count probe failed; ending range");
                    let _ = self.tx.send(Err(err)).await;
                    return;
                }
            },
        };

        let plan = PagePlan::new(
            total,
            request.start_page,
            request.page_size,
            request.size_limit,
        );
        tracing::debug!(
            tags = %tag_filter,
            total,
            first_page = plan.first_page,
            pages = plan.page_count,
            limit = plan.limit,
            concurrency = request.concurrency,
            "scheduling page range"
        );

        let mut remaining = plan.limit;
        let mut fresh = plan.pages();
        let mut requeued: VecDeque<u64> = VecDeque::new();
        let mut failures: HashMap<u64, usize> = HashMap::new();
        let mut requeue_delay = self.requeue_backoff;

        while remaining > 0 {
            if self.tx.is_closed() {
                tracing::debug!(tags = %tag_filter, "consumer dropped range stream");
                return;
            }

            if !requeued.is_empty() {
                tracing::debug!(
                    tags = %tag_filter,
                    pages = requeued.len(),
                    delay_ms = requeue_delay.as_millis() as u64,
                    "waiting before retrying requeued pages"
                );
                tokio::select! {
                    _ = self.tx.closed() => {
                        tracing::debug!(tags = %tag_filter, "consumer dropped range stream");
                        return;
                    }
                    _ = tokio::time::sleep(requeue_delay) => {}
                }
                requeue_delay = next_backoff(requeue_delay, self.max_requeue_backoff);
            }

            let mut window = Vec::with_capacity(request.concurrency);
            while window.len() < request.concurrency {
                match requeued.pop_front().or_else(|| fresh.next()) {
                    Some(page) => window.push(page),
                    None => break,
                }
            }
            if window.is_empty() {
                break;
            }

            let mut in_flight: FuturesUnordered<_> = window
                .into_iter()
                .map(|page| {
                    let client = Arc::clone(&self.client);
                    let tags = Arc::clone(&self.tags);
                    let page_size = request.page_size;
                    let handle = tokio::spawn(async move {
                        client.fetch_page(&tags, page, page_size).await
                    });
                    async move {
                        let result = handle
                            .await
                            .map_err(|err| anyhow!("page {page} task failed: {err}"))
                            .and_then(|result| result);
                        (page, result)
                    }
                })
                .collect();

            let mut retry_next = Vec::new();
            while let Some((page, result)) = in_flight.next().await {
                match result {
                    Ok(posts) => {
                        self.telemetry.record_page_fetched();
                        if let Flow::Stop = self.emit(posts, &mut remaining).await {
                            return;
                        }
                    }
                    Err(err) => {
                        self.telemetry.record_page_failure();
                        let attempts = failures.entry(page).or_insert(0);
                        *attempts += 1;

                        if self.max_page_attempts.is_some_and(|max| *attempts >= max) {
                            self.telemetry.record_schedule_stall();
                            tracing::error!(
                                tags = %tag_filter,
                                page,
                                attempts = *attempts,
                                error = %err,
                                "page exceeded attempt ceiling; ending range"
                            );
                            let stalled = ScheduleError::Stalled {
                                page,
                                attempts: *attempts,
                            };
                            let _ = self.tx.send(Err(stalled.into())).await;
                            return;
                        }

                        self.telemetry.record_page_requeue();
                        tracing::warn!(
                            tags = %tag_filter,
                            page,
                            attempts = *attempts,
                            error = %err,
                            "page fetch failed; requeueing"
                        );
                        retry_next.push(page);
                    }
                }
            }
            if retry_next.is_empty() {
                requeue_delay = self.requeue_backoff;
            }
            requeued.extend(retry_next);
        }
    }

    async fn emit(&self, posts: Vec<Post>, remaining: &mut usize) -> Flow {
        let mut sent = 0u64;
        let mut flow = Flow::Continue;
        for post in posts {
            if *remaining == 0 {
                break;
            }
            if self.tx.send(Ok(post)).await.is_err() {
                flow = Flow::Stop;
                break;
            }
            *remaining -= 1;
            sent += 1;
        }
        self.telemetry.record_posts_emitted(sent);

        if *remaining == 0 {
            Flow::Stop
        } else {
            flow
        }
    }
}
