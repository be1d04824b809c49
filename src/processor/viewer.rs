//! Public entry point tying the fetcher, scheduler, cache, and background
//! tasks together.

use crate::api::client::ApiClient;
use crate::api::error::is_decode_error;
use crate::api::post::Post;
use crate::api::query::PostQuery;
use crate::api::transport::{HttpTransport, PageTransport};
use crate::processor::cache::{CacheLookup, CacheMiss, QueryCache, QueryKey};
use crate::processor::maintenance::{MaintenanceLoop, MaintenanceSettings};
use crate::processor::max_id::MaxIdTracker;
use crate::processor::scheduler::{RangeScheduler, ScheduleRequest};
use crate::processor::stream::PostStream;
use crate::runtime::config::{ViewerConfig, DEFAULT_CONCURRENCY, DEFAULT_PAGE_SIZE};
use crate::runtime::supervisor::TaskSupervisor;
use crate::runtime::telemetry::{run_metrics_reporter, Telemetry, TelemetrySnapshot};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Parameters of a multi-page query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAll {
    pub tags: Vec<String>,
    pub start_page: u64,
    /// Maximum posts to return; `None` returns every match.
    pub count: Option<usize>,
    pub concurrency: usize,
    pub use_cache: bool,
    pub page_size: usize,
}

impl GetAll {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            start_page: 0,
            count: None,
            concurrency: DEFAULT_CONCURRENCY,
            use_cache: true,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn start_page(mut self, page: u64) -> Self {
        self.start_page = page;
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn concurrency(mut self, pages: usize) -> Self {
        self.concurrency = pages;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }
}

/// Result of [`Viewer::get_all`]: either a cached list or a live stream.
#[derive(Debug)]
pub enum Posts {
    Cached(Vec<Post>),
    Live(PostStream),
}

impl Posts {
    pub fn is_cached(&self) -> bool {
        matches!(self, Posts::Cached(_))
    }

    pub fn into_stream(self) -> PostStream {
        match self {
            Posts::Cached(posts) => PostStream::from_posts(posts),
            Posts::Live(stream) => stream,
        }
    }

    /// Gathers every post, waiting for a live stream to finish.
    pub async fn collect(self) -> Result<Vec<Post>> {
        match self {
            Posts::Cached(posts) => Ok(posts),
            Posts::Live(stream) => stream.try_collect_all().await,
        }
    }
}

struct ViewerInner {
    config: ViewerConfig,
    client: Arc<ApiClient>,
    scheduler: RangeScheduler,
    cache: Arc<QueryCache>,
    max_id: Arc<MaxIdTracker>,
    telemetry: Arc<Telemetry>,
    supervisor: TaskSupervisor,
}

/// Cached, concurrent client for the post API. Cloning is cheap and shares
/// the cache and background tasks.
#[derive(Clone)]
pub struct Viewer {
    inner: Arc<ViewerInner>,
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("max_id", &self.inner.max_id.current())
            .field("cache", &self.inner.cache)
            .field("supervisor", &self.inner.supervisor)
            .finish()
    }
}

impl Viewer {
    /// Connects to the configured API over HTTP.
    pub async fn start(config: ViewerConfig) -> Result<Self> {
        let transport = HttpTransport::with_endpoint(
            config.api_url(),
            config.user_agent(),
            config.request_timeout(),
        )
        .context("failed to build HTTP transport")?;
        Self::with_transport(config, Arc::new(transport)).await
    }

    /// Builds a viewer over any transport, primes the max id with a
    /// one-post request, and starts the maintenance and metrics tasks.
    pub async fn with_transport(
        config: ViewerConfig,
        transport: Arc<dyn PageTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let telemetry = Arc::new(Telemetry::default());
        let max_id = Arc::new(MaxIdTracker::new());
        let (supervisor, failures) = TaskSupervisor::new(Arc::clone(&telemetry));
        let client = Arc::new(
            ApiClient::with_options(transport, config.api_client_options(), Arc::clone(&max_id))?
                .with_cancellation(supervisor.shutdown_token()),
        );
        let scheduler = RangeScheduler::new(Arc::clone(&client), Arc::clone(&telemetry))
            .with_max_page_attempts(config.max_page_attempts());
        let cache = Arc::new(QueryCache::new(config.cache_capacity()));

        let viewer = Self {
            inner: Arc::new(ViewerInner {
                config,
                client,
                scheduler,
                cache,
                max_id,
                telemetry,
                supervisor,
            }),
        };

        viewer.prime_max_id().await;

        let inner = &viewer.inner;
        let maintenance = MaintenanceLoop::new(
            Arc::clone(&inner.cache),
            inner.scheduler.clone(),
            Arc::clone(&inner.telemetry),
            MaintenanceSettings::from_config(&inner.config),
            failures,
        );
        inner.supervisor.spawn(
            "cache maintenance",
            maintenance.run(inner.supervisor.shutdown_token()),
        );
        inner.supervisor.spawn(
            "metrics reporter",
            run_metrics_reporter(
                Arc::clone(&inner.telemetry),
                Arc::clone(&inner.cache),
                inner.supervisor.shutdown_token(),
                inner.config.metrics_interval(),
            ),
        );

        tracing::info!(
            max_id = viewer.current_max_id(),
            cache_capacity = inner.config.cache_capacity().get(),
            "viewer started"
        );
        Ok(viewer)
    }

    async fn prime_max_id(&self) {
        let query = PostQuery::new().with_limit(1);
        if let Err(err) = self.inner.client.fetch(&query).await {
            tracing::warn!(error = %err, "failed to prime max post id");
        }
    }

    /// Fetches a single page eagerly, bypassing the cache. Transport failures
    /// after all retries yield an empty list; decode failures are returned.
    pub async fn get(&self, query: &PostQuery) -> Result<Vec<Post>> {
        match self.inner.client.fetch(query).await {
            Ok(page) => Ok(page.posts),
            Err(err) if is_decode_error(&err) => Err(err),
            Err(err) => {
                tracing::warn!(
                    tags = %query.tag_filter(),
                    page = ?query.page,
                    error = %err,
                    "page request failed; returning no posts"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Fetches every post matching `request.tags`, from the cache when
    /// possible. Must be called from within a tokio runtime.
    pub fn get_all(&self, request: GetAll) -> Posts {
        let key = QueryKey::from_tags(&request.tags);
        if key.is_empty() || request.count == Some(0) {
            return Posts::Cached(Vec::new());
        }

        let inner = &self.inner;
        if request.use_cache && request.start_page == 0 {
            match inner.cache.lookup(&key, request.count) {
                CacheLookup::Hit(records) => {
                    inner.telemetry.record_cache_hit();
                    let take = request.count.unwrap_or(records.len()).min(records.len());
                    tracing::debug!(key = %key, posts = take, "serving query from cache");
                    return Posts::Cached(records[..take].to_vec());
                }
                CacheLookup::Miss(miss) => {
                    inner.telemetry.record_cache_miss();
                    tracing::debug!(key = %key, ?miss, "cache miss; serving live");
                    if miss == CacheMiss::Absent {
                        self.begin_population(&key);
                    }
                }
            }
        }

        let schedule = ScheduleRequest {
            tags: key.tags(),
            start_page: request.start_page,
            size_limit: request.count,
            page_size: request.page_size,
            concurrency: request.concurrency,
            known_total: None,
        };
        Posts::Live(inner.scheduler.schedule(schedule))
    }

    fn begin_population(&self, key: &QueryKey) {
        let supervisor = &self.inner.supervisor;
        if supervisor.is_shutting_down() || !self.inner.cache.try_begin_populate(key) {
            return;
        }

        self.inner.telemetry.record_population_started();
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        let shutdown = supervisor.shutdown_token();
        supervisor.spawn(format!("populate '{key}'"), async move {
            let target = inner.config.populate_target();
            let request = ScheduleRequest::new(key.tags())
                .size_limit(Some(target))
                .page_size(inner.config.page_size())
                .concurrency(inner.config.concurrency());

            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    inner.cache.abandon(&key);
                    tracing::debug!(key = %key, "population cancelled by shutdown");
                    return Ok(());
                }
                result = inner.scheduler.schedule(request).try_collect_all() => result,
            };
            match result {
                Ok(posts) => {
                    let count = posts.len();
                    let complete = count < target;
                    inner.telemetry.record_population_completed();
                    inner.cache.complete(&key, posts, complete);
                    tracing::info!(key = %key, posts = count, complete, "cached query");
                    Ok(())
                }
                Err(err) => {
                    inner.cache.abandon(&key);
                    Err(err.context(format!("failed to populate cache for '{key}'")))
                }
            }
        });
    }

    /// Highest post id seen by any request so far.
    pub fn current_max_id(&self) -> u64 {
        self.inner.max_id.current()
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.inner.client
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.inner.cache
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.telemetry.snapshot()
    }

    /// Stops maintenance, metrics, and in-flight populations, then waits for
    /// them to finish.
    pub async fn shutdown(&self) {
        self.inner.supervisor.shutdown().await;
        tracing::info!("viewer stopped");
    }
}
