use crate::api::options::{ApiClientOptions, DEFAULT_API_URL, DEFAULT_USER_AGENT};
use crate::api::query::MAX_PAGE_SIZE;
use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::num::NonZeroUsize;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_PAGE_ATTEMPTS: usize = 5;
pub const DEFAULT_CACHE_CAPACITY: usize = 64;
pub const DEFAULT_POPULATE_TARGET: usize = 1_000;
pub const DEFAULT_REFRESH_TARGET: usize = 1_000;
pub const DEFAULT_REFRESH_CONCURRENCY: usize = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_FETCH_ATTEMPTS: usize = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30 * 60;
const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 60 * 60;

/// Runtime configuration for a [`crate::Viewer`].
///
/// Instances are built through [`ViewerConfig::builder`] or [`ViewerConfig::new`]
/// so every value is validated before a viewer observes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerConfig {
    api_url: String,
    user_agent: String,
    request_timeout: Duration,
    max_fetch_attempts: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    page_size: usize,
    concurrency: usize,
    max_page_attempts: Option<usize>,
    cache_capacity: usize,
    populate_target: usize,
    refresh_interval: Duration,
    idle_threshold: Duration,
    refresh_target: usize,
    refresh_concurrency: usize,
    metrics_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ViewerConfigParams {
    pub api_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub max_fetch_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub page_size: usize,
    pub concurrency: usize,
    pub max_page_attempts: Option<usize>,
    pub cache_capacity: usize,
    pub populate_target: usize,
    pub refresh_interval: Duration,
    pub idle_threshold: Duration,
    pub refresh_target: usize,
    pub refresh_concurrency: usize,
    pub metrics_interval: Duration,
}

impl Default for ViewerConfigParams {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_fetch_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_page_attempts: Some(DEFAULT_MAX_PAGE_ATTEMPTS),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            populate_target: DEFAULT_POPULATE_TARGET,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            idle_threshold: Duration::from_secs(DEFAULT_IDLE_THRESHOLD_SECS),
            refresh_target: DEFAULT_REFRESH_TARGET,
            refresh_concurrency: DEFAULT_REFRESH_CONCURRENCY,
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self::from_params(ViewerConfigParams::default())
    }
}

impl ViewerConfig {
    /// Returns a builder seeded with defaults.
    pub fn builder() -> ViewerConfigBuilder {
        ViewerConfigBuilder::default()
    }

    /// Constructs and validates a configuration from explicit values.
    pub fn new(params: ViewerConfigParams) -> Result<Self> {
        let config = Self::from_params(params);
        config.validate()?;
        Ok(config)
    }

    fn from_params(params: ViewerConfigParams) -> Self {
        Self {
            api_url: params.api_url.trim().to_owned(),
            user_agent: params.user_agent.trim().to_owned(),
            request_timeout: params.request_timeout,
            max_fetch_attempts: params.max_fetch_attempts,
            initial_backoff: params.initial_backoff,
            max_backoff: params.max_backoff,
            page_size: params.page_size,
            concurrency: params.concurrency,
            max_page_attempts: params.max_page_attempts,
            cache_capacity: params.cache_capacity,
            populate_target: params.populate_target,
            refresh_interval: params.refresh_interval,
            idle_threshold: params.idle_threshold,
            refresh_target: params.refresh_target,
            refresh_concurrency: params.refresh_concurrency,
            metrics_interval: params.metrics_interval,
        }
    }

    /// Base URL of the post index, including its fixed query parameters.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Per-request timeout applied by the HTTP transport.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Transport attempts per page request.
    pub fn max_fetch_attempts(&self) -> usize {
        self.max_fetch_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Default posts per page for scheduled fetches.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Default number of pages fetched concurrently.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Times one page may be requeued before its stream fails; `None` retries forever.
    pub fn max_page_attempts(&self) -> Option<usize> {
        self.max_page_attempts
    }

    pub fn cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.cache_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Posts collected by a background cache population.
    pub fn populate_target(&self) -> usize {
        self.populate_target
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Idle time after which the maintenance loop clears the cache.
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    pub fn refresh_target(&self) -> usize {
        self.refresh_target
    }

    pub fn refresh_concurrency(&self) -> usize {
        self.refresh_concurrency
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn api_client_options(&self) -> ApiClientOptions {
        ApiClientOptions {
            request_timeout: self.request_timeout,
            max_attempts: self.max_fetch_attempts,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.api_url)?;

        if self.user_agent.is_empty() {
            bail!("user_agent cannot be empty");
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            bail!("page_size must be between 1 and {MAX_PAGE_SIZE}");
        }

        if self.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }

        if self.max_page_attempts == Some(0) {
            bail!("max_page_attempts must be greater than 0 when set");
        }

        if self.cache_capacity == 0 {
            bail!("cache_capacity must be greater than 0");
        }

        if self.populate_target == 0 {
            bail!("populate_target must be greater than 0");
        }

        if self.refresh_interval.is_zero() {
            bail!("refresh_interval must be greater than 0");
        }

        if self.idle_threshold.is_zero() {
            bail!("idle_threshold must be greater than 0");
        }

        if self.refresh_target == 0 {
            bail!("refresh_target must be greater than 0");
        }

        if self.refresh_concurrency == 0 {
            bail!("refresh_concurrency must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        self.api_client_options().validate()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ViewerConfigBuilder {
    api_url: Option<String>,
    user_agent: Option<String>,
    request_timeout: Option<Duration>,
    max_fetch_attempts: Option<usize>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    page_size: Option<usize>,
    concurrency: Option<usize>,
    max_page_attempts: Option<Option<usize>>,
    cache_capacity: Option<usize>,
    populate_target: Option<usize>,
    refresh_interval: Option<Duration>,
    idle_threshold: Option<Duration>,
    refresh_target: Option<usize>,
    refresh_concurrency: Option<usize>,
    metrics_interval: Option<Duration>,
}

impl ViewerConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_fetch_attempts(mut self, attempts: usize) -> Self {
        self.max_fetch_attempts = Some(attempts);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn concurrency(mut self, pages: usize) -> Self {
        self.concurrency = Some(pages);
        self
    }

    pub fn max_page_attempts(mut self, attempts: usize) -> Self {
        self.max_page_attempts = Some(Some(attempts));
        self
    }

    /// Requeue failed pages without limit.
    pub fn unbounded_page_attempts(mut self) -> Self {
        self.max_page_attempts = Some(None);
        self
    }

    pub fn cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = Some(entries);
        self
    }

    pub fn populate_target(mut self, posts: usize) -> Self {
        self.populate_target = Some(posts);
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = Some(threshold);
        self
    }

    pub fn refresh_target(mut self, posts: usize) -> Self {
        self.refresh_target = Some(posts);
        self
    }

    pub fn refresh_concurrency(mut self, keys: usize) -> Self {
        self.refresh_concurrency = Some(keys);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ViewerConfig> {
        let defaults = ViewerConfigParams::default();
        let params = ViewerConfigParams {
            api_url: self.api_url.unwrap_or(defaults.api_url),
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            max_fetch_attempts: self
                .max_fetch_attempts
                .unwrap_or(defaults.max_fetch_attempts),
            initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(defaults.max_backoff),
            page_size: self.page_size.unwrap_or(defaults.page_size),
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            max_page_attempts: self
                .max_page_attempts
                .unwrap_or(defaults.max_page_attempts),
            cache_capacity: self.cache_capacity.unwrap_or(defaults.cache_capacity),
            populate_target: self.populate_target.unwrap_or(defaults.populate_target),
            refresh_interval: self.refresh_interval.unwrap_or(defaults.refresh_interval),
            idle_threshold: self.idle_threshold.unwrap_or(defaults.idle_threshold),
            refresh_target: self.refresh_target.unwrap_or(defaults.refresh_target),
            refresh_concurrency: self
                .refresh_concurrency
                .unwrap_or(defaults.refresh_concurrency),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
        };

        ViewerConfig::new(params)
    }
}

fn validate_url(url: &str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("api_url must start with http:// or https://");
    }
    Ok(())
}
