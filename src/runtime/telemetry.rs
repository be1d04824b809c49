use crate::processor::cache::QueryCache;
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Counters shared by the scheduler, cache paths, and background tasks.
#[derive(Default, Debug)]
pub struct Telemetry {
    pages_fetched: AtomicU64,
    page_failures: AtomicU64,
    page_requeues: AtomicU64,
    schedule_stalls: AtomicU64,
    posts_emitted: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    populations_started: AtomicU64,
    populations_completed: AtomicU64,
    refreshes: AtomicU64,
    cache_clears: AtomicU64,
    background_failures: AtomicU64,
}

impl Telemetry {
    pub fn record_page_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_failure(&self) {
        self.page_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_requeue(&self) {
        self.page_requeues.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schedule_stall(&self) {
        self.schedule_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_posts_emitted(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.posts_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_population_started(&self) {
        self.populations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_population_completed(&self) {
        self.populations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_clear(&self) {
        self.cache_clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_failure(&self) {
        self.background_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            page_failures: self.page_failures.load(Ordering::Relaxed),
            page_requeues: self.page_requeues.load(Ordering::Relaxed),
            schedule_stalls: self.schedule_stalls.load(Ordering::Relaxed),
            posts_emitted: self.posts_emitted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            populations_started: self.populations_started.load(Ordering::Relaxed),
            populations_completed: self.populations_completed.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            cache_clears: self.cache_clears.load(Ordering::Relaxed),
            background_failures: self.background_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub pages_fetched: u64,
    pub page_failures: u64,
    pub page_requeues: u64,
    pub schedule_stalls: u64,
    pub posts_emitted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub populations_started: u64,
    pub populations_completed: u64,
    pub refreshes: u64,
    pub cache_clears: u64,
    pub background_failures: u64,
}

/// Periodically logs fetch throughput, cache occupancy, and failure counts
/// until `shutdown` is cancelled.
pub async fn run_metrics_reporter(
    telemetry: Arc<Telemetry>,
    cache: Arc<QueryCache>,
    shutdown: CancellationToken,
    interval: Duration,
) -> Result<()> {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_snapshot = telemetry.snapshot();
    let mut last_tick = time::Instant::now();

    loop {
        select! {
            _ = shutdown.cancelled() => {
                tracing::info!(target: "gelbooru_viewer::metrics", "metrics reporter shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                let current = telemetry.snapshot();
                let fetched_delta = current.pages_fetched.saturating_sub(last_snapshot.pages_fetched);
                let elapsed = last_tick.elapsed().as_secs_f64();
                let pages_per_sec = if elapsed <= f64::EPSILON {
                    0.0
                } else {
                    fetched_delta as f64 / elapsed
                };

                tracing::info!(
                    target: "gelbooru_viewer::metrics",
                    pages_per_sec = format!("{pages_per_sec:.2}"),
                    pages_fetched = current.pages_fetched,
                    page_failures = current.page_failures,
                    page_requeues = current.page_requeues,
                    cache_entries = cache.len(),
                    cache_hits = current.cache_hits,
                    cache_misses = current.cache_misses,
                    background_failures = current.background_failures,
                    "runtime metrics snapshot"
                );

                last_snapshot = current;
                last_tick = time::Instant::now();
            }
        }
    }
}
