//! Periodic cache upkeep: drains background failures, clears the cache after
//! long idleness, and otherwise re-fetches every ready query.

use crate::processor::cache::{QueryCache, QueryKey};
use crate::processor::scheduler::{RangeScheduler, ScheduleRequest};
use crate::runtime::config::ViewerConfig;
use crate::runtime::supervisor::FailureReceiver;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSettings {
    pub refresh_interval: Duration,
    pub idle_threshold: Duration,
    pub refresh_target: usize,
    pub refresh_concurrency: usize,
    pub page_size: usize,
    pub concurrency: usize,
}

impl MaintenanceSettings {
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self {
            refresh_interval: config.refresh_interval(),
            idle_threshold: config.idle_threshold(),
            refresh_target: config.refresh_target(),
            refresh_concurrency: config.refresh_concurrency(),
            page_size: config.page_size(),
            concurrency: config.concurrency(),
        }
    }
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self::from_config(&ViewerConfig::default())
    }
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cleared: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub observed_failures: usize,
}

pub struct MaintenanceLoop {
    cache: Arc<QueryCache>,
    scheduler: RangeScheduler,
    telemetry: Arc<Telemetry>,
    settings: MaintenanceSettings,
    failures: FailureReceiver,
}

impl MaintenanceLoop {
    pub fn new(
        cache: Arc<QueryCache>,
        scheduler: RangeScheduler,
        telemetry: Arc<Telemetry>,
        settings: MaintenanceSettings,
        failures: FailureReceiver,
    ) -> Self {
        Self {
            cache,
            scheduler,
            telemetry,
            settings,
            failures,
        }
    }

    /// Runs one cycle every `refresh_interval` until `shutdown` fires. The
    /// first cycle runs one full interval after start.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let period = self.settings.refresh_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("cache maintenance shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::debug!("cache maintenance interrupted by shutdown");
                            return Ok(());
                        }
                        report = self.run_cycle() => {
                            tracing::debug!(
                                cleared = report.cleared,
                                refreshed = report.refreshed,
                                failed = report.failed,
                                observed_failures = report.observed_failures,
                                "cache maintenance cycle finished"
                            );
                        }
                    }
                }
            }
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let observed_failures = self.drain_failures();

        let idle = self.cache.idle_for();
        if idle >= self.settings.idle_threshold {
            let cleared = self.cache.clear_all();
            self.telemetry.record_cache_clear();
            tracing::info!(
                idle_secs = idle.as_secs(),
                cleared,
                "cache idle past threshold; cleared all entries"
            );
            return CycleReport {
                cleared,
                observed_failures,
                ..CycleReport::default()
            };
        }

        let keys = self.cache.ready_keys();
        if keys.is_empty() {
            return CycleReport {
                observed_failures,
                ..CycleReport::default()
            };
        }

        let this = &*self;
        let outcomes: Vec<(QueryKey, Result<usize>)> = futures::stream::iter(keys)
            .map(|key| async move {
                let outcome = this.refresh_key(&key).await;
                (key, outcome)
            })
            .buffer_unordered(this.settings.refresh_concurrency.max(1))
            .collect()
            .await;

        let mut report = CycleReport {
            observed_failures,
            ..CycleReport::default()
        };
        for (key, outcome) in outcomes {
            match outcome {
                Ok(posts) => {
                    report.refreshed += 1;
                    tracing::debug!(key = %key, posts, "refreshed cached query");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(key = %key, error = %err, "failed to refresh cached query");
                }
            }
        }
        report
    }

    async fn refresh_key(&self, key: &QueryKey) -> Result<usize> {
        let target = self.settings.refresh_target;
        let request = ScheduleRequest::new(key.tags())
            .size_limit(Some(target))
            .page_size(self.settings.page_size)
            .concurrency(self.settings.concurrency);

        let posts = self.scheduler.schedule(request).try_collect_all().await?;
        let count = posts.len();
        let complete = count < target;
        if self.cache.refresh(key, posts, complete) {
            self.telemetry.record_refresh();
        } else {
            tracing::debug!(key = %key, "query left the cache during refresh");
        }
        Ok(count)
    }

    fn drain_failures(&mut self) -> usize {
        let mut observed = 0;
        while let Ok(failure) = self.failures.try_recv() {
            observed += 1;
            tracing::error!(
                task = %failure.label,
                error = %failure.error,
                "background task failure"
            );
        }
        observed
    }
}
