use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use gelbooru_viewer::{CacheEntry, Post, QueryKey, Viewer, ViewerConfig, ViewerConfigBuilder};
use once_cell::sync::Lazy;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Config pointed at a mock server, with short backoffs.
pub fn config_builder(api_url: &str) -> ViewerConfigBuilder {
    ViewerConfig::builder()
        .api_url(api_url)
        .request_timeout(Duration::from_secs(2))
        .initial_backoff(Duration::from_millis(5))
        .max_backoff(Duration::from_millis(20))
}

pub async fn wait_for_cached(viewer: &Viewer, tags: &[&str], timeout: Duration) -> Result<()> {
    let key = QueryKey::from_tags(tags.iter().copied());
    let start = Instant::now();
    loop {
        if let Some(CacheEntry::Ready { .. }) = viewer.cache().peek(&key) {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("query '{key}' was not cached within {:?}", timeout);
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_background_failures(
    viewer: &Viewer,
    expected: u64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let seen = viewer.telemetry().background_failures;
        if seen >= expected {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("saw {seen} background failures within {:?}, expected {expected}", timeout);
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub fn assert_unique_ids(posts: &[Post]) {
    let mut ids: Vec<u64> = posts.iter().map(|post| post.id).collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), before, "posts must not repeat");
}
