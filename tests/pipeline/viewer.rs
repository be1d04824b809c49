use std::time::Duration;

use crate::support::{
    helpers::{
        assert_unique_ids, config_builder, init_tracing, wait_for_background_failures,
        wait_for_cached,
    },
    mock_api::{MockApiServer, MockBooru},
};
use anyhow::Result;
use futures::StreamExt;
use gelbooru_viewer::{is_decode_error, GetAll, PostQuery, Viewer};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn viewer_streams_then_serves_from_cache() -> Result<()> {
    init_tracing();
    let booru = MockBooru::new().with_search("cat_ears solo", 120, 1_000);
    let server = MockApiServer::start(booru.clone()).await?;
    let config = config_builder(server.url()).populate_target(200).build()?;
    let viewer = Viewer::start(config).await?;

    assert_eq!(viewer.current_max_id(), 1_120);

    let live = viewer.get_all(GetAll::new(["solo", "cat_ears"]).count(30));
    assert!(!live.is_cached());
    let posts = live.collect().await?;
    assert_eq!(posts.len(), 30);
    assert_unique_ids(&posts);
    assert!(posts
        .iter()
        .all(|post| post.file_url.starts_with("https://img.mock/images/")));

    wait_for_cached(&viewer, &["cat_ears", "solo"], Duration::from_secs(5)).await?;
    let requests_before = booru.page_requests();

    let cached = viewer.get_all(GetAll::new(["cat_ears", "solo"]));
    assert!(cached.is_cached(), "120 posts fit under the population target");
    let posts = cached.collect().await?;
    assert_eq!(posts.len(), 120);
    assert_unique_ids(&posts);
    assert_eq!(booru.page_requests(), requests_before);

    let snapshot = viewer.telemetry();
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.cache_misses, 1);
    assert_eq!(snapshot.populations_completed, 1);

    viewer.shutdown().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn live_stream_yields_posts_incrementally() -> Result<()> {
    init_tracing();
    let booru = MockBooru::new().with_search("landscape", 500, 0);
    let server = MockApiServer::start(booru).await?;
    let viewer = Viewer::start(config_builder(server.url()).build()?).await?;

    let mut stream = viewer
        .get_all(GetAll::new(["landscape"]).use_cache(false).page_size(50))
        .into_stream();
    let mut seen = Vec::new();
    while let Some(post) = stream.next().await {
        seen.push(post?);
        if seen.len() == 10 {
            break;
        }
    }
    drop(stream);

    assert_eq!(seen.len(), 10);
    assert!(viewer.cache().is_empty());

    viewer.shutdown().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_server_errors_are_retried() -> Result<()> {
    init_tracing();
    let booru = MockBooru::new().with_search("retry_me", 75, 0);
    booru.fail_page(1, 2);
    let server = MockApiServer::start(booru.clone()).await?;
    let viewer = Viewer::start(config_builder(server.url()).build()?).await?;

    let posts = viewer
        .get_all(GetAll::new(["retry_me"]).use_cache(false))
        .collect()
        .await?;
    assert_eq!(posts.len(), 75);
    assert_unique_ids(&posts);
    assert_eq!(viewer.client().metrics().total_errors, 2);

    viewer.shutdown().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_page_get_and_decode_failures() -> Result<()> {
    init_tracing();
    let booru = MockBooru::new().with_search("night sky", 40, 0);
    let server = MockApiServer::start(booru.clone()).await?;
    let viewer = Viewer::start(config_builder(server.url()).build()?).await?;

    let query = PostQuery::new()
        .with_tags(["night", "sky"])
        .with_page(1)
        .with_limit(15);
    let posts = viewer.get(&query).await?;
    let ids: Vec<u64> = posts.iter().map(|post| post.id).collect();
    assert_eq!(ids, (11..=25).rev().collect::<Vec<_>>());
    assert_eq!(posts[0].tags, vec!["night", "sky", "mock_post"]);

    let json = serde_json::to_value(&posts[0])?;
    assert_eq!(json["id"], 25);
    assert_eq!(json["rating"], "s");

    booru.serve_malformed(true);
    let err = viewer
        .get(&query)
        .await
        .expect_err("malformed XML must surface");
    assert!(is_decode_error(&err));

    viewer.shutdown().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_population_is_reported_and_retried_later() -> Result<()> {
    init_tracing();
    let booru = MockBooru::new().with_search("flaky", 60, 0);
    let server = MockApiServer::start(booru.clone()).await?;
    let viewer = Viewer::start(
        config_builder(server.url())
            .max_fetch_attempts(1)
            .max_page_attempts(1)
            .build()?,
    )
    .await?;

    booru.fail_page(2, 1);
    let posts = viewer
        .get_all(GetAll::new(["flaky"]).count(5))
        .collect()
        .await?;
    assert_eq!(posts.len(), 5);

    wait_for_background_failures(&viewer, 1, Duration::from_secs(5)).await?;
    assert!(viewer.cache().is_empty());

    viewer.get_all(GetAll::new(["flaky"]).count(5)).collect().await?;
    wait_for_cached(&viewer, &["flaky"], Duration::from_secs(5)).await?;
    assert_eq!(viewer.telemetry().populations_started, 2);

    viewer.shutdown().await;
    server.shutdown().await;
    Ok(())
}
