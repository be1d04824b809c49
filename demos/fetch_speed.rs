use std::env;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use futures::StreamExt;
use gelbooru_viewer::{GetAll, Post, PostQuery, Viewer, ViewerConfig, ViewerConfigBuilder};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::time::sleep;

const DEFAULT_TAGS: &str = "1da";
const DEFAULT_COUNT: usize = 500;
const DEFAULT_CONCURRENCY: usize = 5;
const DEFAULT_PAGE_SIZE: usize = 25;
const DEFAULT_PREVIEW: usize = 10;
const DEFAULT_LOG_DIRECTIVE: &str = "warn";
const CACHE_WAIT_LIMIT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let viewer = Viewer::start(args.to_viewer_config()?).await?;
    let bar = build_progress_bar(args.count as u64);
    bar.println(format!(
        "Fetching {} posts for '{}' with {} concurrent pages (max id {})",
        args.count,
        args.tags.join(" "),
        args.concurrency,
        viewer.current_max_id()
    ));

    let latest = viewer
        .get(&PostQuery::new().with_tags(args.tags.iter().cloned()).with_limit(1))
        .await?;
    if let Some(post) = latest.first() {
        bar.println(post.to_string());
    }

    let started = Instant::now();
    let fetched = fetch_with_progress(&viewer, &args, &bar).await?;
    let live_elapsed = started.elapsed();
    bar.finish_with_message("live fetch done");
    for post in fetched.iter().take(args.preview) {
        println!("{post}");
    }
    print_summary("live", fetched.len(), live_elapsed);

    wait_for_cache(&viewer, &args).await?;

    let started = Instant::now();
    let cached = viewer.get_all(args.request()).collect().await?;
    print_summary("cached", cached.len(), started.elapsed());

    let snapshot = viewer.telemetry();
    println!(
        "pages fetched: {}, failures: {}, cache hits: {}, misses: {}",
        snapshot.pages_fetched, snapshot.page_failures, snapshot.cache_hits, snapshot.cache_misses
    );

    viewer.shutdown().await;
    Ok(())
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    gelbooru_viewer::init_tracing();
}

fn build_progress_bar(length: u64) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(length), ProgressDrawTarget::stdout_with_hz(12));
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} posts ({per_sec:.2} posts/s) {msg}",
    )
    .expect("valid progress bar template")
    .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

async fn fetch_with_progress(
    viewer: &Viewer,
    args: &ExampleArgs,
    bar: &ProgressBar,
) -> Result<Vec<Post>> {
    let posts = viewer.get_all(args.request());
    if posts.is_cached() {
        bar.set_message("served from cache");
    }

    let mut stream = posts.into_stream();
    let mut fetched = Vec::with_capacity(args.count);
    while let Some(post) = stream.next().await {
        let post = post.context("live fetch failed")?;
        bar.set_message(format!("id {}", post.id));
        bar.inc(1);
        fetched.push(post);
    }
    Ok(fetched)
}

async fn wait_for_cache(viewer: &Viewer, args: &ExampleArgs) -> Result<()> {
    let started = Instant::now();
    while viewer.telemetry().populations_completed == 0 {
        ensure!(
            started.elapsed() < CACHE_WAIT_LIMIT,
            "cache population did not finish within {:?}",
            CACHE_WAIT_LIMIT
        );
        ensure!(
            viewer.telemetry().background_failures == 0,
            "cache population for '{}' failed",
            args.tags.join(" ")
        );
        sleep(Duration::from_millis(250)).await;
    }
    Ok(())
}

fn print_summary(label: &str, count: usize, elapsed: Duration) {
    let seconds = elapsed.as_secs_f64();
    let rate = if seconds > 0.0 {
        count as f64 / seconds
    } else {
        0.0
    };
    println!("{label}: {count} posts in {seconds:.2}s [{rate:.2} posts/s]");
}

struct ExampleArgs {
    api_url: Option<String>,
    tags: Vec<String>,
    count: usize,
    concurrency: usize,
    page_size: usize,
    preview: usize,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        let api_url = env::var("GELBOORU_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let tags = Post::split_tags(&read_env_or_default("GELBOORU_TAGS", DEFAULT_TAGS));
        let count = parse_env_with_default::<usize>("GELBOORU_COUNT", DEFAULT_COUNT)?;
        let concurrency =
            parse_env_with_default::<usize>("GELBOORU_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        let page_size = parse_env_with_default::<usize>("GELBOORU_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        let preview = parse_env_with_default::<usize>("GELBOORU_PREVIEW", DEFAULT_PREVIEW)?;

        ensure!(!tags.is_empty(), "GELBOORU_TAGS must name at least one tag");
        ensure!(count > 0, "GELBOORU_COUNT must be greater than 0");
        ensure!(
            concurrency > 0,
            "GELBOORU_CONCURRENCY must be greater than 0"
        );

        Ok(Self {
            api_url,
            tags,
            count,
            concurrency,
            page_size,
            preview,
        })
    }

    fn to_viewer_config(&self) -> Result<ViewerConfig> {
        let mut builder: ViewerConfigBuilder = ViewerConfig::builder()
            .page_size(self.page_size)
            .concurrency(self.concurrency)
            .populate_target(self.count);
        if let Some(url) = &self.api_url {
            builder = builder.api_url(url.clone());
        }
        builder.build()
    }

    fn request(&self) -> GetAll {
        GetAll::new(self.tags.iter().cloned())
            .count(self.count)
            .concurrency(self.concurrency)
            .page_size(self.page_size)
    }
}

fn read_env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
