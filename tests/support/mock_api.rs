use std::{
    collections::HashMap,
    convert::Infallible,
    fmt::Write as _,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Tag searches served by the mock API. A search matches `total` posts with
/// ids `base + total ..= base + 1`, newest first.
#[derive(Clone, Default)]
pub struct MockBooru {
    inner: Arc<RwLock<MockBooruInner>>,
    malformed: Arc<AtomicBool>,
    page_requests: Arc<AtomicUsize>,
}

#[derive(Default)]
struct MockBooruInner {
    searches: HashMap<String, Search>,
    failures: HashMap<u64, usize>,
}

#[derive(Clone, Copy)]
struct Search {
    total: u64,
    base: u64,
}

impl MockBooru {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a search. `tags` is matched against the space-joined `tags`
    /// parameter exactly as sent.
    pub fn with_search(self, tags: &str, total: u64, base: u64) -> Self {
        self.inner
            .write()
            .expect("mock booru poisoned")
            .searches
            .insert(tags.to_owned(), Search { total, base });
        self
    }

    /// Answers the next `times` requests for page `pid` with a 503.
    pub fn fail_page(&self, pid: u64, times: usize) {
        self.inner
            .write()
            .expect("mock booru poisoned")
            .failures
            .insert(pid, times);
    }

    pub fn serve_malformed(&self, malformed: bool) {
        self.malformed.store(malformed, Ordering::SeqCst);
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    fn should_fail(&self, pid: u64) -> bool {
        let mut inner = self.inner.write().expect("mock booru poisoned");
        match inner.failures.get_mut(&pid) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn search(&self, tags: &str) -> Search {
        let inner = self.inner.read().expect("mock booru poisoned");
        if let Some(search) = inner.searches.get(tags) {
            return *search;
        }
        // untagged queries see the newest post across every search
        let newest = inner
            .searches
            .values()
            .map(|search| search.base + search.total)
            .max()
            .unwrap_or(0);
        Search {
            total: if tags.is_empty() { newest } else { 0 },
            base: 0,
        }
    }

    fn render(&self, tags: &str, pid: u64, limit: u64) -> String {
        let search = self.search(tags);
        let offset = pid.saturating_mul(limit);
        let end = search.total.min(offset.saturating_add(limit));

        let mut body = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        let _ = write!(
            body,
            r#"<posts count="{}" offset="{offset}">"#,
            search.total
        );
        for index in offset..end {
            let id = search.base + search.total - index;
            let _ = write!(
                body,
                r#"<post id="{id}" width="640" height="480" score="{index}" source="" preview_url="//img.mock/thumbnails/{id}.jpg" sample_url="//img.mock/samples/{id}.jpg" file_url="//img.mock/images/{id}.jpg" created_at="Sat Jan 01 00:00:00 -0500 2022" creator_id="7" tags=" {tags} mock_post " rating="s"/>"#
            );
        }
        body.push_str("</posts>");
        body
    }
}

pub struct MockApiServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockApiServer {
    pub async fn start(booru: MockBooru) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock API listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let booru = booru.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(booru.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock API server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}/index.php?page=dapi&s=post&q=index"),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(booru: MockBooru, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method"));
    }

    let params = parse_query(req.uri().query().unwrap_or_default());
    let tags = params.get("tags").cloned().unwrap_or_default();
    let pid = params
        .get("pid")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    let limit = params
        .get("limit")
        .and_then(|value| value.parse().ok())
        .unwrap_or(100);

    if limit > 0 {
        booru.page_requests.fetch_add(1, Ordering::SeqCst);
        if booru.should_fail(pid) {
            return Ok(status(StatusCode::SERVICE_UNAVAILABLE, "try again later"));
        }
        if booru.malformed.load(Ordering::SeqCst) {
            return Ok(xml("<posts><post width=\"1\"/>".to_owned()));
        }
    }

    Ok(xml(booru.render(&tags, pid, limit)))
}

fn xml(body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/xml"),
    );
    response
}

fn status(code: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = code;
    response
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (decode_component(key), decode_component(value)))
        .collect()
}

fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => decoded.push(b' '),
            b'%' if index + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[index + 1..index + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        decoded.push(byte);
                        index += 2;
                    }
                    Err(_) => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
