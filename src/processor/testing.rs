//! In-memory post API used by processor tests.

use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use crate::api::options::ApiClientOptions;
use crate::api::query::PostQuery;
use crate::api::transport::PageTransport;
use crate::processor::max_id::MaxIdTracker;
use anyhow::Result;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Failure {
    Times(usize),
    Always,
}

/// Serves `total` posts with ids `total..=1`, newest first.
pub(crate) struct FakeApi {
    total: AtomicU64,
    delays: Mutex<HashMap<u64, Duration>>,
    failures: Mutex<HashMap<u64, Failure>>,
    page_requests: Mutex<Vec<u64>>,
    count_requests: AtomicUsize,
}

impl FakeApi {
    pub(crate) fn new(total: u64) -> Arc<Self> {
        Arc::new(Self {
            total: AtomicU64::new(total),
            delays: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            page_requests: Mutex::new(Vec::new()),
            count_requests: AtomicUsize::new(0),
        })
    }

    pub(crate) fn delay_page(&self, page: u64, delay: Duration) {
        self.delays.lock().insert(page, delay);
    }

    pub(crate) fn fail_page(&self, page: u64, times: usize) {
        self.failures.lock().insert(page, Failure::Times(times));
    }

    pub(crate) fn fail_page_always(&self, page: u64) {
        self.failures.lock().insert(page, Failure::Always);
    }

    pub(crate) fn page_requests(&self) -> Vec<u64> {
        self.page_requests.lock().clone()
    }

    pub(crate) fn requests_for(&self, page: u64) -> usize {
        self.page_requests
            .lock()
            .iter()
            .filter(|requested| **requested == page)
            .count()
    }

    pub(crate) fn count_requests(&self) -> usize {
        self.count_requests.load(Ordering::SeqCst)
    }

    fn should_fail(&self, page: u64) -> bool {
        let mut failures = self.failures.lock();
        match failures.get_mut(&page) {
            Some(Failure::Always) => true,
            Some(Failure::Times(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn render(&self, offset: u64, limit: u64) -> String {
        let total = self.total.load(Ordering::SeqCst);
        let mut body = format!(r#"<posts count="{total}" offset="{offset}">"#);
        let end = total.min(offset.saturating_add(limit));
        for index in offset..end {
            let id = total - index;
            let _ = write!(
                body,
                r#"<post id="{id}" width="10" height="10" score="0" tags="fake tag_{index}" rating="s" file_url="//img.example/{id}.png"/>"#
            );
        }
        body.push_str("</posts>");
        body
    }
}

impl PageTransport for FakeApi {
    fn fetch<'a>(&'a self, query: &'a PostQuery) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            let limit = query.limit.unwrap_or(100) as u64;
            if limit == 0 {
                self.count_requests.fetch_add(1, Ordering::SeqCst);
                return Ok(Bytes::from(self.render(0, 0)));
            }

            let page = query.page.unwrap_or(0);
            self.page_requests.lock().push(page);

            let delay = self.delays.lock().get(&page).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.should_fail(page) {
                return Err(ApiError::Status { status: 503 }.into());
            }

            Ok(Bytes::from(self.render(page * limit, limit)))
        })
    }
}

/// Client with a single transport attempt so page failures surface at once.
pub(crate) fn fast_client(api: Arc<FakeApi>) -> Arc<ApiClient> {
    let options = ApiClientOptions {
        request_timeout: Duration::from_secs(5),
        max_attempts: 1,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
    };
    Arc::new(
        ApiClient::with_options(api, options, Arc::new(MaxIdTracker::new()))
            .expect("test client must build"),
    )
}
