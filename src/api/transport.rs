//! The collaborator that turns a [`PostQuery`] into a raw response body.
//!
//! `HttpTransport` is the production implementation; tests substitute
//! in-memory transports through the same trait.

use crate::api::error::ApiError;
use crate::api::options::{DEFAULT_API_URL, DEFAULT_USER_AGENT};
use crate::api::query::PostQuery;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub trait PageTransport: Send + Sync {
    /// Performs one request. Failures should be reported as [`ApiError`] so
    /// the fetcher can decide whether to retry; blank bodies are rejected by
    /// the fetcher itself.
    fn fetch<'a>(&'a self, query: &'a PostQuery) -> BoxFuture<'a, Result<Bytes>>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Arc<String>,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        Self::with_endpoint(DEFAULT_API_URL, DEFAULT_USER_AGENT, request_timeout)
    }

    pub fn with_endpoint(
        base_url: impl Into<String>,
        user_agent: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, application/xml"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|err| anyhow!("invalid user agent header: {err}"))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| anyhow!("failed to build HTTP client: {err}"))?;

        Ok(Self {
            base_url: Arc::new(base_url.into()),
            client,
            request_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, query: &PostQuery) -> Result<Bytes> {
        let params = query.to_params();
        let send = async {
            let response = self
                .client
                .get(self.base_url.as_str())
                .query(&params)
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(ApiError::Status {
                    status: status.as_u16(),
                });
            }

            response.bytes().await.map_err(map_reqwest_error)
        };

        timeout(self.request_timeout, send)
            .await
            .map_err(|_| ApiError::Timeout)?
            .map_err(Into::into)
    }
}

impl PageTransport for HttpTransport {
    fn fetch<'a>(&'a self, query: &'a PostQuery) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(self.request(query))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport {
            reason: err.to_string(),
        }
    }
}
