//! Retry and timeout knobs for the page fetcher, validated before a client is
//! constructed.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://gelbooru.com/index.php?page=dapi&s=post&q=index";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 GelbooruViewer/1.0 (+https://github.com/ArchieMeng/GelbooruViewer)";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct ApiClientOptions {
    pub request_timeout: Duration,
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl ApiClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must be greater than or equal to initial_backoff");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = ApiClientOptions::default();
        options.validate().expect("defaults must validate");
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.initial_backoff, Duration::from_millis(200));
    }

    #[test]
    fn rejects_zero_attempts_and_inverted_backoff() {
        let options = ApiClientOptions {
            max_attempts: 0,
            ..ApiClientOptions::default()
        };
        assert!(options.validate().is_err());

        let options = ApiClientOptions {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(1),
            ..ApiClientOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
