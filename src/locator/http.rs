//! Remote source fetching over HTTP

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PatternList;
use crate::engine::parse_http_date;
use crate::humanize::ByteSize;

use super::{LocatedResource, LocatorError, ResourceLocator};

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Total attempts per fetch, exponential backoff in between
    pub max_retries: u32,
    pub user_agent: String,
    pub max_bytes: ByteSize,
    /// Host patterns remote fetches are restricted to; empty allows any host
    pub allow_hosts: PatternList,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            user_agent: concat!("pixbox/", env!("CARGO_PKG_VERSION")).to_string(),
            max_bytes: ByteSize::mib(2),
            allow_hosts: PatternList::default(),
        }
    }
}

pub struct HttpLocator {
    client: Client,
    config: HttpConfig,
}

impl HttpLocator {
    pub fn new(config: HttpConfig) -> Result<Self, LocatorError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(Policy::limited(10))
            .build()
            .map_err(|err| LocatorError::Upstream(format!("HTTP client setup failed: {}", err)))?;
        Ok(HttpLocator { client, config })
    }

    fn check_host(&self, source: &str) -> Result<Url, LocatorError> {
        let url = Url::parse(source)
            .map_err(|_| LocatorError::Denied(format!("Invalid source URL: {}", source)))?;
        let host = url
            .host_str()
            .ok_or_else(|| LocatorError::Denied(format!("Source URL has no host: {}", source)))?;
        if !self.config.allow_hosts.is_empty() && !self.config.allow_hosts.matches(host) {
            return Err(LocatorError::Denied(format!("Remote host not allowed: {}", host)));
        }
        Ok(url)
    }

    async fn try_fetch(&self, url: &Url) -> Result<Option<LocatedResource>, LocatorError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| LocatorError::Upstream(format!("request to {} failed: {}", url, err)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LocatorError::Upstream(format!("{} answered {}", url, status)));
        }

        let limit = self.config.max_bytes.as_u64();
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(LocatorError::TooLarge(format!(
                "{} exceeds the {} source limit",
                url,
                self.config.max_bytes.to_human_readable()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let last_modified: Option<DateTime<Utc>> = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        let bytes = response
            .bytes()
            .await
            .map_err(|err| LocatorError::Upstream(format!("reading {} failed: {}", url, err)))?;
        if bytes.len() as u64 > limit {
            return Err(LocatorError::TooLarge(format!(
                "{} exceeds the {} source limit",
                url,
                self.config.max_bytes.to_human_readable()
            )));
        }

        debug!(url = %url, bytes = bytes.len(), "Fetched remote source");
        Ok(Some(LocatedResource {
            bytes,
            content_type,
            last_modified,
        }))
    }
}

#[async_trait]
impl ResourceLocator for HttpLocator {
    fn handles(&self, source: &str) -> bool {
        source.starts_with("http://") || source.starts_with("https://")
    }

    async fn locate(&self, source: &str) -> Result<Option<LocatedResource>, LocatorError> {
        let url = self.check_host(source)?;
        let mut attempts = 0;
        loop {
            match self.try_fetch(&url).await {
                Ok(found) => return Ok(found),
                Err(err @ (LocatorError::TooLarge(_) | LocatorError::Denied(_))) => {
                    return Err(err);
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= self.config.max_retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(2u64.pow(attempts - 1));
                    warn!(
                        url = %url,
                        attempt = attempts,
                        backoff_secs = backoff.as_secs(),
                        error = %err,
                        "Remote fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
