// Polite one-shot HTTP fetcher: robots.txt enforcement, per-host pacing,
// response caching, retry/backoff, and body/content-type limits.

pub mod cache;
pub mod robots;
pub mod throttle;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::app_config::AppConfig;
use crate::utils::backoff::full_jitter;

pub use cache::ResponseCache;
pub use robots::{parse_robots, RobotsCache, RobotsPolicy};
pub use throttle::HostThrottle;

/// Transient fetches are retried this many times beyond the first attempt.
const MAX_FETCH_RETRIES: u32 = 2;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL {0:?}")]
    InvalidUrl(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Why a fetch resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchReason {
    Ok,
    CachedFresh,
    BlockedByRobots,
    Throttled,
    TooLarge,
    WrongContentType,
    HttpError,
    Timeout,
    DnsError,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub reason: FetchReason,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        matches!(self.reason, FetchReason::Ok | FetchReason::CachedFresh)
    }

    fn terminal(url: &str, reason: FetchReason, started: Instant) -> Self {
        Self {
            url: url.to_string(),
            status: 0,
            body: String::new(),
            content_type: None,
            reason,
            from_cache: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Polite HTTP GET client shared by all crawl tasks.
#[derive(Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    robots: Arc<RobotsCache>,
    throttle: HostThrottle,
    cache: ResponseCache,
    user_agent: String,
    max_body_bytes: usize,
}

impl Fetcher {
    pub fn new(config: &AppConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.http_connect_timeout_sec))
            .timeout(Duration::from_secs(config.http_total_timeout_sec))
            .read_timeout(Duration::from_secs(config.http_read_timeout_sec))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        let robots = Arc::new(RobotsCache::new(
            http.clone(),
            config.fetch_user_agent.clone(),
            Duration::from_secs(config.robots_ttl_sec),
            Duration::from_secs(config.robots_deny_ttl_sec),
        ));

        Ok(Self {
            http,
            robots,
            throttle: HostThrottle::new(Duration::from_secs_f64(config.fetch_default_delay_sec)),
            cache: ResponseCache::new(Duration::from_secs(config.fetch_cache_ttl_sec)),
            user_agent: config.fetch_user_agent.clone(),
            max_body_bytes: config.fetch_max_body_bytes,
        })
    }

    pub fn robots(&self) -> &RobotsCache {
        &self.robots
    }

    pub fn throttle(&self) -> &HostThrottle {
        &self.throttle
    }

    /// One polite GET. Robots is consulted before any request; disallowed
    /// paths return `BlockedByRobots` and are never fetched.
    #[instrument(skip(self), fields(url))]
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let started = Instant::now();
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?
            .to_lowercase();
        let path = parsed.path().to_string();

        let policy = self.robots.policy(&host).await;
        if !policy.is_allowed(&path) {
            debug!("robots disallows {}{}", host, path);
            return Ok(FetchResult::terminal(
                url,
                FetchReason::BlockedByRobots,
                started,
            ));
        }
        let crawl_delay = policy.crawl_delay().map(Duration::from_secs_f64);

        if let Some(entry) = self.cache.get(url).await {
            return Ok(FetchResult {
                url: url.to_string(),
                status: entry.status,
                body: entry.body,
                content_type: entry.content_type,
                reason: FetchReason::CachedFresh,
                from_cache: true,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        // Host still cooling off from a WAF block: surface throttled rather
        // than sleeping a multi-hour window inside the job.
        let pending = self.throttle.wait_duration(&host).await;
        if pending > Duration::from_secs(60) {
            return Ok(FetchResult::terminal(url, FetchReason::Throttled, started));
        }
        self.throttle.wait_for_turn(&host).await;

        let mut attempt: u32 = 0;
        loop {
            match self.fetch_once(url, &host, crawl_delay, started).await {
                Ok(result) => return Ok(result),
                Err(retryable) => {
                    if attempt >= MAX_FETCH_RETRIES {
                        return Ok(FetchResult::terminal(url, retryable, started));
                    }
                    attempt += 1;
                    let delay =
                        full_jitter(Duration::from_millis(500), attempt, Duration::from_secs(10));
                    debug!("retrying {} after {:?} (attempt {})", url, delay, attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Single attempt. `Err` carries the reason for a retryable failure.
    async fn fetch_once(
        &self,
        url: &str,
        host: &str,
        crawl_delay: Option<Duration>,
        started: Instant,
    ) -> Result<FetchResult, FetchReason> {
        let resp = match self
            .http
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("fetch error for {}: {}", url, e);
                if e.is_timeout() {
                    return Err(FetchReason::Timeout);
                }
                if e.is_connect() {
                    // reqwest folds DNS failures into connect errors
                    return Err(FetchReason::DnsError);
                }
                return Err(FetchReason::Timeout);
            }
        };

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let cache_control = resp
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = resp.content_length();

        self.throttle
            .after_response(host, status, crawl_delay, retry_after)
            .await;

        if status == 403 || status == 429 {
            return Ok(FetchResult::terminal(url, FetchReason::Throttled, started));
        }
        if (500..600).contains(&status) {
            return Err(FetchReason::HttpError);
        }
        if !(200..300).contains(&status) {
            return Ok(FetchResult {
                url: url.to_string(),
                status,
                body: String::new(),
                content_type,
                reason: FetchReason::HttpError,
                from_cache: false,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        if let Some(len) = content_length {
            if len as usize > self.max_body_bytes {
                return Ok(FetchResult::terminal(url, FetchReason::TooLarge, started));
            }
        }

        if !content_type_allowed(content_type.as_deref()) {
            return Ok(FetchResult::terminal(
                url,
                FetchReason::WrongContentType,
                started,
            ));
        }

        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!("body read failed for {}: {}", url, e);
                return Err(FetchReason::Timeout);
            }
        };
        let capped = &bytes[..bytes.len().min(self.max_body_bytes)];
        let body = String::from_utf8_lossy(capped).into_owned();

        self.cache
            .store(url, status, &body, content_type.as_deref(), cache_control.as_deref())
            .await;

        Ok(FetchResult {
            url: url.to_string(),
            status,
            body,
            content_type,
            reason: FetchReason::Ok,
            from_cache: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn content_type_allowed(content_type: Option<&str>) -> bool {
    match content_type {
        // No header: assume HTML and let the extractor decide
        None => true,
        Some(ct) => {
            let ct = ct.to_lowercase();
            ct.starts_with("text/html") || ct.starts_with("text/plain")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_allowlist() {
        assert!(content_type_allowed(Some("text/html; charset=utf-8")));
        assert!(content_type_allowed(Some("text/plain")));
        assert!(content_type_allowed(None));
        assert!(!content_type_allowed(Some("application/pdf")));
        assert!(!content_type_allowed(Some("image/png")));
        assert!(!content_type_allowed(Some("application/json")));
    }
}
