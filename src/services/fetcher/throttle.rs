// Per-host crawl pacing and WAF cool-off tracking.
//
// Successful responses schedule the next request one crawl-delay out and
// reset the strike counter. 403/429 responses double a cool-off window per
// consecutive strike, from the base toward the 24h cap, with ±15% jitter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::utils::backoff::with_jitter;

/// First WAF cool-off window; doubles per consecutive strike.
const WAF_BASE_COOLOFF: Duration = Duration::from_secs(15 * 60);

/// Cool-off ceiling.
const WAF_MAX_COOLOFF: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct HostState {
    next_allowed_at: Instant,
    waf_strikes: u32,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            next_allowed_at: Instant::now(),
            waf_strikes: 0,
        }
    }
}

/// Per-host throttle shared by all crawl tasks in this process. Cross-process
/// pacing is covered by the per-domain rate-limiter scope; this layer keeps
/// the crawl-delay contract exact within a worker.
#[derive(Clone)]
pub struct HostThrottle {
    default_gap: Duration,
    hosts: Arc<Mutex<HashMap<String, HostState>>>,
}

impl HostThrottle {
    pub fn new(default_gap: Duration) -> Self {
        Self {
            default_gap,
            hosts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// How long until this host may be hit. Zero when eligible now.
    pub async fn wait_duration(&self, host: &str) -> Duration {
        let hosts = self.hosts.lock().await;
        match hosts.get(&normalize(host)) {
            Some(state) => state.next_allowed_at.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the host is eligible. Returns the time actually waited.
    pub async fn wait_for_turn(&self, host: &str) -> Duration {
        let wait = self.wait_duration(host).await;
        if !wait.is_zero() {
            debug!("throttling {} for {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Record a success (2xx/304): reset strikes and schedule the next slot
    /// one crawl-delay out. `crawl_delay` comes from robots when declared.
    pub async fn mark_ok(&self, host: &str, crawl_delay: Option<Duration>) -> Duration {
        let gap = crawl_delay.unwrap_or(self.default_gap).max(self.default_gap);
        let mut hosts = self.hosts.lock().await;
        let state = hosts.entry(normalize(host)).or_default();
        state.waf_strikes = 0;
        let now = Instant::now();
        state.next_allowed_at = state.next_allowed_at.max(now) + gap;
        gap
    }

    /// Record a WAF block (403/429). `retry_after` from the response header
    /// overrides the computed cool-off when it is longer.
    pub async fn penalize(&self, host: &str, retry_after: Option<Duration>) -> Duration {
        let mut hosts = self.hosts.lock().await;
        let state = hosts.entry(normalize(host)).or_default();
        state.waf_strikes += 1;

        let doubled = WAF_BASE_COOLOFF
            .saturating_mul(2u32.saturating_pow(state.waf_strikes.saturating_sub(1).min(16)))
            .min(WAF_MAX_COOLOFF);
        let mut cooloff = with_jitter(doubled, 0.15).min(WAF_MAX_COOLOFF);
        if let Some(ra) = retry_after {
            cooloff = cooloff.max(ra).min(WAF_MAX_COOLOFF);
        }

        warn!(
            "WAF cool-off for {}: strike {} -> {:?}",
            host, state.waf_strikes, cooloff
        );
        let now = Instant::now();
        state.next_allowed_at = state.next_allowed_at.max(now) + cooloff;
        cooloff
    }

    /// Update state from an HTTP status. Non-WAF failures keep the current
    /// window but still apply the crawl-delay gap without resetting strikes.
    pub async fn after_response(
        &self,
        host: &str,
        status: u16,
        crawl_delay: Option<Duration>,
        retry_after: Option<Duration>,
    ) -> Duration {
        match status {
            200..=299 | 304 => self.mark_ok(host, crawl_delay).await,
            403 | 429 => self.penalize(host, retry_after).await,
            _ => {
                let gap = crawl_delay.unwrap_or(self.default_gap);
                let mut hosts = self.hosts.lock().await;
                let state = hosts.entry(normalize(host)).or_default();
                let now = Instant::now();
                state.next_allowed_at = state.next_allowed_at.max(now) + gap;
                gap
            }
        }
    }

    pub async fn waf_strikes(&self, host: &str) -> u32 {
        let hosts = self.hosts.lock().await;
        hosts.get(&normalize(host)).map_or(0, |s| s.waf_strikes)
    }
}

fn normalize(host: &str) -> String {
    host.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_host_has_no_wait() {
        let throttle = HostThrottle::new(Duration::from_secs(3));
        assert_eq!(throttle.wait_duration("example.com").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_mark_ok_schedules_gap() {
        let throttle = HostThrottle::new(Duration::from_secs(3));
        let gap = throttle.mark_ok("example.com", None).await;
        assert_eq!(gap, Duration::from_secs(3));
        let wait = throttle.wait_duration("example.com").await;
        assert!(wait > Duration::from_secs(2) && wait <= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_robots_crawl_delay_respected() {
        let throttle = HostThrottle::new(Duration::from_secs(3));
        let gap = throttle
            .mark_ok("example.com", Some(Duration::from_secs(10)))
            .await;
        assert_eq!(gap, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_default_gap_is_floor() {
        let throttle = HostThrottle::new(Duration::from_secs(3));
        // A robots crawl-delay below the default still waits the default
        let gap = throttle
            .mark_ok("example.com", Some(Duration::from_secs(1)))
            .await;
        assert_eq!(gap, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_penalize_doubles_and_caps() {
        let throttle = HostThrottle::new(Duration::from_secs(3));
        let first = throttle.penalize("waf.example", None).await;
        // Strike 1: base 15m ±15%
        assert!(first >= Duration::from_secs(12 * 60) && first <= Duration::from_secs(18 * 60));
        let second = throttle.penalize("waf.example", None).await;
        assert!(second > first);
        // Run far past the cap; stays bounded at 24h
        for _ in 0..20 {
            let c = throttle.penalize("waf.example", None).await;
            assert!(c <= WAF_MAX_COOLOFF);
        }
        assert_eq!(throttle.waf_strikes("waf.example").await, 22);
    }

    #[tokio::test]
    async fn test_success_resets_strikes() {
        let throttle = HostThrottle::new(Duration::from_secs(3));
        throttle.penalize("example.com", None).await;
        assert_eq!(throttle.waf_strikes("example.com").await, 1);
        throttle.mark_ok("example.com", None).await;
        assert_eq!(throttle.waf_strikes("example.com").await, 0);
    }

    #[tokio::test]
    async fn test_retry_after_extends_cooloff() {
        let throttle = HostThrottle::new(Duration::from_secs(3));
        let cooloff = throttle
            .penalize("example.com", Some(Duration::from_secs(7200)))
            .await;
        assert!(cooloff >= Duration::from_secs(7200));
    }
}
