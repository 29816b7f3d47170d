// MX resolution with freemail short-circuit, A/AAAA implicit-MX fallback,
// an in-process TTL cache, and the per-MX behavior sink consumed by the
// SMTP prober for timeout tuning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};
use trust_dns_resolver::TokioAsyncResolver;

use crate::app_config::AppConfig;
use crate::utils::domain::{is_freemail, normalize_domain};

#[derive(Debug, Error)]
pub enum MxError {
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("DNS lookup timed out for {0}")]
    Timeout(String),

    #[error("DNS resolver error: {0}")]
    Resolver(String),
}

// =============================================================================
// RESOLUTION RESULT
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct MxResolution {
    pub domain: String,
    /// Ascending by MX preference; implicit MX (A/AAAA fallback) is the
    /// domain itself.
    pub mx_hosts: Vec<String>,
    pub lowest_mx: Option<String>,
    pub no_mx: bool,
    pub freemail: bool,
    pub cached: bool,
}

impl MxResolution {
    fn no_mx(domain: &str, freemail: bool) -> Self {
        Self {
            domain: domain.to_string(),
            mx_hosts: Vec::new(),
            lowest_mx: None,
            no_mx: true,
            freemail,
            cached: false,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedResolution {
    resolution: MxResolution,
    resolved_at: Instant,
}

// =============================================================================
// BEHAVIOR SINK
// =============================================================================

/// One observed probe against an MX host.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeObservation {
    pub mx_host: String,
    pub elapsed_ms: i32,
    pub category: String,
    pub code: Option<i32>,
    pub error_kind: Option<String>,
}

/// Behavior summary handed back to the prober as a timeout hint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorHint {
    pub avg_latency_ms: i32,
    pub probe_count: i32,
    pub last_category: Option<String>,
}

impl BehaviorHint {
    /// Hosts averaging above this are treated as tarpits.
    const SLOW_THRESHOLD_MS: i32 = 8_000;
    /// Hosts averaging below this get relaxed command timeouts.
    const FAST_THRESHOLD_MS: i32 = 1_500;

    /// Adjust (connect, command) timeouts from observed behavior. Slow or
    /// tarpit hosts get shorter windows so a stuck conversation fails fast;
    /// consistently fast hosts get more headroom for greylisting dances.
    pub fn tuned_timeouts(&self, connect: Duration, command: Duration) -> (Duration, Duration) {
        if self.probe_count < 3 {
            return (connect, command);
        }
        if self.avg_latency_ms >= Self::SLOW_THRESHOLD_MS {
            (connect.min(Duration::from_secs(5)), command.min(Duration::from_secs(10)))
        } else if self.avg_latency_ms <= Self::FAST_THRESHOLD_MS {
            (connect, command.saturating_add(Duration::from_secs(10)))
        } else {
            (connect, command)
        }
    }
}

/// Sink for probe observations. The store persists them to `mx_behavior`;
/// tests plug in a recording fake.
#[async_trait]
pub trait BehaviorSink: Send + Sync {
    async fn record_probe(&self, observation: ProbeObservation);
    async fn behavior_hint(&self, mx_host: &str) -> Option<BehaviorHint>;
}

/// No-op sink for contexts that do not track behavior.
pub struct NullBehaviorSink;

#[async_trait]
impl BehaviorSink for NullBehaviorSink {
    async fn record_probe(&self, _observation: ProbeObservation) {}

    async fn behavior_hint(&self, _mx_host: &str) -> Option<BehaviorHint> {
        None
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

/// MX resolver with a per-domain TTL cache.
pub struct MxResolver {
    resolver: TokioAsyncResolver,
    dns_timeout: Duration,
    cache_ttl: Duration,
    extra_freemail: Vec<String>,
    cache: Arc<RwLock<HashMap<String, CachedResolution>>>,
}

impl MxResolver {
    pub fn new(config: &AppConfig) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!("system resolver config unavailable ({}), using defaults", e);
            TokioAsyncResolver::tokio(
                trust_dns_resolver::config::ResolverConfig::default(),
                trust_dns_resolver::config::ResolverOpts::default(),
            )
        });

        Self {
            resolver,
            dns_timeout: Duration::from_secs(config.dns_timeout_sec),
            cache_ttl: Duration::from_secs(config.mx_cache_ttl_sec),
            extra_freemail: config.freemail_denylist.clone(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn is_denylisted(&self, domain: &str) -> bool {
        is_freemail(domain) || self.extra_freemail.iter().any(|d| d == domain)
    }

    /// Resolve MX hosts for a domain. Freemail domains short-circuit without
    /// network; cached resolutions are reused within the TTL unless `force`.
    #[instrument(skip(self))]
    pub async fn resolve(&self, domain: &str, force: bool) -> Result<MxResolution, MxError> {
        let domain =
            normalize_domain(domain).map_err(|_| MxError::InvalidDomain(domain.to_string()))?;

        if self.is_denylisted(&domain) {
            debug!("freemail domain {}, skipping MX resolution", domain);
            return Ok(MxResolution::no_mx(&domain, true));
        }

        if !force {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&domain) {
                if cached.resolved_at.elapsed() < self.cache_ttl {
                    let mut res = cached.resolution.clone();
                    res.cached = true;
                    return Ok(res);
                }
            }
        }

        let resolution = self.resolve_uncached(&domain).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            domain,
            CachedResolution {
                resolution: resolution.clone(),
                resolved_at: Instant::now(),
            },
        );
        Ok(resolution)
    }

    async fn resolve_uncached(&self, domain: &str) -> Result<MxResolution, MxError> {
        let mx_result = timeout(self.dns_timeout, self.resolver.mx_lookup(domain)).await;

        let mut pairs: Vec<(u16, String)> = match mx_result {
            Err(_) => return Err(MxError::Timeout(domain.to_string())),
            Ok(Ok(lookup)) => lookup
                .iter()
                .map(|mx| {
                    let host = mx.exchange().to_utf8();
                    (mx.preference(), host.trim_end_matches('.').to_lowercase())
                })
                .collect(),
            Ok(Err(e)) => {
                // NXDOMAIN / no records fall through to the A/AAAA fallback
                debug!("MX lookup for {} returned no records: {}", domain, e);
                Vec::new()
            }
        };

        if pairs.is_empty() {
            // Implicit MX: a host with an A/AAAA record receives mail itself
            if self.has_address_records(domain).await {
                return Ok(MxResolution {
                    domain: domain.to_string(),
                    mx_hosts: vec![domain.to_string()],
                    lowest_mx: Some(domain.to_string()),
                    no_mx: false,
                    freemail: false,
                    cached: false,
                });
            }
            return Ok(MxResolution::no_mx(domain, false));
        }

        pairs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let mx_hosts: Vec<String> = pairs.into_iter().map(|(_, h)| h).collect();
        let lowest_mx = mx_hosts.first().cloned();

        Ok(MxResolution {
            domain: domain.to_string(),
            mx_hosts,
            lowest_mx,
            no_mx: false,
            freemail: false,
            cached: false,
        })
    }

    async fn has_address_records(&self, domain: &str) -> bool {
        matches!(
            timeout(self.dns_timeout, self.resolver.lookup_ip(domain)).await,
            Ok(Ok(lookup)) if lookup.iter().next().is_some()
        )
    }

    /// Drop a domain from the cache (used by forced re-resolution paths).
    pub async fn invalidate(&self, domain: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(domain);
    }
}
