// Layered rate limiting over Redis: concurrency semaphores plus 1-second
// token buckets, keyed by scope (global, per-MX host, per-crawl domain).
// All state lives in the shared KV so limits hold across worker processes.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::db::RedisPool;
use crate::utils::backoff::with_jitter;

/// Semaphore TTL; prevents deadlocks if a worker dies mid-lease.
const SEM_TTL_SECS: i64 = 120;

/// Poll interval while waiting for a semaphore slot.
const ACQUIRE_POLL: Duration = Duration::from_millis(50);

// =============================================================================
// ERROR TYPES
// =============================================================================

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Redis connection error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Rate limit denied for scope {0}")]
    Denied(String),

    #[error("Acquire timed out for scope {0}")]
    AcquireTimeout(String),
}

// =============================================================================
// SCOPES
// =============================================================================

/// A rate-limit scope. Scopes are acquired in the order given; the global
/// scope must come first so partial acquisition never inverts the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateScope {
    Global,
    MxHost(String),
    CrawlDomain(String),
}

impl RateScope {
    fn sem_key(&self) -> String {
        match self {
            RateScope::Global => "sem:global".to_string(),
            RateScope::MxHost(h) => format!("sem:mx:{}", h.to_lowercase()),
            RateScope::CrawlDomain(d) => format!("sem:domain:{}", d.to_lowercase()),
        }
    }

    fn rps_key(&self, sec: u64) -> String {
        match self {
            RateScope::Global => format!("rps:global:{}", sec),
            RateScope::MxHost(h) => format!("rps:mx:{}:{}", h.to_lowercase(), sec),
            RateScope::CrawlDomain(d) => format!("rps:domain:{}:{}", d.to_lowercase(), sec),
        }
    }

    fn label(&self) -> String {
        match self {
            RateScope::Global => "global".to_string(),
            RateScope::MxHost(h) => format!("mx:{}", h),
            RateScope::CrawlDomain(d) => format!("domain:{}", d),
        }
    }
}

/// Per-scope limits resolved by the caller from config.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScopeLimits {
    pub max_concurrency: u32,
    pub rps: u32,
}

// =============================================================================
// LEASE
// =============================================================================

/// Held semaphore slots. Must be released via [`RateLimiter::release`];
/// the Redis TTL reclaims slots from crashed workers.
#[derive(Debug)]
pub struct RateLease {
    held: Vec<String>,
}

impl RateLease {
    pub fn scope_count(&self) -> usize {
        self.held.len()
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Distributed rate limiter backed by the shared Redis pool.
#[derive(Clone)]
pub struct RateLimiter {
    redis_pool: RedisPool,
}

impl RateLimiter {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }

    /// Acquire every scope's semaphore in order, failing fast: on denial the
    /// scopes already taken are released before returning. Blocks up to
    /// `timeout`, polling for freed slots.
    #[instrument(skip(self, scopes))]
    pub async fn acquire(
        &self,
        scopes: &[(RateScope, ScopeLimits)],
        timeout: Duration,
    ) -> Result<RateLease, RateLimitError> {
        let deadline = Instant::now() + timeout;
        let mut conn = self.redis_pool.get_connection().await?;

        loop {
            match self.try_acquire_all(&mut conn, scopes).await {
                Ok(lease) => {
                    self.redis_pool.return_connection(conn).await;
                    return Ok(lease);
                }
                Err(denied_label) => {
                    if Instant::now() >= deadline {
                        self.redis_pool.return_connection(conn).await;
                        return Err(RateLimitError::AcquireTimeout(denied_label));
                    }
                    sleep(ACQUIRE_POLL).await;
                }
            }
        }
    }

    /// One non-blocking pass over all scopes. Returns the denied scope label
    /// on failure, after releasing anything taken this pass.
    async fn try_acquire_all(
        &self,
        conn: &mut ConnectionManager,
        scopes: &[(RateScope, ScopeLimits)],
    ) -> Result<RateLease, String> {
        let mut held: Vec<String> = Vec::with_capacity(scopes.len());

        for (scope, limits) in scopes {
            let key = scope.sem_key();
            match sem_try_acquire(conn, &key, limits.max_concurrency).await {
                Ok(true) => held.push(key),
                Ok(false) => {
                    let label = scope.label();
                    debug!("semaphore full for {}", label);
                    for k in held.iter().rev() {
                        let _ = sem_release(conn, k).await;
                    }
                    return Err(label);
                }
                Err(e) => {
                    warn!("semaphore acquire error for {}: {}", scope.label(), e);
                    for k in held.iter().rev() {
                        let _ = sem_release(conn, k).await;
                    }
                    return Err(scope.label());
                }
            }
        }

        Ok(RateLease { held })
    }

    /// Release all slots held by a lease, in reverse acquisition order.
    pub async fn release(&self, lease: RateLease) -> Result<(), RateLimitError> {
        let mut conn = self.redis_pool.get_connection().await?;
        for key in lease.held.iter().rev() {
            sem_release(&mut conn, key).await?;
        }
        self.redis_pool.return_connection(conn).await;
        Ok(())
    }

    /// Consume one token from the scope's 1-second bucket, sleeping with
    /// jitter until a token is available. Consumed tokens are never refunded.
    #[instrument(skip(self))]
    pub async fn consume_rps(&self, scope: &RateScope, rps: u32) -> Result<(), RateLimitError> {
        if rps == 0 {
            return Ok(());
        }
        let mut conn = self.redis_pool.get_connection().await?;

        loop {
            let sec = unix_now_secs();
            let key = scope.rps_key(sec);
            let count: u64 = redis::pipe()
                .atomic()
                .incr(&key, 1u64)
                .expire(&key, 2)
                .ignore()
                .query_async::<_, (u64,)>(&mut conn)
                .await
                .map(|(c,)| c)?;

            if count <= rps as u64 {
                self.redis_pool.return_connection(conn).await;
                return Ok(());
            }

            // Bucket full for this second; wait out the window with jitter
            sleep(with_jitter(Duration::from_millis(1000), 0.15)).await;
        }
    }

    /// Non-blocking bucket check used by callers that surface `rate_limited`
    /// to the retry machinery instead of waiting inline.
    pub async fn try_consume_rps(
        &self,
        scope: &RateScope,
        rps: u32,
    ) -> Result<bool, RateLimitError> {
        if rps == 0 {
            return Ok(true);
        }
        let mut conn = self.redis_pool.get_connection().await?;
        let sec = unix_now_secs();
        let key = scope.rps_key(sec);
        let count: u64 = redis::pipe()
            .atomic()
            .incr(&key, 1u64)
            .expire(&key, 2)
            .ignore()
            .query_async::<_, (u64,)>(&mut conn)
            .await
            .map(|(c,)| c)?;
        self.redis_pool.return_connection(conn).await;
        Ok(count <= rps as u64)
    }

    /// Current semaphore value for a scope, for observability snapshots.
    pub async fn semaphore_value(&self, scope: &RateScope) -> Result<u32, RateLimitError> {
        let mut conn = self.redis_pool.get_connection().await?;
        let val: Option<u32> = redis::cmd("GET")
            .arg(scope.sem_key())
            .query_async(&mut conn)
            .await?;
        self.redis_pool.return_connection(conn).await;
        Ok(val.unwrap_or(0))
    }
}

// =============================================================================
// SEMAPHORE PRIMITIVES (atomic Lua)
// =============================================================================

/// Check-and-increment bounded by `limit`; refreshes the TTL on success.
async fn sem_try_acquire(
    conn: &mut ConnectionManager,
    key: &str,
    limit: u32,
) -> Result<bool, redis::RedisError> {
    let script = redis::Script::new(
        r#"
        local cur = tonumber(redis.call('GET', KEYS[1]) or '0')
        if cur >= tonumber(ARGV[1]) then
            return 0
        end
        redis.call('INCR', KEYS[1])
        redis.call('EXPIRE', KEYS[1], ARGV[2])
        return 1
    "#,
    );
    let taken: i64 = script
        .key(key)
        .arg(limit)
        .arg(SEM_TTL_SECS)
        .invoke_async(conn)
        .await?;
    Ok(taken == 1)
}

/// Decrement that never goes negative; deletes the key at zero.
async fn sem_release(conn: &mut ConnectionManager, key: &str) -> Result<(), redis::RedisError> {
    let script = redis::Script::new(
        r#"
        local cur = tonumber(redis.call('GET', KEYS[1]) or '0')
        local new = cur - 1
        if new <= 0 then
            redis.call('DEL', KEYS[1])
        else
            redis.call('SET', KEYS[1], new)
            redis.call('EXPIRE', KEYS[1], ARGV[1])
        end
        return new
    "#,
    );
    let _: i64 = script.key(key).arg(SEM_TTL_SECS).invoke_async(conn).await?;
    Ok(())
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_keys() {
        assert_eq!(RateScope::Global.sem_key(), "sem:global");
        assert_eq!(
            RateScope::MxHost("MX.Example.COM".into()).sem_key(),
            "sem:mx:mx.example.com"
        );
        assert_eq!(
            RateScope::CrawlDomain("example.com".into()).sem_key(),
            "sem:domain:example.com"
        );
        assert_eq!(RateScope::Global.rps_key(42), "rps:global:42");
        assert_eq!(
            RateScope::MxHost("mx.example.com".into()).rps_key(7),
            "rps:mx:mx.example.com:7"
        );
    }

    #[test]
    fn test_scope_labels() {
        assert_eq!(RateScope::Global.label(), "global");
        assert_eq!(RateScope::MxHost("a.b".into()).label(), "mx:a.b");
        assert_eq!(RateScope::CrawlDomain("c.d".into()).label(), "domain:c.d");
    }
}
