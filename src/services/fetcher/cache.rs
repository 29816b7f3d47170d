// In-process HTTP response cache keyed by canonical URL.
//
// Honors `Cache-Control: max-age` when present, falling back to the
// configured default TTL. Entries past their expiry are served as stale
// only through `get_stale` (stale-while-revalidate callers).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use url::Url;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Canonicalize a URL for cache keying: lowercase scheme+host, drop default
/// ports and fragments, keep path+query.
pub fn canonical_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}

/// Parse `max-age` out of a Cache-Control header value.
pub fn parse_max_age(cache_control: &str) -> Option<Duration> {
    for directive in cache_control.split(',') {
        let directive = directive.trim().to_lowercase();
        if directive == "no-store" || directive == "no-cache" {
            return Some(Duration::ZERO);
        }
        if let Some(value) = directive.strip_prefix("max-age=") {
            if let Ok(secs) = value.trim().parse::<u64>() {
                return Some(Duration::from_secs(secs));
            }
        }
    }
    None
}

#[derive(Clone)]
pub struct ResponseCache {
    default_ttl: Duration,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fresh entry for the URL, or None.
    pub async fn get(&self, url: &str) -> Option<CacheEntry> {
        let key = canonical_url(url);
        let entries = self.entries.read().await;
        entries.get(&key).filter(|e| e.is_fresh()).cloned()
    }

    /// Any entry for the URL, fresh or stale.
    pub async fn get_stale(&self, url: &str) -> Option<CacheEntry> {
        let key = canonical_url(url);
        let entries = self.entries.read().await;
        entries.get(&key).cloned()
    }

    /// Store a successful response. `cache_control` is the raw header value
    /// if the server sent one; `max-age=0` / `no-store` entries are skipped.
    pub async fn store(
        &self,
        url: &str,
        status: u16,
        body: &str,
        content_type: Option<&str>,
        cache_control: Option<&str>,
    ) {
        let ttl = cache_control
            .and_then(parse_max_age)
            .unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        let entry = CacheEntry {
            status,
            body: body.to_string(),
            content_type: content_type.map(|s| s.to_string()),
            stored_at: now,
            expires_at: now + ttl,
        };

        let mut entries = self.entries.write().await;
        entries.insert(canonical_url(url), entry);
    }

    pub async fn purge(&self, url: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(&canonical_url(url));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_url_drops_fragment() {
        assert_eq!(
            canonical_url("https://Example.com/Team#members"),
            "https://example.com/Team"
        );
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(
            parse_max_age("public, max-age=600"),
            Some(Duration::from_secs(600))
        );
        assert_eq!(parse_max_age("no-store"), Some(Duration::ZERO));
        assert_eq!(parse_max_age("private"), None);
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let cache = ResponseCache::new(Duration::from_secs(900));
        cache
            .store("https://example.com/", 200, "<html/>", Some("text/html"), None)
            .await;
        let entry = cache.get("https://example.com/").await.unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body, "<html/>");
    }

    #[tokio::test]
    async fn test_no_store_not_cached() {
        let cache = ResponseCache::new(Duration::from_secs(900));
        cache
            .store("https://example.com/", 200, "x", None, Some("no-store"))
            .await;
        assert!(cache.get("https://example.com/").await.is_none());
    }

    #[tokio::test]
    async fn test_fragment_does_not_split_cache() {
        let cache = ResponseCache::new(Duration::from_secs(900));
        cache
            .store("https://example.com/team#a", 200, "body", None, None)
            .await;
        assert!(cache.get("https://example.com/team#b").await.is_some());
    }
}
