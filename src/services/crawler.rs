// Autodiscovery crawl: tiered seed paths, bounded internal-link expansion
// toward people-bearing pages, and soft-404 filtering.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use crate::services::fetcher::{FetchReason, Fetcher};

/// Seed path tiers, most people-dense first. Tier two is only fetched when
/// tier one produced nothing useful.
pub const SEED_TIERS: [&[&str]; 2] = [
    &["/", "/about", "/team", "/contact", "/people", "/leadership"],
    &["/about-us", "/our-team", "/company", "/staff", "/management"],
];

lazy_static! {
    static ref HIGH_VALUE_PATH_RE: Regex = Regex::new(
        r"(?i)/(about|team|people|leadership|staff|management|contact|founders?|executives?)(-us)?(/|$)"
    )
    .unwrap();
    static ref SOFT_404_RE: Regex = Regex::new(
        r"(?i)(page not found|404 error|nothing (was )?found|doesn't exist|no longer available)"
    )
    .unwrap();
}

/// One successfully fetched page.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub html: String,
    pub depth: u32,
}

/// Crawl summary alongside the pages.
#[derive(Debug, Clone, Default)]
pub struct CrawlStats {
    pub pages_fetched: usize,
    pub pages_blocked_robots: usize,
    pub pages_throttled: usize,
    pub pages_failed: usize,
}

pub fn is_high_value_path(path: &str) -> bool {
    HIGH_VALUE_PATH_RE.is_match(path)
}

/// A 200 whose body reads like an error page.
pub fn is_soft_404(body: &str) -> bool {
    let head: String = body.chars().take(4096).collect();
    SOFT_404_RE.is_match(&head)
}

/// Extract same-host paths from a page worth visiting next.
pub fn internal_paths(html: &str, base_host: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let path = match resolve_to_path(href, base_host) {
            Some(p) => p,
            None => continue,
        };
        if is_high_value_path(&path) && seen.insert(path.clone()) {
            out.push(path);
        }
    }
    out
}

/// Resolve an href to a path on `base_host`, or None for off-site links,
/// fragments, and non-http schemes.
fn resolve_to_path(href: &str, base_host: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if href.starts_with('/') {
        return Some(href.split(['#', '?']).next().unwrap_or(href).to_string());
    }
    let url = Url::parse(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.trim_start_matches("www.").to_lowercase();
    let base = base_host.trim_start_matches("www.").to_lowercase();
    if host != base {
        return None;
    }
    Some(url.path().to_string())
}

/// Crawl a domain through its seed tiers, expanding into discovered
/// high-value paths up to `max_depth`, stopping at `max_pages` fetched
/// pages. Robots-blocked paths are skipped, never stored, and do not fail
/// the domain.
#[instrument(skip(fetcher))]
pub async fn crawl_domain(
    fetcher: &Fetcher,
    domain: &str,
    max_pages: u32,
    max_depth: u32,
) -> (Vec<CrawledPage>, CrawlStats) {
    let origin = format!("https://{}", domain);
    let mut pages = Vec::new();
    let mut stats = CrawlStats::default();
    let mut visited: HashSet<String> = HashSet::new();
    // (path, depth) queue; tier two appended only when tier one was empty
    let mut queue: Vec<(String, u32)> = SEED_TIERS[0]
        .iter()
        .map(|p| (p.to_string(), 0))
        .collect();
    let mut tier_two_queued = false;

    while let Some((path, depth)) = pop_next(&mut queue) {
        if pages.len() as u32 >= max_pages {
            break;
        }
        if !visited.insert(path.clone()) {
            continue;
        }

        let url = format!("{}{}", origin, path);
        let result = match fetcher.fetch(&url).await {
            Ok(result) => result,
            Err(e) => {
                debug!("fetch error for {}: {}", url, e);
                stats.pages_failed += 1;
                continue;
            }
        };

        match result.reason {
            FetchReason::Ok | FetchReason::CachedFresh => {
                if result.body.is_empty() || is_soft_404(&result.body) {
                    stats.pages_failed += 1;
                    continue;
                }
                stats.pages_fetched += 1;

                if depth < max_depth {
                    for discovered in internal_paths(&result.body, domain) {
                        if !visited.contains(&discovered) {
                            queue.push((discovered, depth + 1));
                        }
                    }
                }

                pages.push(CrawledPage {
                    url: result.url,
                    html: result.body,
                    depth,
                });
            }
            FetchReason::BlockedByRobots => stats.pages_blocked_robots += 1,
            FetchReason::Throttled => {
                stats.pages_throttled += 1;
                // Host is cooling off; pushing more requests only extends it
                break;
            }
            _ => stats.pages_failed += 1,
        }

        // Sparse tier one: pull in the second seed tier once
        if !tier_two_queued && queue.is_empty() && pages.len() <= 1 {
            tier_two_queued = true;
            for p in SEED_TIERS[1] {
                if !visited.contains(*p) {
                    queue.push((p.to_string(), 0));
                }
            }
        }
    }

    (pages, stats)
}

/// FIFO pop; seed order is the priority order.
fn pop_next(queue: &mut Vec<(String, u32)>) -> Option<(String, u32)> {
    if queue.is_empty() {
        None
    } else {
        Some(queue.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_value_paths() {
        assert!(is_high_value_path("/team"));
        assert!(is_high_value_path("/about-us"));
        assert!(is_high_value_path("/people/leadership"));
        assert!(is_high_value_path("/TEAM/"));
        assert!(!is_high_value_path("/blog/post-1"));
        assert!(!is_high_value_path("/products"));
    }

    #[test]
    fn test_soft_404_detection() {
        assert!(is_soft_404("<title>Page Not Found</title>"));
        assert!(is_soft_404("Sorry, nothing found here"));
        assert!(!is_soft_404("<title>Our Team</title>"));
    }

    #[test]
    fn test_internal_paths_same_host_only() {
        let html = r##"
            <a href="/team">Team</a>
            <a href="/blog/post">Blog</a>
            <a href="https://example.com/about">About</a>
            <a href="https://other.org/team">Other</a>
            <a href="mailto:x@example.com">Mail</a>
            <a href="#section">Anchor</a>
        "##;
        let paths = internal_paths(html, "example.com");
        assert!(paths.contains(&"/team".to_string()));
        assert!(paths.contains(&"/about".to_string()));
        assert!(!paths.iter().any(|p| p.contains("blog")));
        assert_eq!(paths.iter().filter(|p| *p == "/team").count(), 1);
    }

    #[test]
    fn test_internal_paths_www_normalized() {
        let html = r#"<a href="https://www.example.com/people">People</a>"#;
        let paths = internal_paths(html, "example.com");
        assert_eq!(paths, vec!["/people".to_string()]);
    }

    #[test]
    fn test_resolve_strips_query_and_fragment() {
        assert_eq!(
            resolve_to_path("/team?tab=all#top", "example.com"),
            Some("/team".to_string())
        );
    }
}
