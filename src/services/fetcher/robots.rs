// robots.txt fetching, parsing, and per-host policy caching.
//
// Cache policy: 1h on a successful fetch, 24h allow-all on 404, and a short
// deny-all window on 5xx so a flapping server is not hammered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

// =============================================================================
// PARSED POLICY
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum RuleKind {
    Allow,
    Disallow,
}

#[derive(Debug, Clone)]
struct Rule {
    kind: RuleKind,
    path: String,
}

/// Effective policy for one host and one user agent.
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
    allow_all: bool,
    deny_all: bool,
    fetched_at: Instant,
    ttl: Duration,
}

impl RobotsPolicy {
    fn allow_all(ttl: Duration) -> Self {
        Self {
            rules: Vec::new(),
            crawl_delay: None,
            allow_all: true,
            deny_all: false,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    fn deny_all(ttl: Duration) -> Self {
        Self {
            rules: Vec::new(),
            crawl_delay: None,
            allow_all: false,
            deny_all: true,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }

    pub fn crawl_delay(&self) -> Option<f64> {
        self.crawl_delay
    }

    /// Evaluate a path against the policy. Longest matching rule wins; an
    /// Allow and Disallow of equal length resolve to Allow. No rules → allow.
    pub fn is_allowed(&self, path: &str) -> bool {
        if self.allow_all {
            return true;
        }
        if self.deny_all {
            return false;
        }

        let path = if path.is_empty() { "/" } else { path };
        let mut best: Option<(&Rule, usize)> = None;

        for rule in &self.rules {
            if let Some(len) = rule_match_len(&rule.path, path) {
                match best {
                    Some((b, blen))
                        if blen > len || (blen == len && b.kind == RuleKind::Allow) => {}
                    _ => best = Some((rule, len)),
                }
            }
        }

        match best {
            Some((rule, _)) => rule.kind == RuleKind::Allow,
            None => true,
        }
    }
}

/// Length of the rule match against a path, or None. Supports `*` wildcards
/// and the `$` end anchor; an empty Disallow pattern matches nothing.
fn rule_match_len(pattern: &str, path: &str) -> Option<usize> {
    if pattern.is_empty() {
        return None;
    }

    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0usize;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !path.starts_with(part) {
                return None;
            }
            pos = part.len();
        } else {
            match path[pos..].find(part) {
                Some(idx) => pos = pos + idx + part.len(),
                None => return None,
            }
        }
    }

    if anchored {
        // Last literal must reach the end of the path
        if parts.last().map_or(true, |p| p.is_empty()) {
            // trailing '*' before '$' matches anything
        } else if pos != path.len() {
            return None;
        }
    }

    Some(pattern.len())
}

// =============================================================================
// PARSER
// =============================================================================

struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_groups(text: &str) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut current: Option<Group> = None;
    // A run of consecutive User-agent lines shares one group
    let mut in_agent_run = false;

    for raw in text.lines() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "user-agent" => {
                if in_agent_run {
                    if let Some(g) = current.as_mut() {
                        g.agents.push(value.to_lowercase());
                    }
                } else {
                    if let Some(g) = current.take() {
                        groups.push(g);
                    }
                    current = Some(Group {
                        agents: vec![value.to_lowercase()],
                        rules: Vec::new(),
                        crawl_delay: None,
                    });
                    in_agent_run = true;
                }
            }
            "allow" | "disallow" => {
                in_agent_run = false;
                if let Some(g) = current.as_mut() {
                    if key == "allow" && value.is_empty() {
                        continue;
                    }
                    g.rules.push(Rule {
                        kind: if key == "allow" {
                            RuleKind::Allow
                        } else {
                            RuleKind::Disallow
                        },
                        path: value,
                    });
                }
            }
            "crawl-delay" => {
                in_agent_run = false;
                if let Some(g) = current.as_mut() {
                    g.crawl_delay = value.parse().ok();
                }
            }
            _ => {
                in_agent_run = false;
            }
        }
    }
    if let Some(g) = current.take() {
        groups.push(g);
    }
    groups
}

/// Pick the most specific matching group for our user agent: exact product
/// token match beats substring match beats the `*` group.
fn best_group_for_ua<'a>(groups: &'a [Group], ua: &str) -> Option<&'a Group> {
    let ua_token = ua
        .split('/')
        .next()
        .unwrap_or(ua)
        .trim()
        .to_lowercase();

    let mut wildcard: Option<&Group> = None;
    let mut substring: Option<&Group> = None;

    for group in groups {
        for agent in &group.agents {
            if agent == "*" {
                wildcard.get_or_insert(group);
            } else if *agent == ua_token {
                return Some(group);
            } else if ua_token.contains(agent.as_str()) || agent.contains(ua_token.as_str()) {
                substring.get_or_insert(group);
            }
        }
    }
    substring.or(wildcard)
}

/// Build a policy for our user agent from robots.txt text.
pub fn parse_robots(text: &str, user_agent: &str, ttl: Duration) -> RobotsPolicy {
    let groups = parse_groups(text);
    match best_group_for_ua(&groups, user_agent) {
        Some(group) => RobotsPolicy {
            rules: group.rules.clone(),
            crawl_delay: group.crawl_delay,
            allow_all: group.rules.is_empty(),
            deny_all: false,
            fetched_at: Instant::now(),
            ttl,
        },
        None => RobotsPolicy::allow_all(ttl),
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// Per-host robots policy cache. Read-mostly; a stale entry is refetched by
/// the first caller to observe it.
pub struct RobotsCache {
    http: reqwest::Client,
    user_agent: String,
    success_ttl: Duration,
    deny_ttl: Duration,
    not_found_ttl: Duration,
    policies: Arc<RwLock<HashMap<String, RobotsPolicy>>>,
}

impl RobotsCache {
    pub fn new(
        http: reqwest::Client,
        user_agent: String,
        success_ttl: Duration,
        deny_ttl: Duration,
    ) -> Self {
        Self {
            http,
            user_agent,
            success_ttl,
            deny_ttl,
            not_found_ttl: Duration::from_secs(24 * 60 * 60),
            policies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the cached policy for a host, fetching robots.txt on miss/expiry.
    #[instrument(skip(self))]
    pub async fn policy(&self, host: &str) -> RobotsPolicy {
        let host = host.trim().to_lowercase();

        {
            let cache = self.policies.read().await;
            if let Some(policy) = cache.get(&host) {
                if policy.is_fresh() {
                    return policy.clone();
                }
            }
        }

        let policy = self.fetch_policy(&host).await;
        let mut cache = self.policies.write().await;
        cache.insert(host, policy.clone());
        policy
    }

    /// Whether a URL path is allowed for this host right now.
    pub async fn is_allowed(&self, host: &str, path: &str) -> bool {
        self.policy(host).await.is_allowed(path)
    }

    /// Crawl-delay for the host, if robots declares one.
    pub async fn crawl_delay(&self, host: &str) -> Option<f64> {
        self.policy(host).await.crawl_delay()
    }

    async fn fetch_policy(&self, host: &str) -> RobotsPolicy {
        let url = format!("https://{}/robots.txt", host);
        debug!("fetching {}", url);

        let resp = self
            .http
            .get(&url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await;

        match resp {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    match resp.text().await {
                        Ok(text) => parse_robots(&text, &self.user_agent, self.success_ttl),
                        Err(e) => {
                            warn!("robots.txt body read failed for {}: {}", host, e);
                            RobotsPolicy::deny_all(self.deny_ttl)
                        }
                    }
                } else if status.as_u16() == 404 {
                    // Missing robots.txt means the whole site is crawlable
                    RobotsPolicy::allow_all(self.not_found_ttl)
                } else if status.is_server_error() {
                    warn!("robots.txt {} for {}; denying for {:?}", status, host, self.deny_ttl);
                    RobotsPolicy::deny_all(self.deny_ttl)
                } else {
                    // 401/403 on robots.txt: treat as full disallow per RFC 9309
                    RobotsPolicy::deny_all(self.success_ttl)
                }
            }
            Err(e) => {
                warn!("robots.txt fetch failed for {}: {}", host, e);
                RobotsPolicy::deny_all(self.deny_ttl)
            }
        }
    }

    /// Drop a host's cached policy (next access refetches).
    pub async fn invalidate(&self, host: &str) {
        let mut cache = self.policies.write().await;
        cache.remove(&host.trim().to_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "leadpipe-bot/1.0";
    const TTL: Duration = Duration::from_secs(3600);

    #[test]
    fn test_disallow_path() {
        let policy = parse_robots("User-agent: *\nDisallow: /team/\n", UA, TTL);
        assert!(!policy.is_allowed("/team/"));
        assert!(!policy.is_allowed("/team/jane"));
        assert!(policy.is_allowed("/about"));
        assert!(policy.is_allowed("/"));
    }

    #[test]
    fn test_allow_overrides_equal_disallow() {
        let policy = parse_robots(
            "User-agent: *\nDisallow: /private/\nAllow: /private/team\n",
            UA,
            TTL,
        );
        assert!(policy.is_allowed("/private/team"));
        assert!(!policy.is_allowed("/private/other"));
    }

    #[test]
    fn test_empty_disallow_allows_everything() {
        let policy = parse_robots("User-agent: *\nDisallow:\n", UA, TTL);
        assert!(policy.is_allowed("/anything"));
    }

    #[test]
    fn test_specific_agent_group_wins() {
        let text = "User-agent: *\nDisallow: /\n\nUser-agent: leadpipe-bot\nDisallow: /admin\n";
        let policy = parse_robots(text, UA, TTL);
        assert!(policy.is_allowed("/team"));
        assert!(!policy.is_allowed("/admin"));
    }

    #[test]
    fn test_crawl_delay_parsed() {
        let policy = parse_robots("User-agent: *\nCrawl-delay: 7\nDisallow: /x\n", UA, TTL);
        assert_eq!(policy.crawl_delay(), Some(7.0));
    }

    #[test]
    fn test_wildcard_rule() {
        let policy = parse_robots("User-agent: *\nDisallow: /*/print\n", UA, TTL);
        assert!(!policy.is_allowed("/docs/print"));
        assert!(policy.is_allowed("/docs/page"));
    }

    #[test]
    fn test_anchored_rule() {
        let policy = parse_robots("User-agent: *\nDisallow: /*.pdf$\n", UA, TTL);
        assert!(!policy.is_allowed("/files/report.pdf"));
        assert!(policy.is_allowed("/files/report.pdf.html"));
    }

    #[test]
    fn test_shared_agent_run() {
        let text = "User-agent: botA\nUser-agent: leadpipe-bot\nDisallow: /secret\n";
        let policy = parse_robots(text, UA, TTL);
        assert!(!policy.is_allowed("/secret"));
        assert!(policy.is_allowed("/open"));
    }

    #[test]
    fn test_no_groups_allows_all() {
        let policy = parse_robots("# empty file\n", UA, TTL);
        assert!(policy.is_allowed("/anything"));
    }

    #[test]
    fn test_longest_match_wins() {
        let policy = parse_robots(
            "User-agent: *\nAllow: /team/public\nDisallow: /team\n",
            UA,
            TTL,
        );
        assert!(policy.is_allowed("/team/public/jane"));
        assert!(!policy.is_allowed("/team/private"));
    }
}
