// robots.txt policy evaluation through the public parser.

use std::time::Duration;

use leadpipe_backend_core::services::fetcher::parse_robots;

const UA: &str = "leadpipe-bot/1.0";
const TTL: Duration = Duration::from_secs(3600);

#[test]
fn team_path_disallow() {
    // The autodiscovery scenario: /team/ disallowed, everything else open
    let policy = parse_robots("User-agent: *\nDisallow: /team/\n", UA, TTL);
    assert!(!policy.is_allowed("/team/"));
    assert!(!policy.is_allowed("/team/jane-doe"));
    assert!(policy.is_allowed("/"));
    assert!(policy.is_allowed("/about"));
    assert!(policy.is_allowed("/contact"));
    // "/team" without the trailing slash is a different path
    assert!(policy.is_allowed("/team"));
}

#[test]
fn deny_all_policy() {
    let policy = parse_robots("User-agent: *\nDisallow: /\n", UA, TTL);
    assert!(!policy.is_allowed("/"));
    assert!(!policy.is_allowed("/anything"));
}

#[test]
fn our_agent_overrides_wildcard() {
    let text = "User-agent: *\nDisallow: /\n\nUser-agent: leadpipe-bot\nAllow: /\nDisallow: /private\n";
    let policy = parse_robots(text, UA, TTL);
    assert!(policy.is_allowed("/team"));
    assert!(!policy.is_allowed("/private"));
}

#[test]
fn crawl_delay_for_matched_group() {
    let text = "User-agent: *\nCrawl-delay: 2\n\nUser-agent: leadpipe-bot\nCrawl-delay: 9\nDisallow: /x\n";
    let policy = parse_robots(text, UA, TTL);
    assert_eq!(policy.crawl_delay(), Some(9.0));
}

#[test]
fn empty_file_allows_everything() {
    let policy = parse_robots("", UA, TTL);
    assert!(policy.is_allowed("/team"));
    assert!(policy.is_allowed("/"));
}

#[test]
fn comments_and_blank_lines_ignored() {
    let text = "# corp robots\n\nUser-agent: * # everyone\nDisallow: /secret # hidden\n";
    let policy = parse_robots(text, UA, TTL);
    assert!(!policy.is_allowed("/secret"));
    assert!(policy.is_allowed("/public"));
}

#[test]
fn wildcard_and_anchor_rules() {
    let policy = parse_robots(
        "User-agent: *\nDisallow: /*/download\nDisallow: /*.cgi$\n",
        UA,
        TTL,
    );
    assert!(!policy.is_allowed("/files/download"));
    assert!(!policy.is_allowed("/scripts/run.cgi"));
    assert!(policy.is_allowed("/scripts/run.cgi.html"));
    assert!(policy.is_allowed("/files/view"));
}
