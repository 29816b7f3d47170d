// Candidate extraction boundary: the orchestrator only sees the
// `CandidateExtractor` trait. The shipped implementation is rule-based;
// AI-backed extractors plug in behind the same contract.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::debug;

/// One extracted person/email candidate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Candidate {
    pub first: Option<String>,
    pub last: Option<String>,
    pub full: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub source_url: String,
    /// Extraction confidence in [0, 1].
    pub confidence: f64,
}

/// Hints passed from the crawl context (e.g. the company domain, so
/// off-domain mailto links can be skipped).
#[derive(Debug, Clone, Default)]
pub struct ExtractionHints {
    pub company_domain: Option<String>,
}

#[async_trait]
pub trait CandidateExtractor: Send + Sync {
    async fn extract(
        &self,
        page_html: &str,
        source_url: &str,
        hints: &ExtractionHints,
    ) -> Vec<Candidate>;

    /// Whether this implementation is AI-backed (sets the company's
    /// `ai_people_extracted` attribute when it runs).
    fn is_ai_backed(&self) -> bool {
        false
    }
}

// =============================================================================
// PAGE CLASSIFIER
// =============================================================================

lazy_static! {
    static ref SKIP_URL_RE: Regex = Regex::new(
        r"(?i)/(press|news|blog|media|careers?/(openings|jobs)|jobs?|legal|privacy|terms)(/|$|\?)"
    )
    .unwrap();
}

/// Press-release and job-board style pages list many names that are not
/// employees; extraction short-circuits for them.
pub fn should_skip_page(url: &str, html: &str) -> bool {
    if SKIP_URL_RE.is_match(url) {
        return true;
    }
    let head_lower: String = html.chars().take(4096).collect::<String>().to_lowercase();
    head_lower.contains("press release") || head_lower.contains("job openings")
}

// =============================================================================
// HEURISTIC EXTRACTOR
// =============================================================================

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap();
    // "jane [at] example [dot] com" / "jane (at) example.com"
    static ref OBFUSCATED_RE: Regex = Regex::new(
        r"(?i)([A-Za-z0-9._%+\-]+)\s*[\[(]\s*at\s*[\])]\s*([A-Za-z0-9\-]+(?:\s*[\[(]\s*dot\s*[\])]\s*[A-Za-z0-9\-]+)+)"
    )
    .unwrap();
    static ref DOT_RE: Regex = Regex::new(r"(?i)\s*[\[(]\s*dot\s*[\])]\s*").unwrap();
    // Two-to-four capitalized words, allowing hyphens and apostrophes
    static ref NAME_RE: Regex = Regex::new(
        r"^[A-Z][a-zA-Z'\-]+(?: [A-Z][a-zA-Z'\-\.]*){1,3}$"
    )
    .unwrap();
    static ref TITLE_KEYWORD_RE: Regex = Regex::new(
        r"(?i)\b(ceo|cto|cfo|coo|chief|founder|president|director|head of|vp|vice president|manager|lead|engineer|officer|partner)\b"
    )
    .unwrap();
}

/// Rule-based extractor: people cards, plain-text names near title
/// keywords, mailto links, and obfuscated addresses.
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract_people_cards(document: &Html, source_url: &str, out: &mut Vec<Candidate>) {
        // Selectors are unwrap-safe: all literals
        let card_selector = Selector::parse(
            "[class*=team] [class*=member], [class*=team] [class*=card], \
             [class*=people] [class*=card], [class*=person], [class*=member], \
             [class*=profile], [class*=bio]",
        )
        .unwrap();
        let heading_selector = Selector::parse("h1, h2, h3, h4, h5, strong, b").unwrap();

        for card in document.select(&card_selector) {
            let text: Vec<String> = card
                .text()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            if text.is_empty() || text.len() > 30 {
                continue;
            }

            let mut name: Option<String> = None;
            let mut title: Option<String> = None;

            for heading in card.select(&heading_selector) {
                let heading_text = heading.text().collect::<String>().trim().to_string();
                if name.is_none() && NAME_RE.is_match(&heading_text) {
                    name = Some(heading_text);
                    break;
                }
            }
            if name.is_none() {
                name = text.iter().find(|t| NAME_RE.is_match(t)).cloned();
            }
            if let Some(ref n) = name {
                title = text
                    .iter()
                    .find(|t| *t != n && t.len() < 80 && TITLE_KEYWORD_RE.is_match(t))
                    .cloned();
            }

            if let Some(full) = name {
                let (first, last) = split_name(&full);
                out.push(Candidate {
                    first,
                    last,
                    full: Some(full),
                    title,
                    email: None,
                    source_url: source_url.to_string(),
                    confidence: if out.is_empty() { 0.7 } else { 0.6 },
                });
            }
        }
    }

    fn extract_mailto(
        document: &Html,
        source_url: &str,
        hints: &ExtractionHints,
        out: &mut Vec<Candidate>,
    ) {
        let selector = Selector::parse("a[href^='mailto:']").unwrap();
        for anchor in document.select(&selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let email = href
                .trim_start_matches("mailto:")
                .split('?')
                .next()
                .unwrap_or("")
                .trim()
                .to_lowercase();
            if !EMAIL_RE.is_match(&email) {
                continue;
            }
            if let Some(ref dom) = hints.company_domain {
                if !email.ends_with(&format!("@{}", dom)) {
                    debug!("skipping off-domain mailto {}", email);
                    continue;
                }
            }
            out.push(Candidate {
                email: Some(email),
                source_url: source_url.to_string(),
                confidence: 0.9,
                ..Default::default()
            });
        }
    }

    fn extract_text_emails(
        html: &str,
        source_url: &str,
        hints: &ExtractionHints,
        out: &mut Vec<Candidate>,
    ) {
        let on_domain = |email: &str| match hints.company_domain {
            Some(ref dom) => email.ends_with(&format!("@{}", dom)),
            None => true,
        };

        for m in EMAIL_RE.find_iter(html) {
            let email = m.as_str().to_lowercase();
            if on_domain(&email) {
                out.push(Candidate {
                    email: Some(email),
                    source_url: source_url.to_string(),
                    confidence: 0.8,
                    ..Default::default()
                });
            }
        }

        // Deobfuscate "jane [at] example [dot] com"
        for caps in OBFUSCATED_RE.captures_iter(html) {
            let local = caps[1].to_lowercase();
            let domain = DOT_RE.replace_all(&caps[2], ".").trim().to_lowercase();
            let email = format!("{}@{}", local, domain);
            if EMAIL_RE.is_match(&email) && on_domain(&email) {
                out.push(Candidate {
                    email: Some(email),
                    source_url: source_url.to_string(),
                    confidence: 0.7,
                    ..Default::default()
                });
            }
        }
    }
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandidateExtractor for HeuristicExtractor {
    async fn extract(
        &self,
        page_html: &str,
        source_url: &str,
        hints: &ExtractionHints,
    ) -> Vec<Candidate> {
        if should_skip_page(source_url, page_html) {
            debug!("page classifier skipped {}", source_url);
            return Vec::new();
        }

        let mut out = Vec::new();
        {
            let document = Html::parse_document(page_html);
            Self::extract_people_cards(&document, source_url, &mut out);
            Self::extract_mailto(&document, source_url, hints, &mut out);
        }
        Self::extract_text_emails(page_html, source_url, hints, &mut out);

        dedupe_candidates(out)
    }
}

/// Merge duplicate candidates: same email or same full name collapse into
/// one, keeping the highest-confidence fields.
fn dedupe_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();
    for cand in candidates {
        let existing = out.iter_mut().find(|c| {
            (cand.email.is_some() && c.email == cand.email)
                || (cand.full.is_some() && c.full == cand.full)
        });
        match existing {
            Some(prev) => {
                if cand.confidence > prev.confidence {
                    prev.confidence = cand.confidence;
                }
                if prev.title.is_none() {
                    prev.title = cand.title;
                }
                if prev.email.is_none() {
                    prev.email = cand.email;
                }
            }
            None => out.push(cand),
        }
    }
    out
}

/// Split a display name into (first, last). Middle tokens fold into last.
pub fn split_name(full: &str) -> (Option<String>, Option<String>) {
    let tokens: Vec<&str> = full.split_whitespace().collect();
    match tokens.len() {
        0 => (None, None),
        1 => (Some(tokens[0].to_string()), None),
        _ => (
            Some(tokens[0].to_string()),
            Some(tokens[1..].join(" ")),
        ),
    }
}

// =============================================================================
// TITLE NORMALIZATION
// =============================================================================

/// Normalized title facets persisted on People rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedTitle {
    pub title_norm: Option<String>,
    pub role_family: Option<String>,
    pub seniority: Option<String>,
}

/// Map a raw title to (normalized, role family, seniority).
pub fn normalize_title(raw: &str) -> NormalizedTitle {
    let lower = raw.trim().to_lowercase();
    if lower.is_empty() {
        return NormalizedTitle::default();
    }

    let role_family = if lower.contains("engineer") || lower.contains("developer") {
        Some("engineering")
    } else if lower.contains("market") {
        Some("marketing")
    } else if lower.contains("sales") || lower.contains("account exec") {
        Some("sales")
    } else if lower.contains("product") {
        Some("product")
    } else if lower.contains("finance") || lower.contains("cfo") {
        Some("finance")
    } else if lower.contains("people") || lower.contains("hr") || lower.contains("talent") {
        Some("people")
    } else if lower.contains("ceo")
        || lower.contains("cto")
        || lower.contains("coo")
        || lower.contains("founder")
        || lower.contains("chief")
    {
        Some("executive")
    } else {
        None
    };

    let seniority = if lower.contains("ceo")
        || lower.contains("cto")
        || lower.contains("cfo")
        || lower.contains("coo")
        || lower.contains("chief")
        || lower.contains("founder")
        || lower.contains("president")
    {
        Some("c_level")
    } else if lower.contains("vp") || lower.contains("vice president") {
        Some("vp")
    } else if lower.contains("director") || lower.contains("head of") {
        Some("director")
    } else if lower.contains("manager") || lower.contains("lead") {
        Some("manager")
    } else {
        Some("ic")
    };

    NormalizedTitle {
        title_norm: Some(lower),
        role_family: role_family.map(String::from),
        seniority: seniority.map(String::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(domain: &str) -> ExtractionHints {
        ExtractionHints {
            company_domain: Some(domain.to_string()),
        }
    }

    #[tokio::test]
    async fn test_extract_team_page() {
        let html = r#"
            <html><body>
            <div class="team-grid">
              <div class="team-member">
                <h3>Jane Doe</h3>
                <p>Chief Technology Officer</p>
              </div>
              <div class="team-member">
                <h3>John Smith</h3>
                <p>Head of Engineering</p>
                <a href="mailto:john.smith@example.com">email</a>
              </div>
            </div>
            </body></html>
        "#;
        let extractor = HeuristicExtractor::new();
        let candidates = extractor
            .extract(html, "https://example.com/team", &hints("example.com"))
            .await;

        let jane = candidates
            .iter()
            .find(|c| c.full.as_deref() == Some("Jane Doe"))
            .expect("Jane Doe extracted");
        assert_eq!(jane.first.as_deref(), Some("Jane"));
        assert_eq!(jane.last.as_deref(), Some("Doe"));
        assert_eq!(jane.title.as_deref(), Some("Chief Technology Officer"));

        assert!(candidates
            .iter()
            .any(|c| c.email.as_deref() == Some("john.smith@example.com")));
    }

    #[tokio::test]
    async fn test_off_domain_mailto_skipped() {
        let html = r#"<a href="mailto:jane@other.org">x</a>"#;
        let extractor = HeuristicExtractor::new();
        let candidates = extractor
            .extract(html, "https://example.com/contact", &hints("example.com"))
            .await;
        assert!(candidates.iter().all(|c| c.email.is_none()));
    }

    #[tokio::test]
    async fn test_obfuscated_email() {
        let html = "<p>Reach jane [at] example [dot] com for details.</p>";
        let extractor = HeuristicExtractor::new();
        let candidates = extractor
            .extract(html, "https://example.com/contact", &hints("example.com"))
            .await;
        assert!(candidates
            .iter()
            .any(|c| c.email.as_deref() == Some("jane@example.com")));
    }

    #[tokio::test]
    async fn test_press_page_short_circuits() {
        let html = "<div class='person'><h3>Famous Person</h3></div>";
        let extractor = HeuristicExtractor::new();
        let candidates = extractor
            .extract(html, "https://example.com/press/2024-launch", &hints("example.com"))
            .await;
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("Jane Doe"),
            (Some("Jane".into()), Some("Doe".into()))
        );
        assert_eq!(
            split_name("Jane van der Berg"),
            (Some("Jane".into()), Some("van der Berg".into()))
        );
        assert_eq!(split_name("Cher"), (Some("Cher".into()), None));
        assert_eq!(split_name(""), (None, None));
    }

    #[test]
    fn test_normalize_title() {
        let norm = normalize_title("Chief Technology Officer");
        assert_eq!(norm.role_family.as_deref(), Some("executive"));
        assert_eq!(norm.seniority.as_deref(), Some("c_level"));

        let norm = normalize_title("Senior Software Engineer");
        assert_eq!(norm.role_family.as_deref(), Some("engineering"));
        assert_eq!(norm.seniority.as_deref(), Some("ic"));

        let norm = normalize_title("VP of Marketing");
        assert_eq!(norm.role_family.as_deref(), Some("marketing"));
        assert_eq!(norm.seniority.as_deref(), Some("vp"));

        assert_eq!(normalize_title(""), NormalizedTitle::default());
    }

    #[test]
    fn test_dedupe_candidates() {
        let candidates = vec![
            Candidate {
                email: Some("jane@example.com".into()),
                confidence: 0.8,
                source_url: "u".into(),
                ..Default::default()
            },
            Candidate {
                email: Some("jane@example.com".into()),
                confidence: 0.9,
                source_url: "u".into(),
                ..Default::default()
            },
        ];
        let deduped = dedupe_candidates(candidates);
        assert_eq!(deduped.len(), 1);
        assert!((deduped[0].confidence - 0.9).abs() < f64::EPSILON);
    }
}
