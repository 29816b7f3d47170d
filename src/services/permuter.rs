// Email permutation: canonical local-part patterns, domain pattern
// inference from published addresses, and ranked candidate generation.

use std::collections::HashSet;

use lazy_static::lazy_static;
use serde::Serialize;
use tracing::debug;

/// Candidate cap per person.
pub const MAX_CANDIDATES: usize = 8;

/// Canonical pattern keys in prior (no-inference) rank order. Inference
/// tie-breaks resolve to the first key in this order, so it must stay
/// stable.
pub const PATTERN_PRIORITY: [&str; 9] = [
    "first.last",
    "f.last",
    "firstl",
    "flast",
    "first",
    "last",
    "first_last",
    "first-last",
    "firstlast",
];

lazy_static! {
    /// Role/distribution aliases never generated for a specific person.
    static ref ROLE_ALIASES: HashSet<&'static str> = [
        "info", "sales", "support", "hello", "marketing", "press", "admin",
        "contact", "team", "office", "hr", "jobs", "careers", "noreply",
        "no-reply", "postmaster", "webmaster", "abuse", "billing", "help",
    ]
    .into_iter()
    .collect();
}

/// Apply a canonical pattern key to normalized name parts. Returns None for
/// unknown keys or names that normalize away entirely.
pub fn apply_pattern(first: &str, last: &str, key: &str) -> Option<String> {
    let (fn_, ln) = norm_name(first, last);
    if fn_.is_empty() && ln.is_empty() {
        return None;
    }
    let fi = fn_.chars().next().map(|c| c.to_string()).unwrap_or_default();

    let local = match key {
        "first.last" => join_nonempty(&fn_, &ln, "."),
        "f.last" => join_nonempty(&fi, &ln, "."),
        "firstl" => format!("{}{}", fn_, ln.chars().next().map(|c| c.to_string()).unwrap_or_default()),
        "flast" => format!("{}{}", fi, ln),
        "first" => fn_.clone(),
        "last" => ln.clone(),
        "first_last" => join_nonempty(&fn_, &ln, "_"),
        "first-last" => join_nonempty(&fn_, &ln, "-"),
        "firstlast" => format!("{}{}", fn_, ln),
        _ => return None,
    };

    if local.is_empty() {
        None
    } else {
        Some(local)
    }
}

fn join_nonempty(a: &str, b: &str, sep: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (false, false) => format!("{}{}{}", a, sep, b),
        (false, true) => a.to_string(),
        (true, false) => b.to_string(),
        (true, true) => String::new(),
    }
}

/// Normalize name parts: ASCII-fold, lowercase, keep [a-z0-9] only.
pub fn norm_name(first: &str, last: &str) -> (String, String) {
    (fold_ascii(first), fold_ascii(last))
}

fn fold_ascii(s: &str) -> String {
    s.chars()
        .flat_map(fold_char)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Map common Latin diacritics to ASCII; everything else passes through and
/// is dropped later if still non-ASCII.
fn fold_char(c: char) -> Vec<char> {
    let folded: &str = match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => "a",
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => "e",
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => "i",
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' | 'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' | 'Ø' => "o",
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => "u",
        'ý' | 'ÿ' | 'Ý' => "y",
        'ñ' | 'Ñ' => "n",
        'ç' | 'Ç' => "c",
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'œ' | 'Œ' => "oe",
        _ => return vec![c],
    };
    folded.chars().collect()
}

pub fn is_role_alias(local: &str) -> bool {
    let local = local.to_lowercase();
    // "info+anything" is still a role address
    let base = local.split('+').next().unwrap_or(&local);
    ROLE_ALIASES.contains(base)
}

// =============================================================================
// PATTERN INFERENCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternInference {
    pub pattern: Option<String>,
    pub confidence: f64,
    pub samples: usize,
}

/// Infer the company's email pattern from published `(first, last,
/// local_part)` examples. The modal pattern wins when it has ≥ 2 hits and
/// ≥ 0.8 agreement among non-role examples; otherwise no inference.
pub fn infer_domain_pattern(examples: &[(String, String, String)]) -> PatternInference {
    let usable: Vec<&(String, String, String)> = examples
        .iter()
        .filter(|(_, _, lp)| !is_role_alias(lp))
        .collect();
    let n = usable.len();
    if n < 2 {
        return PatternInference {
            pattern: None,
            confidence: 0.0,
            samples: n,
        };
    }

    let mut best: Option<(&str, usize)> = None;
    for key in PATTERN_PRIORITY {
        let hits = usable
            .iter()
            .filter(|(first, last, lp)| apply_pattern(first, last, key).as_deref() == Some(lp))
            .count();
        match best {
            Some((_, b)) if b >= hits => {}
            _ => best = Some((key, hits)),
        }
    }

    match best {
        Some((key, hits)) => {
            let confidence = hits as f64 / n as f64;
            if hits >= 2 && confidence >= 0.80 {
                PatternInference {
                    pattern: Some(key.to_string()),
                    confidence,
                    samples: n,
                }
            } else {
                PatternInference {
                    pattern: None,
                    confidence,
                    samples: n,
                }
            }
        }
        None => PatternInference {
            pattern: None,
            confidence: 0.0,
            samples: n,
        },
    }
}

// =============================================================================
// CANDIDATE GENERATION
// =============================================================================

/// Ranked email candidates for a person. A detected company pattern ranks
/// first; remaining patterns follow the prior ordering. Role aliases and
/// duplicates are skipped; output is capped at [`MAX_CANDIDATES`].
pub fn generate_candidates(
    first: &str,
    last: &str,
    domain: &str,
    company_pattern: Option<&str>,
) -> Vec<String> {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() || !domain.contains('.') {
        return Vec::new();
    }
    let (fn_, ln) = norm_name(first, last);
    if fn_.is_empty() && ln.is_empty() {
        debug!("no usable name parts for '{} {}'", first, last);
        return Vec::new();
    }

    let mut keys: Vec<&str> = Vec::with_capacity(PATTERN_PRIORITY.len() + 1);
    if let Some(pattern) = company_pattern {
        keys.push(pattern);
    }
    for key in PATTERN_PRIORITY {
        if Some(key) != company_pattern {
            keys.push(key);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for key in keys {
        if out.len() >= MAX_CANDIDATES {
            break;
        }
        let Some(local) = apply_pattern(first, last, key) else {
            continue;
        };
        if is_role_alias(&local) {
            continue;
        }
        let email = format!("{}@{}", local, domain);
        if seen.insert(email.clone()) {
            out.push(email);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ex(first: &str, last: &str, lp: &str) -> (String, String, String) {
        (first.to_string(), last.to_string(), lp.to_string())
    }

    #[test]
    fn test_apply_pattern_basic() {
        assert_eq!(
            apply_pattern("Jane", "Doe", "first.last").as_deref(),
            Some("jane.doe")
        );
        assert_eq!(apply_pattern("Jane", "Doe", "flast").as_deref(), Some("jdoe"));
        assert_eq!(apply_pattern("Jane", "Doe", "firstl").as_deref(), Some("janed"));
        assert_eq!(apply_pattern("Jane", "Doe", "first").as_deref(), Some("jane"));
        assert_eq!(apply_pattern("Jane", "Doe", "f.last").as_deref(), Some("j.doe"));
        assert_eq!(apply_pattern("Jane", "Doe", "bogus"), None);
    }

    #[test]
    fn test_norm_name_folds_accents() {
        assert_eq!(norm_name("José", "Núñez"), ("jose".into(), "nunez".into()));
        assert_eq!(norm_name("François", "Müller"), ("francois".into(), "muller".into()));
        // Hyphens and apostrophes are stripped, not separated
        assert_eq!(norm_name("Jean-Luc", "O'Brien"), ("jeanluc".into(), "obrien".into()));
    }

    #[test]
    fn test_role_aliases() {
        assert!(is_role_alias("info"));
        assert!(is_role_alias("Info"));
        assert!(is_role_alias("info+sales"));
        assert!(is_role_alias("noreply"));
        assert!(!is_role_alias("jane.doe"));
    }

    #[test]
    fn test_infer_modal_pattern() {
        let examples = vec![
            ex("Jane", "Doe", "jane.doe"),
            ex("John", "Smith", "john.smith"),
            ex("Ada", "Lovelace", "ada.lovelace"),
        ];
        let inference = infer_domain_pattern(&examples);
        assert_eq!(inference.pattern.as_deref(), Some("first.last"));
        assert!(inference.confidence >= 0.99);
        assert_eq!(inference.samples, 3);
    }

    #[test]
    fn test_infer_needs_two_hits() {
        let examples = vec![
            ex("Jane", "Doe", "jane.doe"),
            ex("John", "Smith", "jsmith55"),
        ];
        assert_eq!(infer_domain_pattern(&examples).pattern, None);
    }

    #[test]
    fn test_infer_needs_dominance() {
        // 2 of 4 match: below the 0.8 agreement bar
        let examples = vec![
            ex("Jane", "Doe", "jane.doe"),
            ex("John", "Smith", "john.smith"),
            ex("Ada", "Lovelace", "alovelace"),
            ex("Grace", "Hopper", "ghopper"),
        ];
        assert_eq!(infer_domain_pattern(&examples).pattern, None);
    }

    #[test]
    fn test_infer_tie_breaks_on_priority_order() {
        // Single-letter names make several patterns emit the same local
        // part ("jd" matches firstl, flast, and firstlast); the tie must
        // resolve to the earliest key in PATTERN_PRIORITY.
        let examples = vec![ex("J", "D", "jd"), ex("A", "B", "ab")];
        let inference = infer_domain_pattern(&examples);
        assert_eq!(inference.pattern.as_deref(), Some("firstl"));
        assert!(inference.confidence >= 0.99);
    }

    #[test]
    fn test_infer_ignores_role_aliases() {
        let examples = vec![
            ex("Jane", "Doe", "jane.doe"),
            ex("John", "Smith", "john.smith"),
            ex("", "", "info"),
            ex("", "", "sales"),
        ];
        let inference = infer_domain_pattern(&examples);
        assert_eq!(inference.pattern.as_deref(), Some("first.last"));
        assert_eq!(inference.samples, 2);
    }

    #[test]
    fn test_generate_ranked_candidates() {
        let candidates = generate_candidates("Jane", "Doe", "example.com", None);
        assert!(!candidates.is_empty());
        assert!(candidates.len() <= MAX_CANDIDATES);
        // Prior ranking puts first.last first
        assert_eq!(candidates[0], "jane.doe@example.com");
        assert!(candidates.contains(&"jdoe@example.com".to_string()));
        // No duplicates
        let unique: HashSet<&String> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
    }

    #[test]
    fn test_generate_prefers_company_pattern() {
        let candidates = generate_candidates("Jane", "Doe", "example.com", Some("flast"));
        assert_eq!(candidates[0], "jdoe@example.com");
    }

    #[test]
    fn test_generate_rejects_invalid_domain() {
        assert!(generate_candidates("Jane", "Doe", "", None).is_empty());
        assert!(generate_candidates("Jane", "Doe", "nodot", None).is_empty());
    }

    #[test]
    fn test_generate_empty_names() {
        assert!(generate_candidates("", "", "example.com", None).is_empty());
        assert!(generate_candidates("$%^", "!!", "example.com", None).is_empty());
    }

    #[test]
    fn test_generate_single_name_part() {
        let candidates = generate_candidates("Cher", "", "example.com", None);
        assert!(candidates.contains(&"cher@example.com".to_string()));
        // Separator patterns collapse to the single part, deduped
        let unique: HashSet<&String> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
    }
}
