// Domain and email normalization helpers.

use std::collections::HashSet;

use lazy_static::lazy_static;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Input string is empty")]
    Empty,
    #[error("Could not extract a valid domain from {0:?}")]
    Extraction(String),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

lazy_static! {
    /// Consumer providers excluded from corporate verification. MX resolution
    /// short-circuits for these without touching the network.
    pub static ref FREEMAIL_DOMAINS: HashSet<&'static str> = [
        "gmail.com",
        "googlemail.com",
        "yahoo.com",
        "yahoo.co.uk",
        "hotmail.com",
        "hotmail.co.uk",
        "outlook.com",
        "live.com",
        "msn.com",
        "aol.com",
        "icloud.com",
        "me.com",
        "mail.com",
        "gmx.com",
        "gmx.de",
        "proton.me",
        "protonmail.com",
        "zoho.com",
        "yandex.com",
        "yandex.ru",
    ]
    .into_iter()
    .collect();
}

/// Extracts the base domain ("example.com") from a URL or bare domain string
/// and normalizes it to lowercase ASCII punycode.
///
/// Handles missing schemes, `www.` prefixes, ports, and paths. Unicode
/// hostnames come back IDNA-encoded because `Url` punycodes hosts on parse.
pub fn normalize_domain(input: &str) -> Result<String, DomainError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Empty);
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&with_scheme)?;
    let host = url
        .host_str()
        .ok_or_else(|| DomainError::Extraction(trimmed.to_string()))?;

    let domain = host.strip_prefix("www.").unwrap_or(host).to_lowercase();

    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(DomainError::Extraction(domain));
    }

    Ok(domain)
}

/// De-dupe + normalize a batch of user-supplied domains, preserving first
/// occurrence order. Invalid entries are dropped.
pub fn normalize_domain_batch(inputs: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in inputs {
        if let Ok(dom) = normalize_domain(raw) {
            if seen.insert(dom.clone()) {
                out.push(dom);
            }
        }
    }
    out
}

pub fn is_freemail(domain: &str) -> bool {
    FREEMAIL_DOMAINS.contains(domain.trim().to_lowercase().as_str())
}

/// Splits a trimmed email into (local, domain) with the domain normalized.
/// Local-part case is preserved; only the domain is lowercased.
pub fn split_email(email: &str) -> Result<(String, String), DomainError> {
    let s = email.trim();
    let (local, domain) = s
        .rsplit_once('@')
        .ok_or_else(|| DomainError::Extraction(s.to_string()))?;
    if local.is_empty() || domain.is_empty() {
        return Err(DomainError::Extraction(s.to_string()));
    }
    Ok((local.to_string(), normalize_domain(domain)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain_valid() {
        assert_eq!(
            normalize_domain("https://www.example.com").unwrap(),
            "example.com"
        );
        assert_eq!(normalize_domain("example.com").unwrap(), "example.com");
        assert_eq!(normalize_domain("www.example.com").unwrap(), "example.com");
        assert_eq!(
            normalize_domain("https://EXAMPLE.com/path?query=1").unwrap(),
            "example.com"
        );
        assert_eq!(
            normalize_domain("http://example.com:8080").unwrap(),
            "example.com"
        );
        assert_eq!(
            normalize_domain(" sub.example.co.uk ").unwrap(),
            "sub.example.co.uk"
        );
    }

    #[test]
    fn test_normalize_domain_punycode() {
        // Unicode hosts must come back as ASCII punycode
        assert_eq!(normalize_domain("bücher.de").unwrap(), "xn--bcher-kva.de");
        assert_eq!(
            normalize_domain("https://münchen.example").unwrap(),
            "xn--mnchen-3ya.example"
        );
    }

    #[test]
    fn test_normalize_domain_invalid() {
        assert!(normalize_domain("").is_err());
        assert!(normalize_domain("   ").is_err());
        assert!(normalize_domain("http://").is_err());
        assert!(normalize_domain(".com").is_err());
        assert!(normalize_domain("nodot").is_err());
    }

    #[test]
    fn test_normalize_batch_dedupes() {
        let input = vec![
            "Example.com".to_string(),
            "https://www.example.com".to_string(),
            "other.org".to_string(),
            "".to_string(),
        ];
        assert_eq!(
            normalize_domain_batch(&input),
            vec!["example.com".to_string(), "other.org".to_string()]
        );
    }

    #[test]
    fn test_freemail() {
        assert!(is_freemail("gmail.com"));
        assert!(is_freemail(" GMAIL.com "));
        assert!(!is_freemail("example.com"));
    }

    #[test]
    fn test_split_email() {
        let (local, domain) = split_email("Jane.Doe@EXAMPLE.com").unwrap();
        assert_eq!(local, "Jane.Doe");
        assert_eq!(domain, "example.com");
        assert!(split_email("no-at-sign").is_err());
        assert!(split_email("@example.com").is_err());
    }
}
