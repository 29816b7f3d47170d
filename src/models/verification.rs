// Verification result models and the canonical verdict enums.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::verification_results;

// =============================================================================
// VERDICT ENUMS
// =============================================================================

/// Canonical four-value verdict attached to an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Valid,
    RiskyCatchAll,
    Invalid,
    UnknownTimeout,
}

impl VerifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyStatus::Valid => "valid",
            VerifyStatus::RiskyCatchAll => "risky_catch_all",
            VerifyStatus::Invalid => "invalid",
            VerifyStatus::UnknownTimeout => "unknown_timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "valid" => Some(VerifyStatus::Valid),
            "risky_catch_all" => Some(VerifyStatus::RiskyCatchAll),
            "invalid" => Some(VerifyStatus::Invalid),
            "unknown_timeout" => Some(VerifyStatus::UnknownTimeout),
            _ => None,
        }
    }

    /// A conclusive verdict ends the retry loop for an email.
    pub fn is_conclusive(&self) -> bool {
        !matches!(self, VerifyStatus::UnknownTimeout)
    }
}

/// Raw SMTP RCPT outcome from the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpCategory {
    Accept,
    HardFail,
    TempFail,
    Unknown,
}

impl SmtpCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmtpCategory::Accept => "accept",
            SmtpCategory::HardFail => "hard_fail",
            SmtpCategory::TempFail => "temp_fail",
            SmtpCategory::Unknown => "unknown",
        }
    }

    /// Classify an SMTP reply code; anything outside 2xx/4xx/5xx is unknown.
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(c) if (200..300).contains(&c) => SmtpCategory::Accept,
            Some(c) if (500..600).contains(&c) => SmtpCategory::HardFail,
            Some(c) if (400..500).contains(&c) => SmtpCategory::TempFail,
            _ => SmtpCategory::Unknown,
        }
    }
}

/// Third-party fallback provider verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStatus {
    Deliverable,
    Undeliverable,
    Unknown,
}

impl FallbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStatus::Deliverable => "deliverable",
            FallbackStatus::Undeliverable => "undeliverable",
            FallbackStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deliverable" => Some(FallbackStatus::Deliverable),
            "undeliverable" => Some(FallbackStatus::Undeliverable),
            "unknown" => Some(FallbackStatus::Unknown),
            _ => None,
        }
    }
}

// =============================================================================
// DATABASE MODELS
// =============================================================================

/// Append-only verification audit row. Many per email over time; the latest
/// row (by `COALESCE(verified_at, checked_at)`, tie-broken by id) wins.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable, Identifiable, Serialize)]
#[diesel(table_name = verification_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VerificationResult {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email_id: Uuid,
    pub mx_host: Option<String>,
    pub smtp_code: Option<i32>,
    pub smtp_reason: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub fallback_status: Option<String>,
    pub fallback_at: Option<DateTime<Utc>>,
    pub verify_status: String,
    pub verify_reason: String,
    pub verified_mx: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl VerificationResult {
    pub fn status(&self) -> Option<VerifyStatus> {
        VerifyStatus::parse(&self.verify_status)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = verification_results)]
pub struct NewVerificationResult {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email_id: Uuid,
    pub mx_host: Option<String>,
    pub smtp_code: Option<i32>,
    pub smtp_reason: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub fallback_status: Option<String>,
    pub fallback_at: Option<DateTime<Utc>>,
    pub verify_status: String,
    pub verify_reason: String,
    pub verified_mx: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_category_from_code() {
        assert_eq!(SmtpCategory::from_code(Some(250)), SmtpCategory::Accept);
        // Only the 2xx class counts as accept; 200 is in-class even though
        // RCPT replies are normally 250/251.
        assert_eq!(SmtpCategory::from_code(Some(200)), SmtpCategory::Accept);
        assert_eq!(SmtpCategory::from_code(Some(550)), SmtpCategory::HardFail);
        assert_eq!(SmtpCategory::from_code(Some(451)), SmtpCategory::TempFail);
        assert_eq!(SmtpCategory::from_code(Some(354)), SmtpCategory::Unknown);
        assert_eq!(SmtpCategory::from_code(None), SmtpCategory::Unknown);
    }

    #[test]
    fn test_verify_status_round_trip() {
        for s in [
            VerifyStatus::Valid,
            VerifyStatus::RiskyCatchAll,
            VerifyStatus::Invalid,
            VerifyStatus::UnknownTimeout,
        ] {
            assert_eq!(VerifyStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_conclusive() {
        assert!(VerifyStatus::Valid.is_conclusive());
        assert!(VerifyStatus::Invalid.is_conclusive());
        assert!(VerifyStatus::RiskyCatchAll.is_conclusive());
        assert!(!VerifyStatus::UnknownTimeout.is_conclusive());
    }
}
