// Run lifecycle models: a run is one user-requested batch of domains
// moving through the pipeline stages.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::runs;

// =============================================================================
// STATUS / MODE ENUMS
// =============================================================================

/// Run lifecycle status. Terminal states are irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    Autodiscovery,
    Generate,
    Verify,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Full
    }
}

impl RunMode {
    pub fn runs_autodiscovery(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::Autodiscovery)
    }

    pub fn runs_generate(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::Generate)
    }

    pub fn runs_verify(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::Verify)
    }
}

// =============================================================================
// OPTIONS / PROGRESS
// =============================================================================

/// Recognized run options. Unknown keys in the stored JSON are ignored on
/// deserialization; serialization always writes the full set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub skip_crawl: bool,
    #[serde(default)]
    pub skip_verify: bool,
    #[serde(default = "default_true")]
    pub ai_enabled: bool,
    #[serde(default)]
    pub force_discovery: bool,
    #[serde(default = "default_company_limit")]
    pub company_limit: i32,
}

fn default_true() -> bool {
    true
}

fn default_company_limit() -> i32 {
    1_000
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Full,
            skip_crawl: false,
            skip_verify: false,
            ai_enabled: true,
            force_discovery: false,
            company_limit: default_company_limit(),
        }
    }
}

/// Counter bag aggregated from the dedicated integer columns on `runs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunProgress {
    pub domains_total: i32,
    pub domains_completed: i32,
    pub domains_failed: i32,
    pub emails_found: i32,
    pub emails_verified: i32,
    pub valid_count: i32,
    pub risky_count: i32,
    pub invalid_count: i32,
    pub unknown_count: i32,
}

// =============================================================================
// DATABASE MODELS
// =============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Run {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub domains: Vec<String>,
    pub options: serde_json::Value,
    pub error: Option<String>,
    pub domains_total: i32,
    pub domains_completed: i32,
    pub domains_failed: i32,
    pub emails_found: i32,
    pub emails_verified: i32,
    pub valid_count: i32,
    pub risky_count: i32,
    pub invalid_count: i32,
    pub unknown_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn status(&self) -> Option<RunStatus> {
        RunStatus::parse(&self.status)
    }

    /// Typed view over the stored options JSON. Unrecognized or corrupt
    /// option blobs fall back to defaults rather than failing the run.
    pub fn options(&self) -> RunOptions {
        serde_json::from_value(self.options.clone()).unwrap_or_default()
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress {
            domains_total: self.domains_total,
            domains_completed: self.domains_completed,
            domains_failed: self.domains_failed,
            emails_found: self.emails_found,
            emails_verified: self.emails_verified,
            valid_count: self.valid_count,
            risky_count: self.risky_count,
            invalid_count: self.invalid_count,
            unknown_count: self.unknown_count,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = runs)]
pub struct NewRun {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub domains: Vec<String>,
    pub options: serde_json::Value,
    pub domains_total: i32,
    pub created_at: DateTime<Utc>,
}

impl NewRun {
    pub fn new(tenant_id: Uuid, domains: Vec<String>, options: &RunOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            status: RunStatus::Queued.as_str().to_string(),
            domains_total: domains.len() as i32,
            domains,
            options: serde_json::to_value(options).unwrap_or_else(|_| serde_json::json!({})),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RunStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_mode_matrix() {
        assert!(RunMode::Full.runs_autodiscovery());
        assert!(RunMode::Full.runs_generate());
        assert!(RunMode::Full.runs_verify());

        assert!(RunMode::Autodiscovery.runs_autodiscovery());
        assert!(!RunMode::Autodiscovery.runs_generate());
        assert!(!RunMode::Autodiscovery.runs_verify());

        assert!(!RunMode::Generate.runs_autodiscovery());
        assert!(RunMode::Generate.runs_generate());
        assert!(!RunMode::Generate.runs_verify());

        assert!(!RunMode::Verify.runs_autodiscovery());
        assert!(!RunMode::Verify.runs_generate());
        assert!(RunMode::Verify.runs_verify());
    }

    #[test]
    fn test_options_defaults_on_unknown_json() {
        let opts: RunOptions = serde_json::from_value(serde_json::json!({
            "mode": "verify",
            "unrecognized": 1
        }))
        .unwrap();
        assert_eq!(opts.mode, RunMode::Verify);
        assert!(opts.ai_enabled);
        assert_eq!(opts.company_limit, 1_000);
    }
}
