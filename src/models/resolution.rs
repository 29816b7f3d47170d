// Domain resolution audit rows and the per-MX behavior cache.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{domain_resolutions, mx_behavior};

/// Domain-level catch-all verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchAllStatus {
    CatchAll,
    NotCatchAll,
    Tempfail,
    NoMx,
    Error,
}

impl CatchAllStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatchAllStatus::CatchAll => "catch_all",
            CatchAllStatus::NotCatchAll => "not_catch_all",
            CatchAllStatus::Tempfail => "tempfail",
            CatchAllStatus::NoMx => "no_mx",
            CatchAllStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "catch_all" => Some(CatchAllStatus::CatchAll),
            "not_catch_all" => Some(CatchAllStatus::NotCatchAll),
            "tempfail" => Some(CatchAllStatus::Tempfail),
            "no_mx" => Some(CatchAllStatus::NoMx),
            "error" => Some(CatchAllStatus::Error),
            _ => None,
        }
    }
}

/// Append-only resolution audit; the most recent row per company/domain is
/// authoritative and carries the cached catch-all verdict.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = domain_resolutions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DomainResolution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub company_id: Uuid,
    pub chosen_domain: String,
    pub method: String,
    pub confidence: i32,
    pub mx_hosts: Vec<String>,
    pub lowest_mx: Option<String>,
    pub mx_behavior: Option<serde_json::Value>,
    pub catch_all_status: Option<String>,
    pub catch_all_checked_at: Option<DateTime<Utc>>,
    pub catch_all_localpart: Option<String>,
    pub catch_all_smtp_code: Option<i32>,
    pub resolved_at: DateTime<Utc>,
}

impl DomainResolution {
    pub fn catch_all(&self) -> Option<CatchAllStatus> {
        self.catch_all_status
            .as_deref()
            .and_then(CatchAllStatus::parse)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = domain_resolutions)]
pub struct NewDomainResolution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub company_id: Uuid,
    pub chosen_domain: String,
    pub method: String,
    pub confidence: i32,
    pub mx_hosts: Vec<String>,
    pub lowest_mx: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Recent behavior summary for one MX host, used to adapt prober timeouts.
/// Updated last-writer-wins; small drift between workers is acceptable.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = mx_behavior)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MxBehavior {
    pub mx_host: String,
    pub avg_latency_ms: i32,
    pub last_code: Option<i32>,
    pub last_category: Option<String>,
    pub last_error: Option<String>,
    pub probe_count: i32,
    pub updated_at: DateTime<Utc>,
}
