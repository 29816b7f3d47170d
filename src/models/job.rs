// Queue job records and the typed stage payloads.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::jobs;

/// Queue names used by the pipeline stages.
pub const QUEUE_CRAWL: &str = "crawl";
pub const QUEUE_GENERATE: &str = "generate";
pub const QUEUE_VERIFY: &str = "verify";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ready,
    InFlight,
    Done,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::InFlight => "in_flight",
            JobStatus::Done => "done",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(JobStatus::Ready),
            "in_flight" => Some(JobStatus::InFlight),
            "done" => Some(JobStatus::Done),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable, Identifiable, Serialize)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct JobRecord {
    pub id: Uuid,
    pub queue: String,
    pub tenant_id: Uuid,
    pub run_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub depends_on: Vec<Uuid>,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// Typed view of the payload. Corrupt payloads surface as a validation
    /// error at the handler, not a panic.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub queue: String,
    pub tenant_id: Uuid,
    pub run_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub depends_on: Vec<Uuid>,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub enqueued_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
}

// =============================================================================
// STAGE PAYLOADS
// =============================================================================

/// Payload discriminator: each queue carries exactly one payload shape,
/// tagged so a mis-routed job fails validation instead of mis-executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum StagePayload {
    Autodiscovery(DomainStagePayload),
    GenerateEmails(DomainStagePayload),
    VerifyDomain(DomainStagePayload),
    ProbeEmail(ProbeEmailPayload),
}

/// Per-domain stage job (crawl / generate / verify fan-out).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainStagePayload {
    pub run_id: Uuid,
    pub tenant_id: Uuid,
    pub company_id: Uuid,
    pub domain: String,
}

/// Per-email probe job on the verify queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeEmailPayload {
    pub run_id: Uuid,
    pub tenant_id: Uuid,
    pub company_id: Uuid,
    pub email_id: Uuid,
    pub email: String,
    pub domain: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tag_round_trip() {
        let payload = StagePayload::ProbeEmail(ProbeEmailPayload {
            run_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            email_id: Uuid::new_v4(),
            email: "jane.doe@example.com".into(),
            domain: "example.com".into(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["task"], "probe_email");
        let back: StagePayload = serde_json::from_value(json).unwrap();
        match back {
            StagePayload::ProbeEmail(p) => assert_eq!(p.email, "jane.doe@example.com"),
            _ => panic!("wrong payload variant"),
        }
    }
}
