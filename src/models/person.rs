// Person and email models.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{emails, people};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = people)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Person {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub company_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: String,
    pub title: Option<String>,
    pub title_norm: Option<String>,
    pub role_family: Option<String>,
    pub seniority: Option<String>,
    pub source_url: Option<String>,
    pub icp_score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Email row. Unique per `(tenant_id, lower(email))`; `person_id` is a weak
/// reference — the email survives person deletion with `person_id` nulled.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable, Identifiable, Serialize)]
#[diesel(table_name = emails)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Email {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub company_id: Uuid,
    pub person_id: Option<Uuid>,
    pub email: String,
    pub is_published: bool,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Email {
    /// Domain part of the address. Empty for malformed rows.
    pub fn domain(&self) -> &str {
        self.email
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or("")
    }
}

