// Company and crawled-source models.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{companies, sources};

/// Company record. `official_domain` is set at most once per confident
/// resolution and is always stored in ASCII punycode form.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = companies)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Company {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub run_id: Option<Uuid>,
    pub name: String,
    pub supplied_domain: Option<String>,
    pub official_domain: Option<String>,
    pub official_confidence: Option<i32>,
    pub official_source: Option<String>,
    pub attrs: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    /// Typed view over the attrs bag; unknown keys are ignored.
    pub fn attrs(&self) -> CompanyAttrs {
        serde_json::from_value(self.attrs.clone()).unwrap_or_default()
    }
}

/// Opaque attribute bag accumulated on a company (industry, size bucket,
/// tech keywords, whether the AI extraction path ran).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyAttrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tech_keywords: Vec<String>,
    #[serde(default)]
    pub ai_people_extracted: bool,
}

/// One successfully fetched page.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = sources)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Source {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub company_id: Uuid,
    pub url: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sources)]
pub struct NewSource {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub company_id: Uuid,
    pub url: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

impl NewSource {
    pub fn new(tenant_id: Uuid, company_id: Uuid, url: &str, html: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            company_id,
            url: url.to_string(),
            html: html.to_string(),
            fetched_at: Utc::now(),
        }
    }
}
