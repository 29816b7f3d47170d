// Suppression list rows. At least one of email/domain is set.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::suppressions;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = suppressions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Suppression {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub domain: Option<String>,
    pub reason: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = suppressions)]
pub struct NewSuppression {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub domain: Option<String>,
    pub reason: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}
