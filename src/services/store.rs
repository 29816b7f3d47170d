// Idempotent, tenant-scoped persistence. Every upsert rides a unique
// constraint with ON CONFLICT so concurrent writers on the same key observe
// one row and one id; transactions stay short (one upsert or one append).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Bool, Integer, Jsonb, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use diesel_async::RunQueryDsl;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::db::DieselPool;
use crate::models::{
    CatchAllStatus, Company, DomainResolution, Email, NewDomainResolution, NewRun, NewSource,
    NewSuppression, NewVerificationResult, Person, Run, RunStatus, VerificationResult,
};
use crate::services::mx::{BehaviorHint, BehaviorSink, ProbeObservation};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Diesel(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl<E: std::error::Error + 'static> From<bb8::RunError<E>> for StoreError {
    fn from(error: bb8::RunError<E>) -> Self {
        StoreError::Pool(error.to_string())
    }
}

#[derive(QueryableByName)]
struct IdRow {
    #[diesel(sql_type = SqlUuid)]
    id: Uuid,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}

/// Fields merged into a person upsert.
#[derive(Debug, Clone, Default)]
pub struct PersonUpsert {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: String,
    pub title: Option<String>,
    pub title_norm: Option<String>,
    pub role_family: Option<String>,
    pub seniority: Option<String>,
    pub source_url: Option<String>,
    pub icp_score: Option<i32>,
}

/// Fields attached to an email upsert.
#[derive(Debug, Clone, Default)]
pub struct EmailUpsert {
    pub company_id: Uuid,
    pub person_id: Option<Uuid>,
    pub is_published: bool,
    pub source_url: Option<String>,
}

#[derive(Clone)]
pub struct IdempotentStore {
    pool: DieselPool,
}

impl IdempotentStore {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // RUNS
    // =========================================================================

    pub async fn create_run(&self, new_run: NewRun) -> Result<Uuid, StoreError> {
        use crate::schema::runs::dsl::*;
        let mut conn = self.pool.get().await?;
        let run_id = new_run.id;
        diesel::insert_into(runs)
            .values(&new_run)
            .on_conflict(id)
            .do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(run_id)
    }

    pub async fn get_run(&self, tenant: Uuid, run_id: Uuid) -> Result<Run, StoreError> {
        use crate::schema::runs::dsl::*;
        let mut conn = self.pool.get().await?;
        runs.filter(id.eq(run_id))
            .filter(tenant_id.eq(tenant))
            .first::<Run>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)))
    }

    /// Atomically move a queued run to running. Returns false when the run
    /// was already picked up or is terminal — callers treat that as a no-op,
    /// which is what makes `start_run` idempotent.
    pub async fn claim_run(&self, tenant: Uuid, run_id: Uuid) -> Result<bool, StoreError> {
        use crate::schema::runs::dsl::*;
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            runs.filter(id.eq(run_id))
                .filter(tenant_id.eq(tenant))
                .filter(status.eq(RunStatus::Queued.as_str())),
        )
        .set((
            status.eq(RunStatus::Running.as_str()),
            started_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    /// Transition a run to a terminal status. Terminal states never move
    /// again; a second writer loses the race and that is fine.
    pub async fn finish_run(
        &self,
        tenant: Uuid,
        run_id: Uuid,
        final_status: RunStatus,
        error_msg: Option<&str>,
    ) -> Result<(), StoreError> {
        use crate::schema::runs::dsl::*;
        let mut conn = self.pool.get().await?;
        diesel::update(
            runs.filter(id.eq(run_id))
                .filter(tenant_id.eq(tenant))
                .filter(status.ne_all(vec![
                    RunStatus::Succeeded.as_str(),
                    RunStatus::Failed.as_str(),
                    RunStatus::Cancelled.as_str(),
                ])),
        )
        .set((
            status.eq(final_status.as_str()),
            error.eq(error_msg),
            finished_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    pub async fn set_domains_total(
        &self,
        tenant: Uuid,
        run_id: Uuid,
        total: i32,
    ) -> Result<(), StoreError> {
        use crate::schema::runs::dsl::*;
        let mut conn = self.pool.get().await?;
        diesel::update(runs.filter(id.eq(run_id)).filter(tenant_id.eq(tenant)))
            .set(domains_total.eq(total))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Atomic counter bump for per-email verification outcomes.
    #[instrument(skip(self))]
    pub async fn bump_verify_counters(
        &self,
        run_id: Uuid,
        status_counted: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let column = match status_counted {
            "valid" => "valid_count",
            "risky_catch_all" => "risky_count",
            "invalid" => "invalid_count",
            _ => "unknown_count",
        };
        diesel::sql_query(format!(
            "UPDATE runs SET emails_verified = emails_verified + 1, {} = {} + 1 WHERE id = $1",
            column, column
        ))
        .bind::<SqlUuid, _>(run_id)
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    pub async fn bump_emails_found(&self, run_id: Uuid, n: i32) -> Result<(), StoreError> {
        use crate::schema::runs::dsl::*;
        let mut conn = self.pool.get().await?;
        diesel::update(runs.filter(id.eq(run_id)))
            .set(emails_found.eq(emails_found + n))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Count a company's domain as completed (optionally failed), returning
    /// `(completed, total)` after the transition. The increment rides an
    /// atomic marker on the company row, so redelivered completion events
    /// under at-least-once execution count each domain exactly once.
    pub async fn complete_domain(
        &self,
        run_id: Uuid,
        company: Uuid,
        domain_failed: bool,
    ) -> Result<(i32, i32), StoreError> {
        use crate::schema::runs::dsl::*;
        let mut conn = self.pool.get().await?;

        let marked: Option<IdRow> = diesel::sql_query(
            "UPDATE companies \
             SET attrs = attrs || jsonb_build_object('pipeline_completed_run', $2::text), \
                 updated_at = now() \
             WHERE id = $1 \
               AND (attrs->>'pipeline_completed_run') IS DISTINCT FROM $2::text \
             RETURNING id",
        )
        .bind::<SqlUuid, _>(company)
        .bind::<Text, _>(run_id.to_string())
        .get_result(&mut conn)
        .await
        .optional()?;

        if marked.is_some() {
            let fail_bump = if domain_failed { 1 } else { 0 };
            let row: Option<(i32, i32)> = diesel::update(
                runs.filter(id.eq(run_id))
                    .filter(domains_completed.lt(domains_total)),
            )
            .set((
                domains_completed.eq(domains_completed + 1),
                domains_failed.eq(domains_failed + fail_bump),
            ))
            .returning((domains_completed, domains_total))
            .get_result(&mut conn)
            .await
            .optional()?;
            if let Some(counters) = row {
                return Ok(counters);
            }
        }

        // Already counted (or the run hit its total); report current state
        // so the caller can still run the idempotent finalize check.
        let counters: (i32, i32) = runs
            .filter(id.eq(run_id))
            .select((domains_completed, domains_total))
            .first(&mut conn)
            .await?;
        Ok(counters)
    }

    /// Recompute the run's email/verification counters from the database at
    /// finalize time. Incremental bumps during the run are approximate under
    /// retry; this pass makes the terminal numbers exact.
    #[instrument(skip(self))]
    pub async fn finalize_aggregates(&self, tenant: Uuid, run_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::sql_query(
            "WITH run_emails AS ( \
                 SELECT e.id FROM emails e \
                 JOIN companies c ON c.id = e.company_id \
                 WHERE c.run_id = $1 AND e.tenant_id = $2 \
             ), latest AS ( \
                 SELECT DISTINCT ON (vr.email_id) vr.email_id, vr.verify_status \
                 FROM verification_results vr \
                 JOIN run_emails re ON re.id = vr.email_id \
                 ORDER BY vr.email_id, COALESCE(vr.verified_at, vr.checked_at) DESC, vr.id DESC \
             ) \
             UPDATE runs SET \
                 emails_found = (SELECT COUNT(*) FROM run_emails), \
                 emails_verified = (SELECT COUNT(*) FROM latest), \
                 valid_count = (SELECT COUNT(*) FROM latest WHERE verify_status = 'valid'), \
                 risky_count = (SELECT COUNT(*) FROM latest WHERE verify_status = 'risky_catch_all'), \
                 invalid_count = (SELECT COUNT(*) FROM latest WHERE verify_status = 'invalid'), \
                 unknown_count = (SELECT COUNT(*) FROM latest WHERE verify_status = 'unknown_timeout') \
             WHERE id = $1",
        )
        .bind::<SqlUuid, _>(run_id)
        .bind::<SqlUuid, _>(tenant)
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    // =========================================================================
    // COMPANIES
    // =========================================================================

    /// Upsert keyed by `(tenant, supplied_domain)` when a domain is given,
    /// else `(tenant, name)`. Concurrent writers converge on one id.
    #[instrument(skip(self))]
    pub async fn upsert_company(
        &self,
        tenant: Uuid,
        run_id: Option<Uuid>,
        name: &str,
        supplied_domain: Option<&str>,
    ) -> Result<Uuid, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: IdRow = match supplied_domain {
            Some(domain) => {
                diesel::sql_query(
                    "INSERT INTO companies (id, tenant_id, run_id, name, supplied_domain, attrs, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, '{}'::jsonb, now(), now()) \
                     ON CONFLICT (tenant_id, supplied_domain) WHERE supplied_domain IS NOT NULL \
                     DO UPDATE SET run_id = COALESCE(EXCLUDED.run_id, companies.run_id), \
                                   updated_at = now() \
                     RETURNING id",
                )
                .bind::<SqlUuid, _>(Uuid::new_v4())
                .bind::<SqlUuid, _>(tenant)
                .bind::<Nullable<SqlUuid>, _>(run_id)
                .bind::<Text, _>(name)
                .bind::<Text, _>(domain)
                .get_result(&mut conn)
                .await?
            }
            None => {
                diesel::sql_query(
                    "INSERT INTO companies (id, tenant_id, run_id, name, attrs, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, '{}'::jsonb, now(), now()) \
                     ON CONFLICT (tenant_id, name) WHERE supplied_domain IS NULL \
                     DO UPDATE SET run_id = COALESCE(EXCLUDED.run_id, companies.run_id), \
                                   updated_at = now() \
                     RETURNING id",
                )
                .bind::<SqlUuid, _>(Uuid::new_v4())
                .bind::<SqlUuid, _>(tenant)
                .bind::<Nullable<SqlUuid>, _>(run_id)
                .bind::<Text, _>(name)
                .get_result(&mut conn)
                .await?
            }
        };
        Ok(row.id)
    }

    pub async fn get_company(&self, tenant: Uuid, company_id: Uuid) -> Result<Company, StoreError> {
        use crate::schema::companies::dsl::*;
        let mut conn = self.pool.get().await?;
        companies
            .filter(id.eq(company_id))
            .filter(tenant_id.eq(tenant))
            .first::<Company>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("company {}", company_id)))
    }

    /// Set the resolved official domain exactly once; later confident
    /// resolutions do not overwrite an earlier one.
    pub async fn set_official_domain(
        &self,
        tenant: Uuid,
        company_id: Uuid,
        domain: &str,
        confidence: i32,
        source: &str,
    ) -> Result<bool, StoreError> {
        use crate::schema::companies::dsl::*;
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            companies
                .filter(id.eq(company_id))
                .filter(tenant_id.eq(tenant))
                .filter(official_domain.is_null()),
        )
        .set((
            official_domain.eq(domain),
            official_confidence.eq(confidence),
            official_source.eq(source),
            updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    /// Merge a key into the company attrs bag.
    pub async fn merge_company_attr(
        &self,
        company_id: Uuid,
        attrs_patch: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::sql_query(
            "UPDATE companies SET attrs = attrs || $2, updated_at = now() WHERE id = $1",
        )
        .bind::<SqlUuid, _>(company_id)
        .bind::<Jsonb, _>(attrs_patch)
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    /// Distinct companies created in the trailing 24 hours, for the tenant
    /// budget check at run start.
    pub async fn companies_created_last_24h(&self, tenant: Uuid) -> Result<i64, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: CountRow = diesel::sql_query(
            "SELECT COUNT(*) AS count FROM companies WHERE tenant_id = $1 AND created_at >= $2",
        )
        .bind::<SqlUuid, _>(tenant)
        .bind::<Timestamptz, _>(Utc::now() - Duration::hours(24))
        .get_result(&mut conn)
        .await?;
        Ok(row.count)
    }

    // =========================================================================
    // SOURCES / PEOPLE
    // =========================================================================

    pub async fn insert_source(&self, source: NewSource) -> Result<Uuid, StoreError> {
        use crate::schema::sources::dsl::*;
        let mut conn = self.pool.get().await?;
        let source_id = source.id;
        diesel::insert_into(sources)
            .values(&source)
            .execute(&mut conn)
            .await?;
        Ok(source_id)
    }

    /// Upsert keyed by `(tenant, company, lower(full_name))`; title and
    /// source fields merge (existing values win, blanks fill in).
    #[instrument(skip(self, person))]
    pub async fn upsert_person(
        &self,
        tenant: Uuid,
        company_id: Uuid,
        person: &PersonUpsert,
    ) -> Result<Uuid, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: IdRow = diesel::sql_query(
            "INSERT INTO people (id, tenant_id, company_id, first_name, last_name, full_name, \
                                 title, title_norm, role_family, seniority, source_url, icp_score, \
                                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now(), now()) \
             ON CONFLICT (tenant_id, company_id, lower(full_name)) \
             DO UPDATE SET \
                 title = COALESCE(people.title, EXCLUDED.title), \
                 title_norm = COALESCE(people.title_norm, EXCLUDED.title_norm), \
                 role_family = COALESCE(people.role_family, EXCLUDED.role_family), \
                 seniority = COALESCE(people.seniority, EXCLUDED.seniority), \
                 source_url = COALESCE(people.source_url, EXCLUDED.source_url), \
                 icp_score = COALESCE(EXCLUDED.icp_score, people.icp_score), \
                 updated_at = now() \
             RETURNING id",
        )
        .bind::<SqlUuid, _>(Uuid::new_v4())
        .bind::<SqlUuid, _>(tenant)
        .bind::<SqlUuid, _>(company_id)
        .bind::<Nullable<Text>, _>(person.first_name.as_deref())
        .bind::<Nullable<Text>, _>(person.last_name.as_deref())
        .bind::<Text, _>(&person.full_name)
        .bind::<Nullable<Text>, _>(person.title.as_deref())
        .bind::<Nullable<Text>, _>(person.title_norm.as_deref())
        .bind::<Nullable<Text>, _>(person.role_family.as_deref())
        .bind::<Nullable<Text>, _>(person.seniority.as_deref())
        .bind::<Nullable<Text>, _>(person.source_url.as_deref())
        .bind::<Nullable<Integer>, _>(person.icp_score)
        .get_result(&mut conn)
        .await?;
        Ok(row.id)
    }

    pub async fn people_for_company(
        &self,
        tenant: Uuid,
        company: Uuid,
    ) -> Result<Vec<Person>, StoreError> {
        use crate::schema::people::dsl::*;
        let mut conn = self.pool.get().await?;
        Ok(people
            .filter(tenant_id.eq(tenant))
            .filter(company_id.eq(company))
            .order(created_at.asc())
            .load::<Person>(&mut conn)
            .await?)
    }

    // =========================================================================
    // EMAILS
    // =========================================================================

    /// Upsert keyed by `(tenant, lower(email))`. A second writer never
    /// downgrades `is_published=true` to false; person/source fill in when
    /// previously null.
    #[instrument(skip(self, fields))]
    pub async fn upsert_email(
        &self,
        tenant: Uuid,
        email_addr: &str,
        fields: &EmailUpsert,
    ) -> Result<Uuid, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: IdRow = diesel::sql_query(
            "INSERT INTO emails (id, tenant_id, company_id, person_id, email, is_published, source_url, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now()) \
             ON CONFLICT (tenant_id, lower(email)) \
             DO UPDATE SET \
                 is_published = emails.is_published OR EXCLUDED.is_published, \
                 person_id = COALESCE(emails.person_id, EXCLUDED.person_id), \
                 source_url = COALESCE(emails.source_url, EXCLUDED.source_url) \
             RETURNING id",
        )
        .bind::<SqlUuid, _>(Uuid::new_v4())
        .bind::<SqlUuid, _>(tenant)
        .bind::<SqlUuid, _>(fields.company_id)
        .bind::<Nullable<SqlUuid>, _>(fields.person_id)
        .bind::<Text, _>(email_addr.trim())
        .bind::<Bool, _>(fields.is_published)
        .bind::<Nullable<Text>, _>(fields.source_url.as_deref())
        .get_result(&mut conn)
        .await?;
        Ok(row.id)
    }

    pub async fn get_email(&self, tenant: Uuid, email_id: Uuid) -> Result<Email, StoreError> {
        use crate::schema::emails::dsl::*;
        let mut conn = self.pool.get().await?;
        emails
            .filter(id.eq(email_id))
            .filter(tenant_id.eq(tenant))
            .first::<Email>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("email {}", email_id)))
    }

    /// Published `(first, last, local_part)` examples for pattern inference.
    pub async fn published_examples(
        &self,
        tenant: Uuid,
        company: Uuid,
    ) -> Result<Vec<(String, String, String)>, StoreError> {
        use crate::schema::{emails, people};
        let mut conn = self.pool.get().await?;
        let rows: Vec<(Option<String>, Option<String>, String)> = emails::table
            .inner_join(people::table.on(people::id.nullable().eq(emails::person_id)))
            .filter(emails::tenant_id.eq(tenant))
            .filter(emails::company_id.eq(company))
            .filter(emails::is_published.eq(true))
            .select((people::first_name, people::last_name, emails::email))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(first, last, addr)| {
                let local = addr.split('@').next()?.to_lowercase();
                Some((first.unwrap_or_default(), last.unwrap_or_default(), local))
            })
            .collect())
    }

    /// People who already have a published email; generation skips them.
    pub async fn person_ids_with_published_email(
        &self,
        tenant: Uuid,
        company: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        use crate::schema::emails::dsl::*;
        let mut conn = self.pool.get().await?;
        let ids: Vec<Option<Uuid>> = emails
            .filter(tenant_id.eq(tenant))
            .filter(company_id.eq(company))
            .filter(is_published.eq(true))
            .filter(person_id.is_not_null())
            .select(person_id)
            .load(&mut conn)
            .await?;
        Ok(ids.into_iter().flatten().collect())
    }

    /// Emails for a domain lacking a conclusive latest verification.
    pub async fn emails_needing_verification(
        &self,
        tenant: Uuid,
        company: Uuid,
    ) -> Result<Vec<Email>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(diesel::sql_query(
            "SELECT e.* FROM emails e \
             LEFT JOIN LATERAL ( \
                 SELECT vr.verify_status FROM verification_results vr \
                 WHERE vr.email_id = e.id \
                 ORDER BY COALESCE(vr.verified_at, vr.checked_at) DESC, vr.id DESC \
                 LIMIT 1 \
             ) latest ON true \
             WHERE e.tenant_id = $1 AND e.company_id = $2 \
               AND (latest.verify_status IS NULL OR latest.verify_status = 'unknown_timeout') \
             ORDER BY e.created_at ASC",
        )
        .bind::<SqlUuid, _>(tenant)
        .bind::<SqlUuid, _>(company)
        .load::<Email>(&mut conn)
        .await?)
    }

    // =========================================================================
    // VERIFICATION RESULTS
    // =========================================================================

    /// Unconditional append; the audit trail keeps every probe outcome.
    pub async fn append_verification(
        &self,
        result: NewVerificationResult,
    ) -> Result<Uuid, StoreError> {
        use crate::schema::verification_results::dsl::*;
        let mut conn = self.pool.get().await?;
        let result_id = result.id;
        diesel::insert_into(verification_results)
            .values(&result)
            .execute(&mut conn)
            .await?;
        Ok(result_id)
    }

    /// The one authoritative row per email: newest by
    /// `COALESCE(verified_at, checked_at)`, ties broken by id.
    pub async fn latest_verification(
        &self,
        tenant: Uuid,
        email: Uuid,
    ) -> Result<Option<VerificationResult>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(diesel::sql_query(
            "SELECT * FROM verification_results \
             WHERE tenant_id = $1 AND email_id = $2 \
             ORDER BY COALESCE(verified_at, checked_at) DESC, id DESC \
             LIMIT 1",
        )
        .bind::<SqlUuid, _>(tenant)
        .bind::<SqlUuid, _>(email)
        .get_result::<VerificationResult>(&mut conn)
        .await
        .optional()?)
    }

    /// A prior confirmed delivery for this exact address upgrades a
    /// catch-all verdict (delivery-based confirmation path).
    pub async fn has_confirmed_delivery(
        &self,
        tenant: Uuid,
        email: Uuid,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: CountRow = diesel::sql_query(
            "SELECT COUNT(*) AS count FROM verification_results \
             WHERE tenant_id = $1 AND email_id = $2 AND verify_reason = 'delivered_on_catchall'",
        )
        .bind::<SqlUuid, _>(tenant)
        .bind::<SqlUuid, _>(email)
        .get_result(&mut conn)
        .await?;
        Ok(row.count > 0)
    }

    // =========================================================================
    // DOMAIN RESOLUTIONS / CATCH-ALL CACHE
    // =========================================================================

    pub async fn record_resolution(
        &self,
        resolution: NewDomainResolution,
    ) -> Result<Uuid, StoreError> {
        use crate::schema::domain_resolutions::dsl::*;
        let mut conn = self.pool.get().await?;
        let res_id = resolution.id;
        diesel::insert_into(domain_resolutions)
            .values(&resolution)
            .execute(&mut conn)
            .await?;
        Ok(res_id)
    }

    /// Most recent resolution row for a domain; append-only audit means the
    /// newest row is authoritative.
    pub async fn latest_resolution(
        &self,
        tenant: Uuid,
        domain: &str,
    ) -> Result<Option<DomainResolution>, StoreError> {
        use crate::schema::domain_resolutions::dsl::*;
        let mut conn = self.pool.get().await?;
        Ok(domain_resolutions
            .filter(tenant_id.eq(tenant))
            .filter(chosen_domain.eq(domain))
            .order(resolved_at.desc())
            .first::<DomainResolution>(&mut conn)
            .await
            .optional()?)
    }

    /// Cache a catch-all verdict on the latest resolution row.
    pub async fn update_catchall_verdict(
        &self,
        resolution_id: Uuid,
        verdict: CatchAllStatus,
        localpart: Option<&str>,
        smtp_code: Option<i32>,
    ) -> Result<(), StoreError> {
        use crate::schema::domain_resolutions::dsl::*;
        let mut conn = self.pool.get().await?;
        diesel::update(domain_resolutions.filter(id.eq(resolution_id)))
            .set((
                catch_all_status.eq(verdict.as_str()),
                catch_all_checked_at.eq(Utc::now()),
                catch_all_localpart.eq(localpart),
                catch_all_smtp_code.eq(smtp_code),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    // =========================================================================
    // SUPPRESSIONS
    // =========================================================================

    pub async fn add_suppression(&self, suppression: NewSuppression) -> Result<(), StoreError> {
        use crate::schema::suppressions::dsl::*;
        let mut conn = self.pool.get().await?;
        diesel::insert_into(suppressions)
            .values(&suppression)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn is_suppressed(
        &self,
        tenant: Uuid,
        email_addr: &str,
        domain_name: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: CountRow = diesel::sql_query(
            "SELECT COUNT(*) AS count FROM suppressions \
             WHERE tenant_id = $1 AND (lower(email) = lower($2) OR lower(domain) = lower($3))",
        )
        .bind::<SqlUuid, _>(tenant)
        .bind::<Text, _>(email_addr)
        .bind::<Text, _>(domain_name)
        .get_result(&mut conn)
        .await?;
        Ok(row.count > 0)
    }
}

// =============================================================================
// BEHAVIOR SINK (per-MX probe statistics)
// =============================================================================

#[derive(QueryableByName)]
struct BehaviorRow {
    #[diesel(sql_type = Integer)]
    avg_latency_ms: i32,
    #[diesel(sql_type = Integer)]
    probe_count: i32,
    #[diesel(sql_type = Nullable<Text>)]
    last_category: Option<String>,
}

#[async_trait]
impl BehaviorSink for IdempotentStore {
    /// Fold one observation into the per-MX rolling average. Last-writer-wins
    /// drift between workers is acceptable for a hint.
    async fn record_probe(&self, observation: ProbeObservation) {
        let result = async {
            let mut conn = self.pool.get().await?;
            diesel::sql_query(
                "INSERT INTO mx_behavior (mx_host, avg_latency_ms, last_code, last_category, last_error, probe_count, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, 1, now()) \
                 ON CONFLICT (mx_host) DO UPDATE SET \
                     avg_latency_ms = (mx_behavior.avg_latency_ms * mx_behavior.probe_count + EXCLUDED.avg_latency_ms) \
                                      / (mx_behavior.probe_count + 1), \
                     last_code = EXCLUDED.last_code, \
                     last_category = EXCLUDED.last_category, \
                     last_error = EXCLUDED.last_error, \
                     probe_count = mx_behavior.probe_count + 1, \
                     updated_at = now()",
            )
            .bind::<Text, _>(&observation.mx_host)
            .bind::<Integer, _>(observation.elapsed_ms)
            .bind::<Nullable<Integer>, _>(observation.code)
            .bind::<Nullable<Text>, _>(Some(observation.category.as_str()))
            .bind::<Nullable<Text>, _>(observation.error_kind.as_deref())
            .execute(&mut conn)
            .await?;
            Ok::<(), StoreError>(())
        }
        .await;

        if let Err(e) = result {
            // Behavior stats are advisory; never fail a probe over them
            warn!("behavior record failed for {}: {}", observation.mx_host, e);
        }
    }

    async fn behavior_hint(&self, mx_host: &str) -> Option<BehaviorHint> {
        let result = async {
            let mut conn = self.pool.get().await?;
            let row: Option<BehaviorRow> = diesel::sql_query(
                "SELECT avg_latency_ms, probe_count, last_category \
                 FROM mx_behavior WHERE mx_host = $1",
            )
            .bind::<Text, _>(mx_host)
            .get_result(&mut conn)
            .await
            .optional()?;
            Ok::<Option<BehaviorRow>, StoreError>(row)
        }
        .await;

        match result {
            Ok(Some(row)) => Some(BehaviorHint {
                avg_latency_ms: row.avg_latency_ms,
                probe_count: row.probe_count,
                last_category: row.last_category,
            }),
            Ok(None) => None,
            Err(e) => {
                debug!("behavior hint lookup failed for {}: {}", mx_host, e);
                None
            }
        }
    }
}
