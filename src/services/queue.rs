// Durable named job queues in the relational store: delayed re-enqueue,
// depends-on ordering, dead-letter, and crash-safe worker leases. Every
// transition is one atomic UPDATE; reservation uses SKIP LOCKED so
// concurrent workers never double-claim.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Array, BigInt, Double, Text, Uuid as SqlUuid};
use diesel_async::RunQueryDsl;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::db::DieselPool;
use crate::models::{JobRecord, JobStatus, NewJob};
use crate::utils::backoff::schedule_delay;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Diesel(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl<E: std::error::Error + 'static> From<bb8::RunError<E>> for QueueError {
    fn from(error: bb8::RunError<E>) -> Self {
        QueueError::Pool(error.to_string())
    }
}

/// Enqueue options beyond queue + payload.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub depends_on: Vec<Uuid>,
    pub delay: Option<Duration>,
    pub max_attempts: Option<i32>,
}

/// Per-queue depth snapshot for observability.
#[derive(Debug, Clone, Serialize, QueryableByName)]
pub struct QueueDepth {
    #[diesel(sql_type = Text)]
    pub queue: String,
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

#[derive(Clone)]
pub struct WorkQueue {
    pool: DieselPool,
    retry_schedule: Vec<u64>,
    default_max_attempts: i32,
}

impl WorkQueue {
    pub fn new(pool: DieselPool, retry_schedule: Vec<u64>, default_max_attempts: i32) -> Self {
        Self {
            pool,
            retry_schedule,
            default_max_attempts: default_max_attempts.max(1),
        }
    }

    /// Enqueue a payload. Dependent jobs stay unreservable until every
    /// `depends_on` job is done.
    #[instrument(skip(self, payload, options))]
    pub async fn enqueue<T: Serialize>(
        &self,
        queue_name: &str,
        tenant: Uuid,
        run: Option<Uuid>,
        payload: &T,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        use crate::schema::jobs::dsl::jobs;
        let now = Utc::now();
        let job = NewJob {
            id: Uuid::new_v4(),
            queue: queue_name.to_string(),
            tenant_id: tenant,
            run_id: run,
            payload: serde_json::to_value(payload)?,
            depends_on: options.depends_on,
            status: JobStatus::Ready.as_str().to_string(),
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(self.default_max_attempts),
            enqueued_at: now,
            available_at: now + options.delay.unwrap_or_else(Duration::zero),
        };

        let mut conn = self.pool.get().await?;
        let job_id = job.id;
        diesel::insert_into(jobs)
            .values(&job)
            .execute(&mut conn)
            .await?;
        debug!("enqueued {} on {}", job_id, queue_name);
        Ok(job_id)
    }

    /// Reserve the next ready job across the given queues for this worker.
    ///
    /// FIFO within a queue subject to `available_at`. Also performs the two
    /// lazy sweeps: expired leases return to ready (attempts incremented),
    /// and jobs of cancelled runs go dead.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        queues: &[String],
        worker: &str,
        lease_secs: i64,
    ) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.pool.get().await?;

        // Reclaim leases from crashed or stalled workers
        diesel::sql_query(
            "UPDATE jobs SET status = 'ready', lease_expires_at = NULL, worker_id = NULL, \
                             attempts = attempts + 1 \
             WHERE status = 'in_flight' AND lease_expires_at < now()",
        )
        .execute(&mut conn)
        .await?;

        // Lazily kill work belonging to cancelled runs
        diesel::sql_query(
            "UPDATE jobs SET status = 'dead', last_error = 'run_cancelled', finished_at = now() \
             WHERE status = 'ready' \
               AND run_id IN (SELECT id FROM runs WHERE status = 'cancelled')",
        )
        .execute(&mut conn)
        .await?;

        let reserved: Option<JobRecord> = diesel::sql_query(
            "UPDATE jobs SET status = 'in_flight', worker_id = $2, \
                             lease_expires_at = now() + make_interval(secs => $3) \
             WHERE id = ( \
                 SELECT j.id FROM jobs j \
                 WHERE j.queue = ANY($1) \
                   AND j.status = 'ready' \
                   AND j.available_at <= now() \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM jobs d \
                       WHERE d.id = ANY(j.depends_on) AND d.status <> 'done' \
                   ) \
                 ORDER BY j.enqueued_at ASC \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1 \
             ) \
             RETURNING *",
        )
        .bind::<Array<Text>, _>(queues)
        .bind::<Text, _>(worker)
        .bind::<Double, _>(lease_secs as f64)
        .get_result::<JobRecord>(&mut conn)
        .await
        .optional()?;

        Ok(reserved)
    }

    /// Extend the lease of an in-flight job. Returns false when the job is
    /// no longer held by this worker (lease expired and was re-reserved).
    pub async fn heartbeat(
        &self,
        job_id: Uuid,
        worker: &str,
        lease_secs: i64,
    ) -> Result<bool, QueueError> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::sql_query(
            "UPDATE jobs SET lease_expires_at = now() + make_interval(secs => $3) \
             WHERE id = $1 AND worker_id = $2 AND status = 'in_flight'",
        )
        .bind::<SqlUuid, _>(job_id)
        .bind::<Text, _>(worker)
        .bind::<Double, _>(lease_secs as f64)
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    pub async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        use crate::schema::jobs::dsl::*;
        let mut conn = self.pool.get().await?;
        diesel::update(jobs.filter(id.eq(job_id)))
            .set((
                status.eq(JobStatus::Done.as_str()),
                lease_expires_at.eq::<Option<chrono::DateTime<Utc>>>(None),
                finished_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Fail a job. Retryable failures with attempts left re-enqueue on the
    /// backoff schedule; everything else dead-letters.
    #[instrument(skip(self, err))]
    pub async fn fail(&self, job: &JobRecord, err: &str, retryable: bool) -> Result<(), QueueError> {
        use crate::schema::jobs::dsl::*;
        let mut conn = self.pool.get().await?;

        let next_attempt = job.attempts + 1;
        if retryable && next_attempt < job.max_attempts {
            let delay = schedule_delay(&self.retry_schedule, job.attempts as u32);
            let delay = Duration::from_std(delay).unwrap_or_else(|_| Duration::seconds(180));
            diesel::update(jobs.filter(id.eq(job.id)))
                .set((
                    status.eq(JobStatus::Ready.as_str()),
                    attempts.eq(next_attempt),
                    last_error.eq(err),
                    available_at.eq(Utc::now() + delay),
                    lease_expires_at.eq::<Option<chrono::DateTime<Utc>>>(None),
                    worker_id.eq::<Option<String>>(None),
                ))
                .execute(&mut conn)
                .await?;
            debug!("re-enqueued {} (attempt {}) after {:?}", job.id, next_attempt, delay);
        } else {
            diesel::update(jobs.filter(id.eq(job.id)))
                .set((
                    status.eq(JobStatus::Dead.as_str()),
                    attempts.eq(next_attempt),
                    last_error.eq(err),
                    lease_expires_at.eq::<Option<chrono::DateTime<Utc>>>(None),
                    finished_at.eq(Utc::now()),
                ))
                .execute(&mut conn)
                .await?;
            warn!("dead-lettered {} after {} attempts: {}", job.id, next_attempt, err);
        }
        Ok(())
    }

    /// Probe jobs still pending for a run+domain, excluding the caller's own
    /// job. Zero means the calling probe is the last one for the domain.
    pub async fn pending_probe_count(
        &self,
        run: Uuid,
        domain: &str,
        exclude_job: Uuid,
    ) -> Result<i64, QueueError> {
        let mut conn = self.pool.get().await?;
        #[derive(QueryableByName)]
        struct Row {
            #[diesel(sql_type = BigInt)]
            count: i64,
        }
        let row: Row = diesel::sql_query(
            "SELECT COUNT(*) AS count FROM jobs \
             WHERE run_id = $1 \
               AND status IN ('ready', 'in_flight') \
               AND id <> $2 \
               AND payload->>'task' = 'probe_email' \
               AND payload->>'domain' = $3",
        )
        .bind::<SqlUuid, _>(run)
        .bind::<SqlUuid, _>(exclude_job)
        .bind::<Text, _>(domain)
        .get_result(&mut conn)
        .await?;
        Ok(row.count)
    }

    // =========================================================================
    // DLQ / OBSERVABILITY
    // =========================================================================

    /// Dead jobs for inspection, newest first.
    pub async fn dead_letters(
        &self,
        queue_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<JobRecord>, QueueError> {
        use crate::schema::jobs::dsl::*;
        let mut conn = self.pool.get().await?;
        let mut query = jobs
            .filter(status.eq(JobStatus::Dead.as_str()))
            .order(finished_at.desc())
            .limit(limit)
            .into_boxed();
        if let Some(name) = queue_name {
            query = query.filter(queue.eq(name.to_string()));
        }
        Ok(query.load::<JobRecord>(&mut conn).await?)
    }

    /// Put a dead job back on its queue with a fresh attempt budget.
    pub async fn requeue_dead(&self, job_id: Uuid) -> Result<bool, QueueError> {
        use crate::schema::jobs::dsl::*;
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            jobs.filter(id.eq(job_id))
                .filter(status.eq(JobStatus::Dead.as_str())),
        )
        .set((
            status.eq(JobStatus::Ready.as_str()),
            attempts.eq(0),
            available_at.eq(Utc::now()),
            finished_at.eq::<Option<chrono::DateTime<Utc>>>(None),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    pub async fn queue_depths(&self) -> Result<Vec<QueueDepth>, QueueError> {
        let mut conn = self.pool.get().await?;
        Ok(diesel::sql_query(
            "SELECT queue, status, COUNT(*) AS count FROM jobs \
             GROUP BY queue, status ORDER BY queue, status",
        )
        .load::<QueueDepth>(&mut conn)
        .await?)
    }

    /// In-flight jobs with their lease state, for the worker snapshot.
    pub async fn in_flight(&self) -> Result<Vec<JobRecord>, QueueError> {
        use crate::schema::jobs::dsl::*;
        let mut conn = self.pool.get().await?;
        Ok(jobs
            .filter(status.eq(JobStatus::InFlight.as_str()))
            .order(lease_expires_at.asc())
            .load::<JobRecord>(&mut conn)
            .await?)
    }
}
