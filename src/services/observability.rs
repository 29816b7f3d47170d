// Run metrics aggregation, queue/worker snapshots, per-MX behavior
// snapshots, and DLQ inspection.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DieselPool;
use crate::models::{MxBehavior, RunProgress};
use crate::services::queue::{QueueDepth, QueueError, WorkQueue};
use crate::services::store::{IdempotentStore, StoreError};

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Diesel(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),
}

impl<E: std::error::Error + 'static> From<bb8::RunError<E>> for ObservabilityError {
    fn from(error: bb8::RunError<E>) -> Self {
        ObservabilityError::Pool(error.to_string())
    }
}

/// Per-run metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub run_id: Uuid,
    pub status: String,
    pub progress: RunProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: Option<i64>,
}

/// One in-flight job as seen by the worker snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub job_id: Uuid,
    pub queue: String,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempts: i32,
}

/// DLQ entry for inspection and optional requeue.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub job_id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub first_seen: DateTime<Utc>,
}

pub struct Observability {
    pool: DieselPool,
    store: IdempotentStore,
    queue: WorkQueue,
}

impl Observability {
    pub fn new(pool: DieselPool, store: IdempotentStore, queue: WorkQueue) -> Self {
        Self { pool, store, queue }
    }

    pub async fn run_metrics(
        &self,
        tenant: Uuid,
        run_id: Uuid,
    ) -> Result<RunMetrics, ObservabilityError> {
        let run = self.store.get_run(tenant, run_id).await?;
        let elapsed_secs = match (run.started_at, run.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            (Some(start), None) => Some((Utc::now() - start).num_seconds()),
            _ => None,
        };
        Ok(RunMetrics {
            run_id: run.id,
            status: run.status.clone(),
            progress: run.progress(),
            created_at: run.created_at,
            started_at: run.started_at,
            finished_at: run.finished_at,
            elapsed_secs,
        })
    }

    pub async fn queue_depths(&self) -> Result<Vec<QueueDepth>, ObservabilityError> {
        Ok(self.queue.queue_depths().await?)
    }

    pub async fn worker_snapshot(&self) -> Result<Vec<WorkerSnapshot>, ObservabilityError> {
        Ok(self
            .queue
            .in_flight()
            .await?
            .into_iter()
            .map(|job| WorkerSnapshot {
                job_id: job.id,
                queue: job.queue,
                worker_id: job.worker_id,
                lease_expires_at: job.lease_expires_at,
                attempts: job.attempts,
            })
            .collect())
    }

    pub async fn dead_letters(
        &self,
        queue_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DeadLetter>, ObservabilityError> {
        Ok(self
            .queue
            .dead_letters(queue_name, limit)
            .await?
            .into_iter()
            .map(|job| DeadLetter {
                job_id: job.id,
                queue: job.queue,
                payload: job.payload,
                attempts: job.attempts,
                last_error: job.last_error,
                first_seen: job.finished_at.unwrap_or(job.enqueued_at),
            })
            .collect())
    }

    pub async fn requeue_dead_letter(&self, job_id: Uuid) -> Result<bool, ObservabilityError> {
        Ok(self.queue.requeue_dead(job_id).await?)
    }

    /// Per-MX behavior snapshot, slowest hosts first.
    pub async fn mx_behavior_snapshot(
        &self,
        limit: i64,
    ) -> Result<Vec<MxBehavior>, ObservabilityError> {
        use crate::schema::mx_behavior::dsl::*;
        let mut conn = self.pool.get().await?;
        Ok(mx_behavior
            .order(avg_latency_ms.desc())
            .limit(limit)
            .load::<MxBehavior>(&mut conn)
            .await?)
    }
}
