// Queue-consumer worker: reserves jobs across the stage queues, dispatches
// to the orchestrator handlers, heartbeats leases, and maps handler errors
// onto the queue's retry/DLQ contract.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::app::PipelineContext;
use crate::models::{JobRecord, StagePayload, QUEUE_CRAWL, QUEUE_GENERATE, QUEUE_VERIFY};
use crate::services::orchestrator::PipelineOrchestrator;
use crate::utils::pipeline_error::PipelineError;

/// Idle poll gap when every queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(1_000);

pub struct Worker {
    ctx: PipelineContext,
    orchestrator: Arc<PipelineOrchestrator>,
    worker_id: String,
}

impl Worker {
    pub fn new(ctx: PipelineContext, orchestrator: Arc<PipelineOrchestrator>, index: u32) -> Self {
        let worker_id = format!("worker-{}-{}", std::process::id(), index);
        Self {
            ctx,
            orchestrator,
            worker_id,
        }
    }

    /// Consume jobs until shutdown. In-flight work observes the shutdown
    /// signal at suspension points; anything unfinished is recovered by
    /// lease expiry on another worker.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn run(&self) {
        info!("worker {} starting", self.worker_id);
        let queues: Vec<String> = [QUEUE_CRAWL, QUEUE_GENERATE, QUEUE_VERIFY]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let lease_secs = self.ctx.config.queue_lease_sec;

        loop {
            if self.ctx.is_shutting_down() {
                break;
            }

            let job = match self
                .ctx
                .queue
                .reserve(&queues, &self.worker_id, lease_secs)
                .await
            {
                Ok(job) => job,
                Err(e) => {
                    error!("reserve failed: {}", e);
                    sleep(IDLE_POLL).await;
                    continue;
                }
            };

            match job {
                Some(job) => self.process(job).await,
                None => {
                    // Small jitter keeps idle workers from polling in step
                    let jitter = rand::thread_rng().gen_range(0..250);
                    sleep(IDLE_POLL + Duration::from_millis(jitter)).await;
                }
            }
        }
        info!("worker {} stopped", self.worker_id);
    }

    async fn process(&self, job: JobRecord) {
        debug!("processing job {} from {}", job.id, job.queue);
        let heartbeat = self.spawn_heartbeat(job.id);

        let outcome = self.dispatch(&job).await;
        heartbeat.abort();

        match outcome {
            Ok(()) => {
                if let Err(e) = self.ctx.queue.complete(job.id).await {
                    error!("complete failed for {}: {}", job.id, e);
                    return;
                }
                // Completion accounting runs after the done transition so a
                // pair of concurrent last-probes cannot miss each other
                if let Err(e) = self.orchestrator.on_job_settled(&job).await {
                    error!("settle accounting for {} errored: {}", job.id, e);
                }
            }
            Err(err) => {
                let retryable = err.retryable();
                let message = format!("{}: {}", err.kind(), err);
                warn!("job {} failed ({}retryable): {}", job.id, if retryable { "" } else { "non-" }, message);

                if let Err(e) = self.ctx.queue.fail(&job, &message, retryable).await {
                    error!("fail transition for {} errored: {}", job.id, e);
                    return;
                }

                // A job that just dead-lettered still owes its domain
                // accounting; the orchestrator settles it.
                let exhausted = job.attempts + 1 >= job.max_attempts;
                if !retryable || exhausted {
                    if let Err(e) = self.orchestrator.on_job_dead(&job).await {
                        error!("dead-job accounting for {} errored: {}", job.id, e);
                    }
                }
            }
        }
    }

    async fn dispatch(&self, job: &JobRecord) -> Result<(), PipelineError> {
        let payload: StagePayload = job
            .payload()
            .map_err(|e| PipelineError::Validation(format!("payload: {}", e)))?;

        match payload {
            StagePayload::Autodiscovery(p) => self.orchestrator.handle_autodiscovery(&p).await,
            StagePayload::GenerateEmails(p) => self.orchestrator.handle_generate(&p).await,
            StagePayload::VerifyDomain(p) => self.orchestrator.handle_verify_domain(job, &p).await,
            StagePayload::ProbeEmail(p) => self.orchestrator.handle_probe_email(job, &p).await,
        }
    }

    /// Periodic lease extension while a job runs. Aborted when the job
    /// settles; a lost heartbeat means another worker may reclaim the job,
    /// which is safe because handlers are idempotent.
    fn spawn_heartbeat(&self, job_id: uuid::Uuid) -> tokio::task::JoinHandle<()> {
        let queue = self.ctx.queue.clone();
        let worker_id = self.worker_id.clone();
        let interval = Duration::from_secs(self.ctx.config.queue_heartbeat_sec);
        let lease_secs = self.ctx.config.queue_lease_sec;

        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                match queue.heartbeat(job_id, &worker_id, lease_secs).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("lost lease on {}; stopping heartbeat", job_id);
                        break;
                    }
                    Err(e) => {
                        warn!("heartbeat for {} failed: {}", job_id, e);
                    }
                }
            }
        })
    }
}

/// Run `worker_concurrency` consumers until the shutdown signal flips.
pub async fn run_worker_pool(ctx: PipelineContext) {
    let orchestrator = Arc::new(PipelineOrchestrator::new(ctx.clone()));
    let mut handles = Vec::new();

    for index in 0..ctx.config.worker_concurrency {
        let worker = Worker::new(ctx.clone(), orchestrator.clone(), index);
        handles.push(tokio::spawn(async move { worker.run().await }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!("worker task panicked: {}", e);
        }
    }
}
