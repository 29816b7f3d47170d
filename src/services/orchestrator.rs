// Pipeline orchestration: run lifecycle, per-domain stage fan-out with
// depends-on chaining, progress accounting, and the per-email probe handler.
//
// Stage handlers are plain `(ctx, job) -> Result` functions dispatched by
// the worker; stage ordering is data in the queue, not control flow here.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::app::PipelineContext;
use crate::models::{
    CatchAllStatus, DomainStagePayload, JobRecord, NewDomainResolution, NewVerificationResult,
    ProbeEmailPayload, RunOptions, RunStatus, SmtpCategory, StagePayload, VerifyStatus,
    QUEUE_CRAWL, QUEUE_GENERATE, QUEUE_VERIFY,
};
use crate::services::classifier::{classify, ClassifierPolicy, SmtpSignal, VerificationSignals};
use crate::services::crawler;
use crate::services::extractor::{normalize_title, split_name, ExtractionHints};
use crate::services::permuter;
use crate::services::queue::EnqueueOptions;
use crate::services::rate_limit::{RateLease, RateScope, ScopeLimits};
use crate::services::scoring::IcpSignals;
use crate::services::store::{EmailUpsert, PersonUpsert};
use crate::utils::domain::{normalize_domain_batch, split_email};
use crate::utils::pipeline_error::PipelineError;

/// How long a job waits on rate-limiter semaphores before surfacing
/// `rate_limited` to the retry machinery.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(20);

/// Confidence recorded for a user-supplied domain at run start.
const USER_SUPPLIED_CONFIDENCE: i32 = 60;

/// Confidence once autodiscovery confirmed the domain serves pages.
const CRAWL_CONFIRMED_CONFIDENCE: i32 = 90;

#[derive(Debug, Clone, Serialize)]
pub struct StartSummary {
    pub run_id: Uuid,
    pub started: bool,
    pub domains_enqueued: usize,
}

pub struct PipelineOrchestrator {
    ctx: PipelineContext,
}

/// Which stages this run executes, derived from mode + skip flags.
fn effective_stages(options: &RunOptions) -> (bool, bool, bool) {
    let autodiscovery = options.mode.runs_autodiscovery() && !options.skip_crawl;
    let generate = options.mode.runs_generate();
    let verify = options.mode.runs_verify() && !options.skip_verify;
    (autodiscovery, generate, verify)
}

impl PipelineOrchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    // =========================================================================
    // RUN START
    // =========================================================================

    /// Validate, budget-check, and fan a run out into per-domain stage
    /// chains. Applying the same run twice is a no-op after the first.
    #[instrument(skip(self))]
    pub async fn start_run(
        &self,
        tenant: Uuid,
        run_id: Uuid,
    ) -> Result<StartSummary, PipelineError> {
        let store = &self.ctx.store;
        let run = store
            .get_run(tenant, run_id)
            .await
            .map_err(|e| PipelineError::Validation(e.to_string()))?;

        if !store
            .claim_run(tenant, run_id)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?
        {
            info!("run {} already claimed or terminal, nothing to do", run_id);
            return Ok(StartSummary {
                run_id,
                started: false,
                domains_enqueued: 0,
            });
        }

        let options = run.options();
        let mut domains = normalize_domain_batch(&run.domains);
        if options.company_limit > 0 && domains.len() > options.company_limit as usize {
            warn!(
                "run {} requested {} domains, truncating to company_limit {}",
                run_id,
                domains.len(),
                options.company_limit
            );
            domains.truncate(options.company_limit as usize);
        }

        // Hard 24h tenant budget, enforced at start only
        let used = store
            .companies_created_last_24h(tenant)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;
        let cap = self.ctx.config.hard_company_limit_24h;
        if used + domains.len() as i64 > cap {
            let msg = format!(
                "company_limit_exceeded: {} used + {} requested > {} per 24h",
                used,
                domains.len(),
                cap
            );
            store
                .finish_run(tenant, run_id, RunStatus::Failed, Some("company_limit_exceeded"))
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
            return Err(PipelineError::BudgetExceeded(msg));
        }

        store
            .set_domains_total(tenant, run_id, domains.len() as i32)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;

        if domains.is_empty() {
            store
                .finish_run(tenant, run_id, RunStatus::Succeeded, None)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
            return Ok(StartSummary {
                run_id,
                started: true,
                domains_enqueued: 0,
            });
        }

        let (run_auto, run_generate, run_verify) = effective_stages(&options);
        let mut enqueued = 0usize;

        for domain in &domains {
            let company_id = store
                .upsert_company(tenant, Some(run_id), domain, Some(domain))
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;

            store
                .record_resolution(NewDomainResolution {
                    id: Uuid::new_v4(),
                    tenant_id: tenant,
                    company_id,
                    chosen_domain: domain.clone(),
                    method: "user_supplied".to_string(),
                    confidence: USER_SUPPLIED_CONFIDENCE,
                    mx_hosts: Vec::new(),
                    lowest_mx: None,
                    resolved_at: Utc::now(),
                })
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;

            let payload = DomainStagePayload {
                run_id,
                tenant_id: tenant,
                company_id,
                domain: domain.clone(),
            };

            let mut prev_job: Option<Uuid> = None;
            if run_auto {
                let job_id = self
                    .enqueue_stage(
                        QUEUE_CRAWL,
                        tenant,
                        run_id,
                        &StagePayload::Autodiscovery(payload.clone()),
                        Vec::new(),
                    )
                    .await?;
                prev_job = Some(job_id);
            }
            if run_generate {
                let job_id = self
                    .enqueue_stage(
                        QUEUE_GENERATE,
                        tenant,
                        run_id,
                        &StagePayload::GenerateEmails(payload.clone()),
                        prev_job.into_iter().collect(),
                    )
                    .await?;
                prev_job = Some(job_id);
            }
            if run_verify {
                self.enqueue_stage(
                    QUEUE_VERIFY,
                    tenant,
                    run_id,
                    &StagePayload::VerifyDomain(payload.clone()),
                    prev_job.into_iter().collect(),
                )
                .await?;
            }

            if !run_auto && !run_generate && !run_verify {
                // Nothing to do for this domain under the mode matrix
                self.complete_domain(tenant, run_id, company_id, false).await?;
            } else {
                enqueued += 1;
            }
        }

        info!(
            "run {} started: {} domains enqueued (stages: auto={} generate={} verify={})",
            run_id, enqueued, run_auto, run_generate, run_verify
        );
        Ok(StartSummary {
            run_id,
            started: true,
            domains_enqueued: enqueued,
        })
    }

    async fn enqueue_stage(
        &self,
        queue_name: &str,
        tenant: Uuid,
        run_id: Uuid,
        payload: &StagePayload,
        depends_on: Vec<Uuid>,
    ) -> Result<Uuid, PipelineError> {
        self.ctx
            .queue
            .enqueue(
                queue_name,
                tenant,
                Some(run_id),
                payload,
                EnqueueOptions {
                    depends_on,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))
    }

    // =========================================================================
    // STAGE: AUTODISCOVERY
    // =========================================================================

    /// Crawl seed paths, persist Sources, extract candidates, upsert People
    /// and published Emails.
    #[instrument(skip(self, payload), fields(domain = %payload.domain))]
    pub async fn handle_autodiscovery(
        &self,
        payload: &DomainStagePayload,
    ) -> Result<(), PipelineError> {
        let Some(options) = self.run_options_if_active(payload).await? else {
            return Ok(());
        };

        let scopes = [
            (RateScope::Global, self.ctx.rate_settings.global.limits()),
            (
                RateScope::CrawlDomain(payload.domain.clone()),
                self.ctx.rate_settings.per_domain.limits(),
            ),
        ];
        let lease = self.acquire(&scopes).await?;

        let result = self.autodiscovery_inner(payload, &options).await;
        self.release(lease).await;
        result?;

        if !effective_stages(&options).1 && !effective_stages(&options).2 {
            self.complete_domain(payload.tenant_id, payload.run_id, payload.company_id, false)
                .await?;
        }
        Ok(())
    }

    async fn autodiscovery_inner(
        &self,
        payload: &DomainStagePayload,
        options: &RunOptions,
    ) -> Result<(), PipelineError> {
        let config = &self.ctx.config;
        let store = &self.ctx.store;

        let (pages, stats) = crawler::crawl_domain(
            &self.ctx.fetcher,
            &payload.domain,
            config.crawl_max_pages_per_domain,
            config.crawl_max_depth,
        )
        .await;

        info!(
            "crawl of {} fetched {} pages ({} robots-blocked, {} throttled, {} failed)",
            payload.domain,
            stats.pages_fetched,
            stats.pages_blocked_robots,
            stats.pages_throttled,
            stats.pages_failed
        );

        let hints = ExtractionHints {
            company_domain: Some(payload.domain.clone()),
        };
        let mut published = 0i32;

        for page in &pages {
            store
                .insert_source(crate::models::NewSource::new(
                    payload.tenant_id,
                    payload.company_id,
                    &page.url,
                    &page.html,
                ))
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;

            let candidates = self
                .ctx
                .extractor
                .extract(&page.html, &page.url, &hints)
                .await;

            for candidate in candidates {
                let mut person_id = None;

                if let Some(full) = candidate.full.clone() {
                    let (first, last) = match (candidate.first.clone(), candidate.last.clone()) {
                        (None, None) => split_name(&full),
                        parts => parts,
                    };
                    let title_facets = candidate
                        .title
                        .as_deref()
                        .map(normalize_title)
                        .unwrap_or_default();
                    let score = self.ctx.icp_scorer.score(&IcpSignals {
                        title: candidate.title.as_deref(),
                        title_norm: title_facets.title_norm.as_deref(),
                        role_family: title_facets.role_family.as_deref(),
                        seniority: title_facets.seniority.as_deref(),
                    });
                    let id = store
                        .upsert_person(
                            payload.tenant_id,
                            payload.company_id,
                            &PersonUpsert {
                                first_name: first,
                                last_name: last,
                                full_name: full,
                                title: candidate.title.clone(),
                                title_norm: title_facets.title_norm,
                                role_family: title_facets.role_family,
                                seniority: title_facets.seniority,
                                source_url: Some(candidate.source_url.clone()),
                                icp_score: score,
                            },
                        )
                        .await
                        .map_err(|e| PipelineError::Database(e.to_string()))?;
                    person_id = Some(id);
                }

                if let Some(email) = candidate.email {
                    store
                        .upsert_email(
                            payload.tenant_id,
                            &email,
                            &EmailUpsert {
                                company_id: payload.company_id,
                                person_id,
                                is_published: true,
                                source_url: Some(candidate.source_url.clone()),
                            },
                        )
                        .await
                        .map_err(|e| PipelineError::Database(e.to_string()))?;
                    published += 1;
                }
            }
        }

        if published > 0 {
            store
                .bump_emails_found(payload.run_id, published)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
        }

        if stats.pages_fetched > 0 {
            store
                .set_official_domain(
                    payload.tenant_id,
                    payload.company_id,
                    &payload.domain,
                    CRAWL_CONFIRMED_CONFIDENCE,
                    "autodiscovery",
                )
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
        }

        if options.ai_enabled && self.ctx.extractor.is_ai_backed() {
            store
                .merge_company_attr(
                    payload.company_id,
                    serde_json::json!({ "ai_people_extracted": true }),
                )
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
        }

        Ok(())
    }

    // =========================================================================
    // STAGE: GENERATE
    // =========================================================================

    /// Detect the domain's email pattern and permute candidates for every
    /// person lacking a published address. Re-running with an unchanged
    /// person set upserts onto the same rows.
    #[instrument(skip(self, payload), fields(domain = %payload.domain))]
    pub async fn handle_generate(
        &self,
        payload: &DomainStagePayload,
    ) -> Result<(), PipelineError> {
        let Some(options) = self.run_options_if_active(payload).await? else {
            return Ok(());
        };
        let store = &self.ctx.store;

        let examples = store
            .published_examples(payload.tenant_id, payload.company_id)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;
        let inference = permuter::infer_domain_pattern(&examples);
        debug!(
            "pattern inference for {}: {:?} (confidence {:.2}, {} samples)",
            payload.domain, inference.pattern, inference.confidence, inference.samples
        );

        let covered: HashSet<Uuid> = store
            .person_ids_with_published_email(payload.tenant_id, payload.company_id)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?
            .into_iter()
            .collect();

        let people = store
            .people_for_company(payload.tenant_id, payload.company_id)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;

        let mut generated = 0i32;
        for person in people {
            if covered.contains(&person.id) {
                continue;
            }
            let first = person.first_name.as_deref().unwrap_or("");
            let last = person.last_name.as_deref().unwrap_or("");
            let candidates = permuter::generate_candidates(
                first,
                last,
                &payload.domain,
                inference.pattern.as_deref(),
            );
            for email in candidates {
                store
                    .upsert_email(
                        payload.tenant_id,
                        &email,
                        &EmailUpsert {
                            company_id: payload.company_id,
                            person_id: Some(person.id),
                            is_published: false,
                            source_url: None,
                        },
                    )
                    .await
                    .map_err(|e| PipelineError::Database(e.to_string()))?;
                generated += 1;
            }
        }

        info!(
            "generated {} candidate emails for {}",
            generated, payload.domain
        );

        if !effective_stages(&options).2 {
            self.complete_domain(payload.tenant_id, payload.run_id, payload.company_id, false)
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // STAGE: VERIFY (per-domain fan-out)
    // =========================================================================

    /// Fan out one probe job per email lacking a conclusive verdict. On a
    /// confirmed catch-all with probing disabled by policy, classify every
    /// address directly without SMTP traffic.
    ///
    /// Probes depend on this fan-out job, so none becomes reservable until
    /// the full set is enqueued — the last-probe completion check can never
    /// observe a partially fanned-out domain.
    #[instrument(skip(self, job, payload), fields(domain = %payload.domain))]
    pub async fn handle_verify_domain(
        &self,
        job: &JobRecord,
        payload: &DomainStagePayload,
    ) -> Result<(), PipelineError> {
        if self.run_options_if_active(payload).await?.is_none() {
            return Ok(());
        }
        let store = &self.ctx.store;

        // The domain-level catch-all probe is outbound SMTP; gate it like
        // any other probe traffic
        let scopes = [(RateScope::Global, self.ctx.rate_settings.global.limits())];
        let lease = self.acquire(&scopes).await?;
        let catchall = self
            .ctx
            .catch_all
            .check(payload.tenant_id, payload.company_id, &payload.domain, false)
            .await;
        self.release(lease).await;
        let catchall = catchall.map_err(|e| PipelineError::TransientNetwork(e.to_string()))?;

        let pending = store
            .emails_needing_verification(payload.tenant_id, payload.company_id)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;

        if pending.is_empty() {
            self.complete_domain(payload.tenant_id, payload.run_id, payload.company_id, false)
                .await?;
            return Ok(());
        }

        if catchall.status == CatchAllStatus::CatchAll && self.ctx.config.skip_probes_on_catchall {
            // Per-address probes carry no signal on a catch-all domain
            for email in &pending {
                let prior = store
                    .has_confirmed_delivery(payload.tenant_id, email.id)
                    .await
                    .map_err(|e| PipelineError::Database(e.to_string()))?;
                let signals = VerificationSignals {
                    catch_all: Some(CatchAllStatus::CatchAll),
                    prior_delivery_confirmed: prior,
                    ..Default::default()
                };
                self.persist_verdict(payload.run_id, payload.tenant_id, email.id, &signals, None)
                    .await?;
            }
            self.complete_domain(payload.tenant_id, payload.run_id, payload.company_id, false)
                .await?;
            return Ok(());
        }

        let mut fanned_out = 0usize;
        for email in &pending {
            // Suppressed addresses and domains are never probed
            let suppressed = store
                .is_suppressed(payload.tenant_id, &email.email, &payload.domain)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
            if suppressed {
                debug!("skipping suppressed address {}", email.email);
                continue;
            }
            let probe = StagePayload::ProbeEmail(ProbeEmailPayload {
                run_id: payload.run_id,
                tenant_id: payload.tenant_id,
                company_id: payload.company_id,
                email_id: email.id,
                email: email.email.clone(),
                domain: payload.domain.clone(),
            });
            self.ctx
                .queue
                .enqueue(
                    QUEUE_VERIFY,
                    payload.tenant_id,
                    Some(payload.run_id),
                    &probe,
                    EnqueueOptions {
                        depends_on: vec![job.id],
                        max_attempts: Some(self.ctx.config.verify_max_attempts as i32),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
            fanned_out += 1;
        }

        if fanned_out == 0 {
            // Every pending address was suppressed; nothing will probe
            self.complete_domain(payload.tenant_id, payload.run_id, payload.company_id, false)
                .await?;
        }
        info!("fanned out {} probes for {}", fanned_out, payload.domain);
        Ok(())
    }

    // =========================================================================
    // STAGE: PROBE (per-email)
    // =========================================================================

    /// Execute the verification state machine for one email and append the
    /// result. Inconclusive outcomes with attempts left surface a retryable
    /// error; the queue re-enqueues on the backoff schedule.
    #[instrument(skip(self, job, payload), fields(email = %payload.email))]
    pub async fn handle_probe_email(
        &self,
        job: &JobRecord,
        payload: &ProbeEmailPayload,
    ) -> Result<(), PipelineError> {
        let store = &self.ctx.store;
        let run = store
            .get_run(payload.tenant_id, payload.run_id)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;
        if run.status().map_or(true, |s| s.is_terminal()) {
            debug!("run {} terminal, skipping probe", payload.run_id);
            return Ok(());
        }
        if self.ctx.is_shutting_down() {
            return Err(PipelineError::Internal("worker_shutdown".to_string()));
        }

        let (_, email_domain) = split_email(&payload.email)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;

        let mx = self
            .ctx
            .mx_resolver
            .resolve(&email_domain, false)
            .await
            .map_err(|e| PipelineError::TransientNetwork(e.to_string()))?;

        if mx.no_mx {
            let signals = VerificationSignals {
                no_mx: true,
                ..Default::default()
            };
            self.persist_verdict(payload.run_id, payload.tenant_id, payload.email_id, &signals, None)
                .await?;
            return Ok(());
        }
        let mx_host = mx.lowest_mx.clone().unwrap_or_else(|| email_domain.clone());

        // Per-MX gating: semaphore pair then the 1-second buckets
        let scopes = [
            (RateScope::Global, self.ctx.rate_settings.global.limits()),
            (
                RateScope::MxHost(mx_host.clone()),
                self.ctx.rate_settings.per_mx.limits(),
            ),
        ];
        let lease = self.acquire(&scopes).await?;

        let result = self.probe_inner(job, payload, &email_domain, &mx_host).await;
        self.release(lease).await;
        result
    }

    async fn probe_inner(
        &self,
        job: &JobRecord,
        payload: &ProbeEmailPayload,
        email_domain: &str,
        mx_host: &str,
    ) -> Result<(), PipelineError> {
        let config = &self.ctx.config;
        let limiter = &self.ctx.rate_limiter;

        let global_ok = limiter
            .try_consume_rps(&RateScope::Global, config.global_rps)
            .await
            .map_err(|e| PipelineError::TransientNetwork(e.to_string()))?;
        if !global_ok {
            return Err(PipelineError::RateLimited("global rps".to_string()));
        }
        let mx_ok = limiter
            .try_consume_rps(&RateScope::MxHost(mx_host.to_string()), config.per_mx_rps)
            .await
            .map_err(|e| PipelineError::TransientNetwork(e.to_string()))?;
        if !mx_ok {
            return Err(PipelineError::RateLimited(format!("mx rps {}", mx_host)));
        }

        let catchall = self
            .ctx
            .catch_all
            .check(payload.tenant_id, payload.company_id, email_domain, false)
            .await
            .map_err(|e| PipelineError::TransientNetwork(e.to_string()))?;

        let mut signals = VerificationSignals {
            catch_all: Some(catchall.status),
            signal_at: Some(Utc::now()),
            ..Default::default()
        };

        if catchall.status == CatchAllStatus::NoMx {
            signals.no_mx = true;
            signals.catch_all = None;
            self.persist_verdict(
                payload.run_id,
                payload.tenant_id,
                payload.email_id,
                &signals,
                None,
            )
            .await?;
            return Ok(());
        }

        let skip_probe =
            catchall.status == CatchAllStatus::CatchAll && config.skip_probes_on_catchall;

        if catchall.status == CatchAllStatus::CatchAll {
            signals.prior_delivery_confirmed = self
                .ctx
                .store
                .has_confirmed_delivery(payload.tenant_id, payload.email_id)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
        }

        if !skip_probe {
            let outcome = self
                .ctx
                .prober
                .probe(&payload.email, mx_host)
                .await
                .map_err(|e| PipelineError::Validation(e.to_string()))?;

            signals.smtp = Some(SmtpSignal {
                category: outcome.category,
                code: outcome.code,
                reason: outcome.error.as_ref().map(|e| {
                    e.split(':').next().unwrap_or("error").to_string()
                }),
            });

            // Inconclusive SMTP: consult the fallback provider if configured
            let inconclusive = matches!(
                outcome.category,
                SmtpCategory::TempFail | SmtpCategory::Unknown
            );
            if inconclusive {
                if let Some(ref fallback) = self.ctx.fallback {
                    match fallback.verify(&payload.email).await {
                        Ok(result) => signals.fallback = Some(result.status),
                        Err(e) => warn!("fallback verify failed for {}: {}", payload.email, e),
                    }
                }
            }
        }

        let verdict = self
            .persist_verdict(
                payload.run_id,
                payload.tenant_id,
                payload.email_id,
                &signals,
                Some(mx_host),
            )
            .await?;

        // Only temp_fail/unknown retry; conclusive verdicts are terminal
        if !verdict.is_conclusive() && job.attempts + 1 < job.max_attempts {
            let reason = signals
                .smtp
                .as_ref()
                .and_then(|s| s.reason.clone())
                .unwrap_or_else(|| "temp_fail".to_string());
            return Err(PipelineError::SmtpTempFail(reason));
        }

        Ok(())
    }

    /// Classify and append one VerificationResult row; bumps the run's
    /// counters for conclusive (or final) verdicts.
    async fn persist_verdict(
        &self,
        run_id: Uuid,
        tenant: Uuid,
        email_id: Uuid,
        signals: &VerificationSignals,
        mx_host: Option<&str>,
    ) -> Result<VerifyStatus, PipelineError> {
        let policy = ClassifierPolicy {
            fallback_configured: self.ctx.fallback.is_some(),
            result_ttl_days: self.ctx.config.verify_result_ttl_days,
        };
        let verdict = classify(signals, &policy, Utc::now());
        let now = Utc::now();

        let smtp_code = signals.smtp.as_ref().and_then(|s| s.code).map(|c| c as i32);
        let smtp_reason = signals.smtp.as_ref().and_then(|s| s.reason.clone());

        self.ctx
            .store
            .append_verification(NewVerificationResult {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                email_id,
                mx_host: mx_host.map(String::from),
                smtp_code,
                smtp_reason,
                checked_at: now,
                fallback_status: signals.fallback.map(|f| f.as_str().to_string()),
                fallback_at: signals.fallback.map(|_| now),
                verify_status: verdict.status.as_str().to_string(),
                verify_reason: verdict.reason.clone(),
                verified_mx: mx_host.map(String::from),
                verified_at: Some(now),
            })
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;

        self.ctx
            .store
            .bump_verify_counters(run_id, verdict.status.as_str())
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(verdict.status)
    }

    // =========================================================================
    // COMPLETION / FINALIZE
    // =========================================================================

    /// Post-completion hook from the worker, invoked after a job's `done`
    /// transition lands. The last probe for a domain (by queue state) counts
    /// the domain complete; running this after the transition means two
    /// concurrent finishers cannot both see the other as pending.
    pub async fn on_job_settled(&self, job: &JobRecord) -> Result<(), PipelineError> {
        if let Ok(StagePayload::ProbeEmail(p)) = job.payload::<StagePayload>() {
            let remaining = self
                .ctx
                .queue
                .pending_probe_count(p.run_id, &p.domain, job.id)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
            if remaining == 0 {
                self.complete_domain(p.tenant_id, p.run_id, p.company_id, false)
                    .await?;
            }
        }
        Ok(())
    }

    /// Count one domain toward completion; finalize when every domain is
    /// accounted for (successes and failures combined).
    pub async fn complete_domain(
        &self,
        tenant: Uuid,
        run_id: Uuid,
        company_id: Uuid,
        domain_failed: bool,
    ) -> Result<(), PipelineError> {
        let store = &self.ctx.store;
        let (completed, total) = store
            .complete_domain(run_id, company_id, domain_failed)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;

        if completed >= total {
            store
                .finalize_aggregates(tenant, run_id)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;

            let run = store
                .get_run(tenant, run_id)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
            let all_failed = total > 0 && run.domains_failed >= total;
            let (final_status, error) = if all_failed {
                (RunStatus::Failed, Some("all_domains_failed"))
            } else {
                (RunStatus::Succeeded, None)
            };
            store
                .finish_run(tenant, run_id, final_status, error)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
            info!(
                "run {} finalized: {:?} ({}/{} domains, {} failed)",
                run_id, final_status, completed, total, run.domains_failed
            );
        }
        Ok(())
    }

    /// Terminal-failure hook from the worker: a dead domain-stage job fails
    /// only its domain; a dead probe still counts toward domain completion.
    pub async fn on_job_dead(&self, job: &JobRecord) -> Result<(), PipelineError> {
        match job.payload::<StagePayload>() {
            Ok(StagePayload::Autodiscovery(p))
            | Ok(StagePayload::GenerateEmails(p))
            | Ok(StagePayload::VerifyDomain(p)) => {
                warn!("domain {} failed in run {}", p.domain, p.run_id);
                self.complete_domain(p.tenant_id, p.run_id, p.company_id, true)
                    .await
            }
            Ok(StagePayload::ProbeEmail(p)) => {
                let remaining = self
                    .ctx
                    .queue
                    .pending_probe_count(p.run_id, &p.domain, job.id)
                    .await
                    .map_err(|e| PipelineError::Database(e.to_string()))?;
                if remaining == 0 {
                    self.complete_domain(p.tenant_id, p.run_id, p.company_id, false)
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                warn!("dead job {} has unreadable payload: {}", job.id, e);
                Ok(())
            }
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Load the run's options, or None when the run is terminal (cancelled
    /// mid-flight) and the stage should quietly stand down.
    async fn run_options_if_active(
        &self,
        payload: &DomainStagePayload,
    ) -> Result<Option<RunOptions>, PipelineError> {
        let run = self
            .ctx
            .store
            .get_run(payload.tenant_id, payload.run_id)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;
        match run.status() {
            Some(s) if s.is_terminal() => {
                debug!("run {} is {:?}, skipping stage", payload.run_id, s);
                Ok(None)
            }
            _ => Ok(Some(run.options())),
        }
    }

    async fn acquire(
        &self,
        scopes: &[(RateScope, ScopeLimits)],
    ) -> Result<RateLease, PipelineError> {
        self.ctx
            .rate_limiter
            .acquire(scopes, ACQUIRE_TIMEOUT)
            .await
            .map_err(|e| PipelineError::RateLimited(e.to_string()))
    }

    async fn release(&self, lease: RateLease) {
        if let Err(e) = self.ctx.rate_limiter.release(lease).await {
            warn!("rate lease release failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunMode;

    fn options(mode: RunMode, skip_crawl: bool, skip_verify: bool) -> RunOptions {
        RunOptions {
            mode,
            skip_crawl,
            skip_verify,
            ..Default::default()
        }
    }

    #[test]
    fn test_effective_stages_mode_matrix() {
        assert_eq!(
            effective_stages(&options(RunMode::Full, false, false)),
            (true, true, true)
        );
        assert_eq!(
            effective_stages(&options(RunMode::Autodiscovery, false, false)),
            (true, false, false)
        );
        assert_eq!(
            effective_stages(&options(RunMode::Generate, false, false)),
            (false, true, false)
        );
        assert_eq!(
            effective_stages(&options(RunMode::Verify, false, false)),
            (false, false, true)
        );
    }

    #[test]
    fn test_skip_flags_override_mode() {
        assert_eq!(
            effective_stages(&options(RunMode::Full, true, false)),
            (false, true, true)
        );
        assert_eq!(
            effective_stages(&options(RunMode::Full, false, true)),
            (true, true, false)
        );
    }
}
