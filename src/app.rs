// Pipeline context: every coordination point the handlers need, carried
// through the call graph instead of living in module-level globals.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    app_config::AppConfig,
    config::RateLimitingConfig,
    db::{DieselPool, RedisPool},
    services::{
        catch_all::CatchAllDetector,
        extractor::CandidateExtractor,
        fallback::FallbackVerifier,
        fetcher::Fetcher,
        mx::MxResolver,
        queue::WorkQueue,
        rate_limit::RateLimiter,
        scoring::IcpScorer,
        smtp::SmtpProber,
        store::IdempotentStore,
    },
};

/// Shutdown signal shared by every worker task. Handlers observe it at
/// suspension points and return early; the queue lease machinery recovers
/// whatever was in flight.
pub type ShutdownRx = watch::Receiver<bool>;

#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<AppConfig>,
    pub diesel_pool: DieselPool,
    pub redis_pool: RedisPool,
    pub store: Arc<IdempotentStore>,
    pub queue: Arc<WorkQueue>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_settings: Arc<RateLimitingConfig>,
    pub fetcher: Arc<Fetcher>,
    pub mx_resolver: Arc<MxResolver>,
    pub catch_all: Arc<CatchAllDetector>,
    pub prober: Arc<SmtpProber>,
    pub fallback: Option<Arc<FallbackVerifier>>,
    pub extractor: Arc<dyn CandidateExtractor>,
    pub icp_scorer: Arc<dyn IcpScorer>,
    pub shutdown: ShutdownRx,
}

impl PipelineContext {
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
