// Library exports for the lead-discovery and verification pipeline core.

pub mod app;
pub mod app_config;
pub mod config;
pub mod db;
pub mod models;
pub mod schema;
pub mod services;
pub mod utils;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

// Re-export commonly used types
pub use app::{PipelineContext, ShutdownRx};
pub use app_config::{AppConfig, ConfigError};
pub use config::RateLimitingConfig;
pub use db::{DieselDatabaseConfig, DieselPool, RedisConfig, RedisPool};
pub use models::{
    CatchAllStatus, Run, RunMode, RunOptions, RunProgress, RunStatus, VerifyStatus,
};
pub use services::{
    CandidateExtractor, CatchAllDetector, FallbackVerifier, Fetcher, HeuristicExtractor,
    IcpScorer, IdempotentStore, MxResolver, NullIcpScorer, Observability, PipelineOrchestrator,
    RateLimiter, SmtpProber, WorkQueue,
};
pub use utils::PipelineError;

/// Wire every service into a ready-to-run pipeline context. Returns the
/// context plus the shutdown sender the binary flips on SIGTERM.
pub async fn initialize_pipeline_context(
    config: AppConfig,
) -> Result<(PipelineContext, watch::Sender<bool>), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing database pool...");
    let diesel_pool =
        db::create_diesel_pool(DieselDatabaseConfig::from_app_config(&config)).await?;

    info!("Initializing Redis pool...");
    let redis_pool = RedisPool::new(RedisConfig::from_app_config(&config)).await?;

    build_pipeline_context(config, diesel_pool, redis_pool)
}

/// Assemble the context from already-initialized pools. The worker binary
/// creates the pools itself so bootstrap failures map to distinct exit
/// codes.
pub fn build_pipeline_context(
    config: AppConfig,
    diesel_pool: DieselPool,
    redis_pool: RedisPool,
) -> Result<(PipelineContext, watch::Sender<bool>), Box<dyn std::error::Error + Send + Sync>> {
    let rate_settings = Arc::new(RateLimitingConfig::from_app_config(&config));
    let config = Arc::new(config);
    let store = Arc::new(IdempotentStore::new(diesel_pool.clone()));
    let queue = Arc::new(WorkQueue::new(
        diesel_pool.clone(),
        config.retry_schedule.clone(),
        config.verify_max_attempts as i32,
    ));
    let rate_limiter = Arc::new(RateLimiter::new(redis_pool.clone()));
    let fetcher = Arc::new(Fetcher::new(&config)?);
    let mx_resolver = Arc::new(MxResolver::new(&config));
    let prober = Arc::new(SmtpProber::new(&config, store.clone()));
    let catch_all = Arc::new(CatchAllDetector::new(
        &config,
        store.clone(),
        mx_resolver.clone(),
        prober.clone(),
    ));
    let fallback = FallbackVerifier::from_config(&config).map(Arc::new);
    let extractor: Arc<dyn CandidateExtractor> = Arc::new(HeuristicExtractor::new());
    let icp_scorer: Arc<dyn IcpScorer> = Arc::new(NullIcpScorer);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = PipelineContext {
        config,
        diesel_pool,
        redis_pool,
        store,
        queue,
        rate_limiter,
        rate_settings,
        fetcher,
        mx_resolver,
        catch_all,
        prober,
        fallback,
        extractor,
        icp_scorer,
        shutdown: shutdown_rx,
    };

    Ok((ctx, shutdown_tx))
}
