// Pipeline worker binary: bootstrap configuration, storage, and the queue
// consumers. Fatal bootstrap errors use distinct exit codes so process
// supervisors can tell misconfiguration from unreachable dependencies.

use anyhow::Context;
use diesel::{Connection, PgConnection};
use diesel_migrations::MigrationHarness;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadpipe_backend_core::db::{
    create_diesel_pool, mask_connection_string, DieselDatabaseConfig, RedisConfig, RedisPool,
    MIGRATIONS,
};
use leadpipe_backend_core::services::run_worker_pool;
use leadpipe_backend_core::{build_pipeline_context, AppConfig};

/// Bootstrap exit codes: invalid config, database unreachable, queue
/// (Redis) unreachable.
const EXIT_CONFIG: i32 = 2;
const EXIT_DATABASE: i32 = 3;
const EXIT_QUEUE: i32 = 4;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadpipe_backend_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenv::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    info!(
        "Starting pipeline worker (db: {})",
        mask_connection_string(&config.database_url)
    );

    if should_run_migrations() {
        if let Err(e) = run_migrations(&config.database_url).await {
            error!("Migrations failed: {}", e);
            std::process::exit(EXIT_DATABASE);
        }
    }

    let diesel_pool = match create_diesel_pool(DieselDatabaseConfig::from_app_config(&config)).await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!("Database initialization failed: {}", e);
            std::process::exit(EXIT_DATABASE);
        }
    };

    let redis_pool = match RedisPool::new(RedisConfig::from_app_config(&config)).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Redis initialization failed: {}", e);
            std::process::exit(EXIT_QUEUE);
        }
    };

    let (ctx, shutdown_tx) = match build_pipeline_context(config, diesel_pool, redis_pool) {
        Ok(built) => built,
        Err(e) => {
            error!("Context initialization failed: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    // Flip the shutdown signal on ctrl-c / SIGTERM; workers drain and exit
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, draining workers");
            let _ = shutdown_tx.send(true);
        }
    });

    run_worker_pool(ctx).await;
    info!("Pipeline worker exited cleanly");
}

fn should_run_migrations() -> bool {
    std::env::var("RUN_MIGRATIONS")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(true)
}

/// Embedded migrations run on a dedicated sync connection; the harness is
/// synchronous, so it stays off the async pool.
async fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    let url = database_url.to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut conn =
            PgConnection::establish(&url).context("connecting for embedded migrations")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!(e))
            .context("applying embedded migrations")?;
        Ok(())
    })
    .await
    .context("migration task join")??;
    info!("Embedded migrations applied");
    Ok(())
}
