// Centralized configuration management for the pipeline core.
// Load ALL env vars ONCE at startup; services read from the typed struct.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::backoff::DEFAULT_RETRY_SCHEDULE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_min_connections: u32,
    pub database_connect_timeout: u64,

    // Redis (rate limiter + shared caches)
    pub redis_url: String,
    pub redis_pool_size: u32,
    pub redis_retry_attempts: u32,
    pub redis_retry_delay_ms: u64,

    // Rate limiting
    pub global_max_concurrency: u32,
    pub global_rps: u32,
    pub per_mx_max_concurrency: u32,
    pub per_mx_rps: u32,

    // Fetcher
    pub fetch_default_delay_sec: f64,
    pub robots_ttl_sec: u64,
    pub robots_deny_ttl_sec: u64,
    pub fetch_cache_ttl_sec: u64,
    pub fetch_max_body_bytes: usize,
    pub fetch_user_agent: String,
    pub http_connect_timeout_sec: u64,
    pub http_read_timeout_sec: u64,
    pub http_total_timeout_sec: u64,

    // Crawl bounds
    pub crawl_max_pages_per_domain: u32,
    pub crawl_max_depth: u32,

    // SMTP identity and timeouts
    pub smtp_helo_domain: String,
    pub smtp_mail_from: String,
    pub smtp_connect_timeout_sec: u64,
    pub smtp_command_timeout_sec: u64,
    pub smtp_preflight_timeout_sec: f64,
    pub smtp_probes_enabled: bool,
    pub skip_probes_on_catchall: bool,

    // DNS
    pub dns_timeout_sec: u64,
    pub mx_cache_ttl_sec: u64,
    pub catchall_cache_ttl_sec: u64,
    pub verify_result_ttl_days: i64,

    // Retry policy
    pub verify_max_attempts: u32,
    pub retry_schedule: Vec<u64>,

    // Third-party fallback provider
    pub third_party_verify_url: Option<String>,
    pub third_party_verify_api_key: Option<String>,

    // Tenant budget
    pub hard_company_limit_24h: i64,

    // Freemail denylist additions on top of the built-in set
    pub freemail_denylist: Vec<String>,

    // Worker
    pub worker_concurrency: u32,
    pub queue_lease_sec: i64,
    pub queue_heartbeat_sec: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let get_required = |key: &str| -> Result<String, ConfigError> {
            env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
        };

        let get_or_default =
            |key: &str, default: &str| -> String { env::var(key).unwrap_or_else(|_| default.to_string()) };

        let parse_or_default = |key: &str, default: &str| -> Result<u32, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u32".to_string())
            })
        };

        let parse_u64_or_default = |key: &str, default: &str| -> Result<u64, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u64".to_string())
            })
        };

        let parse_i64_or_default = |key: &str, default: &str| -> Result<i64, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid i64".to_string())
            })
        };

        let parse_f64_or_default = |key: &str, default: &str| -> Result<f64, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid float".to_string())
            })
        };

        let parse_bool_or_default = |key: &str, default: &str| -> bool {
            matches!(
                get_or_default(key, default).to_lowercase().as_str(),
                "true" | "1" | "yes"
            )
        };

        let parse_csv = |raw: String| -> Vec<String> {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let retry_schedule: Vec<u64> = {
            let raw = get_or_default(
                "RETRY_SCHEDULE",
                &DEFAULT_RETRY_SCHEDULE
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            );
            let mut out = Vec::new();
            for tok in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                out.push(tok.parse().map_err(|_| {
                    ConfigError::InvalidValue(
                        "RETRY_SCHEDULE".to_string(),
                        format!("not a CSV of seconds: {raw:?}"),
                    )
                })?);
            }
            out
        };

        let smtp_helo_domain = get_or_default("SMTP_HELO_DOMAIN", "localhost");
        let smtp_mail_from = get_or_default(
            "SMTP_MAIL_FROM",
            &format!("bounce@{}", smtp_helo_domain),
        );

        let config = Self {
            database_url: get_required("DATABASE_URL")?,
            database_max_connections: parse_or_default("DATABASE_MAX_CONNECTIONS", "20")?,
            database_min_connections: parse_or_default("DATABASE_MIN_CONNECTIONS", "2")?,
            database_connect_timeout: parse_u64_or_default("DATABASE_CONNECT_TIMEOUT", "30")?,

            redis_url: get_or_default("REDIS_URL", "redis://127.0.0.1:6379"),
            redis_pool_size: parse_or_default("REDIS_POOL_SIZE", "16")?,
            redis_retry_attempts: parse_or_default("REDIS_RETRY_ATTEMPTS", "3")?,
            redis_retry_delay_ms: parse_u64_or_default("REDIS_RETRY_DELAY_MS", "100")?,

            global_max_concurrency: parse_or_default("GLOBAL_MAX_CONCURRENCY", "12")?,
            global_rps: parse_or_default("GLOBAL_RPS", "6")?,
            per_mx_max_concurrency: parse_or_default("PER_MX_MAX_CONCURRENCY", "2")?,
            per_mx_rps: parse_or_default("PER_MX_RPS", "1")?,

            fetch_default_delay_sec: parse_f64_or_default("FETCH_DEFAULT_DELAY_SEC", "3.0")?,
            robots_ttl_sec: parse_u64_or_default("ROBOTS_TTL_SEC", "3600")?,
            robots_deny_ttl_sec: parse_u64_or_default("ROBOTS_DENY_TTL_SEC", "300")?,
            fetch_cache_ttl_sec: parse_u64_or_default("FETCH_CACHE_TTL_SEC", "900")?,
            fetch_max_body_bytes: parse_u64_or_default("FETCH_MAX_BODY_BYTES", "2097152")? as usize,
            fetch_user_agent: get_or_default("FETCH_USER_AGENT", "leadpipe-bot/1.0"),
            http_connect_timeout_sec: parse_u64_or_default("HTTP_CONNECT_TIMEOUT_SEC", "5")?,
            http_read_timeout_sec: parse_u64_or_default("HTTP_READ_TIMEOUT_SEC", "15")?,
            http_total_timeout_sec: parse_u64_or_default("HTTP_TOTAL_TIMEOUT_SEC", "30")?,

            crawl_max_pages_per_domain: parse_or_default("CRAWL_MAX_PAGES_PER_DOMAIN", "25")?,
            crawl_max_depth: parse_or_default("CRAWL_MAX_DEPTH", "2")?,

            smtp_helo_domain,
            smtp_mail_from,
            smtp_connect_timeout_sec: parse_u64_or_default("SMTP_CONNECT_TIMEOUT_SEC", "10")?,
            smtp_command_timeout_sec: parse_u64_or_default("SMTP_COMMAND_TIMEOUT_SEC", "15")?,
            smtp_preflight_timeout_sec: parse_f64_or_default("SMTP_PREFLIGHT_TIMEOUT_SEC", "1.5")?,
            smtp_probes_enabled: parse_bool_or_default("SMTP_PROBES_ENABLED", "false"),
            skip_probes_on_catchall: parse_bool_or_default("SKIP_PROBES_ON_CATCHALL", "false"),

            dns_timeout_sec: parse_u64_or_default("DNS_TIMEOUT_SEC", "2")?,
            mx_cache_ttl_sec: parse_u64_or_default("MX_CACHE_TTL_SEC", "86400")?,
            catchall_cache_ttl_sec: parse_u64_or_default("CATCHALL_CACHE_TTL_SEC", "604800")?,
            verify_result_ttl_days: parse_i64_or_default("VERIFY_RESULT_TTL_DAYS", "90")?,

            verify_max_attempts: parse_or_default("VERIFY_MAX_ATTEMPTS", "5")?,
            retry_schedule,

            third_party_verify_url: env::var("THIRD_PARTY_VERIFY_URL").ok().filter(|s| !s.is_empty()),
            third_party_verify_api_key: env::var("THIRD_PARTY_VERIFY_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),

            hard_company_limit_24h: parse_i64_or_default("HARD_COMPANY_LIMIT_24H", "1000")?,

            freemail_denylist: parse_csv(get_or_default("FREEMAIL_DENYLIST", "")),

            worker_concurrency: parse_or_default("WORKER_CONCURRENCY", "4")?,
            queue_lease_sec: parse_i64_or_default("QUEUE_LEASE_SEC", "300")?,
            queue_heartbeat_sec: parse_u64_or_default("QUEUE_HEARTBEAT_SEC", "60")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.global_max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "GLOBAL_MAX_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.per_mx_max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "PER_MX_MAX_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.smtp_probes_enabled && self.smtp_helo_domain == "localhost" {
            return Err(ConfigError::InvalidValue(
                "SMTP_HELO_DOMAIN".to_string(),
                "a real HELO identity is required when SMTP probes are enabled".to_string(),
            ));
        }
        if self.retry_schedule.is_empty() {
            return Err(ConfigError::InvalidValue(
                "RETRY_SCHEDULE".to_string(),
                "must contain at least one entry".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-global, so these tests build configs from
    // struct literals instead of round-tripping through set_var.

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "postgresql://localhost/leadpipe".into(),
            database_max_connections: 20,
            database_min_connections: 2,
            database_connect_timeout: 30,
            redis_url: "redis://127.0.0.1:6379".into(),
            redis_pool_size: 16,
            redis_retry_attempts: 3,
            redis_retry_delay_ms: 100,
            global_max_concurrency: 12,
            global_rps: 6,
            per_mx_max_concurrency: 2,
            per_mx_rps: 1,
            fetch_default_delay_sec: 3.0,
            robots_ttl_sec: 3600,
            robots_deny_ttl_sec: 300,
            fetch_cache_ttl_sec: 900,
            fetch_max_body_bytes: 2 * 1024 * 1024,
            fetch_user_agent: "leadpipe-bot/1.0".into(),
            http_connect_timeout_sec: 5,
            http_read_timeout_sec: 15,
            http_total_timeout_sec: 30,
            crawl_max_pages_per_domain: 25,
            crawl_max_depth: 2,
            smtp_helo_domain: "verifier.example.com".into(),
            smtp_mail_from: "bounce@verifier.example.com".into(),
            smtp_connect_timeout_sec: 10,
            smtp_command_timeout_sec: 15,
            smtp_preflight_timeout_sec: 1.5,
            smtp_probes_enabled: true,
            skip_probes_on_catchall: false,
            dns_timeout_sec: 2,
            mx_cache_ttl_sec: 86_400,
            catchall_cache_ttl_sec: 604_800,
            verify_result_ttl_days: 90,
            verify_max_attempts: 5,
            retry_schedule: vec![5, 15, 45, 90, 180],
            third_party_verify_url: None,
            third_party_verify_api_key: None,
            hard_company_limit_24h: 1000,
            freemail_denylist: vec![],
            worker_concurrency: 4,
            queue_lease_sec: 300,
            queue_heartbeat_sec: 60,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut cfg = base_config();
        cfg.global_max_concurrency = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_probes_require_real_helo() {
        let mut cfg = base_config();
        cfg.smtp_helo_domain = "localhost".into();
        assert!(cfg.validate().is_err());

        cfg.smtp_probes_enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_retry_schedule_rejected() {
        let mut cfg = base_config();
        cfg.retry_schedule = vec![];
        assert!(cfg.validate().is_err());
    }
}
