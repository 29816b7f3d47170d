// Layered rate-limit settings resolved once from AppConfig.

use serde::{Deserialize, Serialize};

use crate::app_config::AppConfig;
use crate::services::rate_limit::ScopeLimits;

/// The three scope layers the limiter enforces simultaneously. The fourth
/// layer (the tenant 24h company budget) is enforced by the orchestrator at
/// run start with the same configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    pub global: ScopeSettings,
    pub per_mx: ScopeSettings,
    pub per_domain: ScopeSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScopeSettings {
    pub max_concurrency: u32,
    pub rps: u32,
}

impl ScopeSettings {
    pub fn limits(&self) -> ScopeLimits {
        ScopeLimits {
            max_concurrency: self.max_concurrency,
            rps: self.rps,
        }
    }
}

impl RateLimitingConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            global: ScopeSettings {
                max_concurrency: config.global_max_concurrency,
                rps: config.global_rps,
            },
            per_mx: ScopeSettings {
                max_concurrency: config.per_mx_max_concurrency,
                rps: config.per_mx_rps,
            },
            // One crawl conversation per domain; pacing within it comes
            // from robots crawl-delay, not the bucket
            per_domain: ScopeSettings {
                max_concurrency: 1,
                rps: 0,
            },
        }
    }
}
