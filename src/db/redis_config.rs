use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_config::AppConfig;

/// Redis connection configuration for the shared-KV side of the pipeline
/// (rate-limiter semaphores, token buckets, robots/fetch caches).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub redis_url: String,
    pub pool_size: u32,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl RedisConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            redis_url: config.redis_url.clone(),
            pool_size: config.redis_pool_size,
            retry_attempts: config.redis_retry_attempts,
            retry_delay: Duration::from_millis(config.redis_retry_delay_ms),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.redis_url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("Pool size must be greater than 0".to_string());
        }
        if self.pool_size > 1000 {
            return Err("Pool size too large (max: 1000)".to_string());
        }
        Ok(())
    }
}
