// Pipeline-wide error taxonomy. Every kind maps to a retry policy; handlers
// convert service-level errors into these before deciding job disposition.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Blocked by robots.txt: {0}")]
    RobotsBlocked(String),

    #[error("Blocked by WAF: {0}")]
    WafBlocked(String),

    #[error("SMTP temporary failure: {0}")]
    SmtpTempFail(String),

    #[error("SMTP permanent failure: {0}")]
    SmtpHardFail(String),

    #[error("Port 25 unreachable: {0}")]
    Tcp25Blocked(String),

    #[error("No MX or A records for {0}")]
    NoMx(String),

    #[error("24h company budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether the failed job should be re-enqueued with backoff. Terminal
    /// kinds either resolve to a verdict (hard fail, no MX) or must never be
    /// repeated (robots, validation, budget).
    pub fn retryable(&self) -> bool {
        match self {
            PipelineError::RateLimited(_)
            | PipelineError::TransientNetwork(_)
            | PipelineError::WafBlocked(_)
            | PipelineError::SmtpTempFail(_)
            | PipelineError::Database(_)
            | PipelineError::Internal(_) => true,
            PipelineError::RobotsBlocked(_)
            | PipelineError::SmtpHardFail(_)
            | PipelineError::Tcp25Blocked(_)
            | PipelineError::NoMx(_)
            | PipelineError::BudgetExceeded(_)
            | PipelineError::Validation(_) => false,
        }
    }

    /// Short machine-readable kind used in job records and run errors.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::RateLimited(_) => "rate_limited",
            PipelineError::TransientNetwork(_) => "transient_network",
            PipelineError::RobotsBlocked(_) => "robots_blocked",
            PipelineError::WafBlocked(_) => "waf_blocked",
            PipelineError::SmtpTempFail(_) => "smtp_temp_fail",
            PipelineError::SmtpHardFail(_) => "smtp_hard_fail",
            PipelineError::Tcp25Blocked(_) => "tcp25_blocked",
            PipelineError::NoMx(_) => "no_mx",
            PipelineError::BudgetExceeded(_) => "budget_exceeded",
            PipelineError::Validation(_) => "validation",
            PipelineError::Database(_) => "database",
            PipelineError::Internal(_) => "internal",
        }
    }
}

impl From<diesel::result::Error> for PipelineError {
    fn from(error: diesel::result::Error) -> Self {
        PipelineError::Database(error.to_string())
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(error: redis::RedisError) -> Self {
        PipelineError::TransientNetwork(error.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::Validation(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_per_kind() {
        assert!(PipelineError::RateLimited("cap".into()).retryable());
        assert!(PipelineError::TransientNetwork("reset".into()).retryable());
        assert!(PipelineError::SmtpTempFail("451".into()).retryable());
        assert!(PipelineError::WafBlocked("429".into()).retryable());

        assert!(!PipelineError::RobotsBlocked("/team".into()).retryable());
        assert!(!PipelineError::SmtpHardFail("550".into()).retryable());
        assert!(!PipelineError::NoMx("x.test".into()).retryable());
        assert!(!PipelineError::BudgetExceeded("cap".into()).retryable());
        assert!(!PipelineError::Validation("bad".into()).retryable());
    }
}
