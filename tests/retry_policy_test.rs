// Retry schedule and error-kind policy through the public API.

use std::time::Duration;

use leadpipe_backend_core::utils::backoff::{
    full_jitter, schedule_delay, DEFAULT_RETRY_SCHEDULE, MAX_BACKOFF,
};
use leadpipe_backend_core::PipelineError;

#[test]
fn default_schedule_matches_contract() {
    assert_eq!(DEFAULT_RETRY_SCHEDULE, [5, 15, 45, 90, 180]);
    let delays: Vec<u64> = (0..5)
        .map(|a| schedule_delay(&DEFAULT_RETRY_SCHEDULE, a).as_secs())
        .collect();
    assert_eq!(delays, vec![5, 15, 45, 90, 180]);
}

#[test]
fn schedule_saturates_at_last_entry() {
    for attempt in 5..100 {
        assert_eq!(
            schedule_delay(&DEFAULT_RETRY_SCHEDULE, attempt),
            Duration::from_secs(180)
        );
    }
}

#[test]
fn backoff_never_exceeds_24h() {
    for attempt in 0..64 {
        let d = full_jitter(Duration::from_secs(3600), attempt, MAX_BACKOFF);
        assert!(d <= MAX_BACKOFF);
    }
}

#[test]
fn retryable_kinds() {
    // Retry: throttling and transient conditions
    assert!(PipelineError::RateLimited("global".into()).retryable());
    assert!(PipelineError::TransientNetwork("reset".into()).retryable());
    assert!(PipelineError::WafBlocked("403".into()).retryable());
    assert!(PipelineError::SmtpTempFail("451".into()).retryable());
    assert!(PipelineError::Internal("panic".into()).retryable());

    // Terminal: verdict-bearing or must-not-repeat conditions
    assert!(!PipelineError::RobotsBlocked("/team".into()).retryable());
    assert!(!PipelineError::SmtpHardFail("550".into()).retryable());
    assert!(!PipelineError::Tcp25Blocked("mx".into()).retryable());
    assert!(!PipelineError::NoMx("x.test".into()).retryable());
    assert!(!PipelineError::BudgetExceeded("1000".into()).retryable());
    assert!(!PipelineError::Validation("bad domain".into()).retryable());
}

#[test]
fn error_kinds_are_stable_codes() {
    assert_eq!(PipelineError::RateLimited("x".into()).kind(), "rate_limited");
    assert_eq!(PipelineError::SmtpHardFail("x".into()).kind(), "smtp_hard_fail");
    assert_eq!(PipelineError::NoMx("x".into()).kind(), "no_mx");
    assert_eq!(
        PipelineError::BudgetExceeded("x".into()).kind(),
        "budget_exceeded"
    );
}
