// Utility modules for the pipeline core

pub mod backoff;
pub mod domain;
pub mod pipeline_error;

pub use backoff::{full_jitter, schedule_delay, with_jitter, DEFAULT_RETRY_SCHEDULE, MAX_BACKOFF};
pub use domain::{
    is_freemail, normalize_domain, normalize_domain_batch, split_email, DomainError,
    FREEMAIL_DOMAINS,
};
pub use pipeline_error::PipelineError;
