// Database models for the pipeline core

pub mod company;
pub mod job;
pub mod person;
pub mod resolution;
pub mod run;
pub mod suppression;
pub mod verification;

pub use company::{Company, CompanyAttrs, NewSource, Source};
pub use job::{
    DomainStagePayload, JobRecord, JobStatus, NewJob, ProbeEmailPayload, StagePayload,
    QUEUE_CRAWL, QUEUE_GENERATE, QUEUE_VERIFY,
};
pub use person::{Email, Person};
pub use resolution::{CatchAllStatus, DomainResolution, MxBehavior, NewDomainResolution};
pub use run::{NewRun, Run, RunMode, RunOptions, RunProgress, RunStatus};
pub use suppression::{NewSuppression, Suppression};
pub use verification::{
    FallbackStatus, NewVerificationResult, SmtpCategory, VerificationResult, VerifyStatus,
};
