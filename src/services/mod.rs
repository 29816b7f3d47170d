// Pipeline services

pub mod catch_all;
pub mod classifier;
pub mod crawler;
pub mod extractor;
pub mod fallback;
pub mod fetcher;
pub mod mx;
pub mod observability;
pub mod orchestrator;
pub mod permuter;
pub mod queue;
pub mod rate_limit;
pub mod scoring;
pub mod smtp;
pub mod store;
pub mod worker;

pub use catch_all::{CatchAllDetector, CatchAllOutcome};
pub use classifier::{classify, ClassifierPolicy, SmtpSignal, VerificationSignals, Verdict};
pub use extractor::{Candidate, CandidateExtractor, ExtractionHints, HeuristicExtractor};
pub use fallback::{FallbackResult, FallbackVerifier};
pub use fetcher::{FetchReason, FetchResult, Fetcher};
pub use mx::{BehaviorHint, BehaviorSink, MxResolution, MxResolver, NullBehaviorSink};
pub use observability::{Observability, RunMetrics};
pub use orchestrator::{PipelineOrchestrator, StartSummary};
pub use queue::{EnqueueOptions, QueueDepth, WorkQueue};
pub use rate_limit::{RateLease, RateLimiter, RateScope, ScopeLimits};
pub use scoring::{IcpScorer, IcpSignals, NullIcpScorer};
pub use smtp::{PreflightResult, ProbeOutcome, SmtpIdentity, SmtpProber};
pub use store::{EmailUpsert, IdempotentStore, PersonUpsert};
pub use worker::{run_worker_pool, Worker};
