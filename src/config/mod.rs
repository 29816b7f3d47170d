// Configuration modules for the pipeline core

pub mod rate_limit;

pub use rate_limit::{RateLimitingConfig, ScopeSettings};
