//! Warmup pipeline (§4.D–G): trust assessment, candle-status scanning,
//! schedule building, and the orchestrating service that ties them
//! together on boot and on demand.

pub mod scanner;
pub mod schedule;
pub mod service;
pub mod trust;

pub use service::SmartWarmupService;
pub use trust::{CacheTrustAssessor, TrustDecision};
