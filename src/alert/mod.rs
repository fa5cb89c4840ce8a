//! Alert pipeline (§4.J): trigger rules plus the evaluator that applies
//! them and persists/publishes the result.

pub mod evaluator;
pub mod rules;

pub use evaluator::{AlertEvaluator, NotificationSink};
pub use rules::{default_rules, TriggerRule};
