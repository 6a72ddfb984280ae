//! Aggregation, scoring and advice over scanner findings.

pub mod advice;
pub mod aggregate;
pub mod score;

pub use advice::{bypass_suggestions, mitigation_steps, recommendations, Advice};
pub use aggregate::{aggregate, Aggregated};
pub use score::{assess, complexity_level, security_score};
