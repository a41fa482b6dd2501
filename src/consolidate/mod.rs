//! Prediction consolidation and doubt classification.
//!
//! Responsibilities:
//!
//! - turn ranked class probabilities into a final status per parcel
//! - apply the configured doubt thresholds and combination policy
//! - summarize statuses over a run

pub mod consolidator;
pub mod policy;

pub use consolidator::*;
pub use policy::*;
