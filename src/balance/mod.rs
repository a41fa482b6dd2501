//! Training-set balancing.
//!
//! Responsibilities:
//!
//! - split each class into train-eligible and validation samples (seeded)
//! - apply the per-class cap/floor of the chosen strategy
//! - duplicate samples where a floor or target is not met

pub mod balancer;
pub mod strategy;

pub use balancer::*;
pub use strategy::*;
