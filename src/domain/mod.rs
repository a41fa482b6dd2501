//! Domain types used throughout the marker pipeline.
//!
//! This module defines:
//!
//! - the parcel/class data model (`Parcel`, `ClassLabel`, `ClassRole`, `ClassTable`)
//! - balancing and training values (`TrainingSample`, `EpochMetric`)
//! - prediction values (`PredictionRecord`, `ConsolidationResult`)
//! - mosaic periods (`Period`, `Cadence`, `WeekParity`)

pub mod types;

pub use types::*;
