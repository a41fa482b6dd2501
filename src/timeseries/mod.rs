//! Parcel time series: periodic aggregation and feature preparation.
//!
//! Responsibilities:
//!
//! - reduce per-image parcel statistics into mosaic periods
//! - derive the pixel count that drives the too-few-pixels flag
//! - clean and rescale the feature table before training

pub mod periodic;
pub mod prepare;

pub use periodic::*;
pub use prepare::*;
