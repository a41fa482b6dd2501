//! Input data sources.
//!
//! - seeded synthetic parcels for demos and end-to-end tests

pub mod synthetic;

pub use synthetic::*;
