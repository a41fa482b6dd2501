//! Input/output helpers.
//!
//! - metric, prediction and result JSON (`json`)
//! - result exports to CSV (`export`)

pub mod export;
pub mod json;

pub use export::*;
pub use json::*;
