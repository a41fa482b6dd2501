//! Model training seam and best-epoch selection.
//!
//! Responsibilities:
//!
//! - the `Classifier` / `TrainedModel` capability the pipeline trains through
//! - best-epoch selection over per-epoch losses, with fallback
//! - a small reference classifier for end-to-end runs

pub mod model;
pub mod reference;
pub mod selection;

pub use model::*;
pub use reference::*;
pub use selection::*;
