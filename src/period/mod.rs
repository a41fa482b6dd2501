//! Periodic mosaic date handling.
//!
//! - snap arbitrary date ranges onto weekly/biweekly boundaries (`align`)
//! - enumerate the periods inside an aligned range

pub mod align;

pub use align::*;
