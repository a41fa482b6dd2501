//! `crop-markers` library crate.
//!
//! The binary (`marker`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the stages (alignment, balancing, selection, consolidation) are usable on their own
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod balance;
pub mod cli;
pub mod config;
pub mod consolidate;
pub mod data;
pub mod domain;
pub mod error;
pub mod io;
pub mod logging;
pub mod period;
pub mod report;
pub mod timeseries;
pub mod train;
