//! Reporting: formatted terminal output for runs and commands.

pub mod format;

pub use format::*;
