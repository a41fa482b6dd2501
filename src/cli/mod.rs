//! Command-line parsing for the `marker` binary.
//!
//! Parsing stays here; `app` turns the parsed command into a run.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::config::DateSpec;
use crate::domain::Cadence;
use crate::train::BestModelStrategy;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "marker", version, about = "Crop classification marker core")]
pub struct Cli {
    /// TOML config file; repeat to layer several (later files win).
    #[arg(long = "config", value_name = "TOML", global = true)]
    pub config: Vec<PathBuf>,

    /// Overrule a config setting, e.g. `--set marker.roi_name=flanders`.
    #[arg(long = "set", value_name = "SECTION.KEY=VALUE", global = true)]
    pub set: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Snap a date range onto period boundaries and list its periods.
    Align(AlignArgs),
    /// Pick the best epoch from a metric history.
    Select(SelectArgs),
    /// Consolidate prediction records into final statuses.
    Consolidate(ConsolidateArgs),
    /// Run the full marker pipeline on seeded synthetic parcels.
    Demo(DemoArgs),
}

#[derive(Debug, Args, Clone)]
pub struct AlignArgs {
    /// Start date (YYYY-MM-DD); defaults to `period.start_date`.
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD or `now`); defaults to `period.end_date`.
    #[arg(long)]
    pub end: Option<DateSpec>,

    #[arg(long, value_enum)]
    pub cadence: Option<Cadence>,

    /// Days removed from the end date before snapping.
    #[arg(long)]
    pub subtract_days: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct SelectArgs {
    /// JSON array of `{epoch, train_loss, val_loss}`.
    #[arg(long, value_name = "JSON")]
    pub metrics: PathBuf,

    #[arg(long, value_enum)]
    pub strategy: Option<BestModelStrategy>,
}

#[derive(Debug, Args, Clone)]
pub struct ConsolidateArgs {
    /// JSON array of prediction records.
    #[arg(long, value_name = "JSON")]
    pub predictions: PathBuf,

    /// Write consolidation results as JSON.
    #[arg(long, value_name = "JSON")]
    pub out: Option<PathBuf>,

    /// Export per-parcel results to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Number of synthetic parcels.
    #[arg(short = 'n', long, default_value_t = 2_000)]
    pub parcels: usize,

    /// Features per parcel.
    #[arg(long, default_value_t = 8)]
    pub features: usize,

    /// Export per-parcel results to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}
