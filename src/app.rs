//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - layers the run configuration
//! - starts logging
//! - dispatches to the command handlers

use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::{info, warn};

use crate::cli::{AlignArgs, Cli, Command, ConsolidateArgs, DemoArgs, SelectArgs};
use crate::config::MarkerConfig;
use crate::consolidate::{ConsolidationSummary, consolidate_all};
use crate::data::{SyntheticSpec, feature_table, generate_parcels};
use crate::error::AppError;
use crate::period::PeriodAligner;
use crate::train::{SoftmaxRegression, select_best};

pub mod pipeline;

/// Entry point for the `marker` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = MarkerConfig::load_over(&base_config(&cli.command), &cli.config, &cli.set)?;
    crate::logging::init(&config.general.log_level).map_err(|e| AppError::new(2, e.to_string()))?;

    match cli.command {
        Command::Align(args) => handle_align(&config, args),
        Command::Select(args) => handle_select(&config, args),
        Command::Consolidate(args) => handle_consolidate(&config, args),
        Command::Demo(args) => handle_demo(&config, args),
    }
}

/// Defaults per command.
///
/// Only `consolidate` writes a marker for a real region, so it is the one
/// command that must be told its `marker.roi_name`.
fn base_config(command: &Command) -> MarkerConfig {
    let mut base = MarkerConfig::default();
    match command {
        Command::Demo(_) => base.marker.roi_name = "demo".to_string(),
        Command::Align(_) | Command::Select(_) => base.marker.roi_name = "adhoc".to_string(),
        Command::Consolidate(_) => {}
    }
    base
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

fn handle_align(config: &MarkerConfig, args: AlignArgs) -> Result<(), AppError> {
    let start = args
        .start
        .or(config.period.start_date)
        .ok_or_else(|| AppError::new(2, "No start date: pass --start or set period.start_date"))?;
    let end = args
        .end
        .or(config.period.end_date)
        .ok_or_else(|| AppError::new(2, "No end date: pass --end or set period.end_date"))?
        .resolve(today());
    let cadence = args.cadence.unwrap_or(config.period.cadence);
    let subtract_days = args.subtract_days.unwrap_or(config.period.end_date_subtract_days);

    let aligner = PeriodAligner::new(cadence, config.week_parity())?;
    let (aligned_start, aligned_end) = aligner.align(start, end, subtract_days)?;
    let periods = aligner.enumerate_periods(aligned_start, aligned_end)?;

    println!(
        "{}",
        crate::report::format_alignment(cadence, (start, end), (aligned_start, aligned_end), &periods)
    );
    Ok(())
}

fn handle_select(config: &MarkerConfig, args: SelectArgs) -> Result<(), AppError> {
    let metrics = crate::io::read_metrics_json(&args.metrics)?;
    let strategy = args.strategy.unwrap_or(config.classifier.best_model_strategy);
    let selection = select_best(&metrics, strategy)?;
    println!("{}", crate::report::format_selection(&selection));
    Ok(())
}

fn handle_consolidate(config: &MarkerConfig, args: ConsolidateArgs) -> Result<(), AppError> {
    let file = crate::io::read_predictions_json(
        &args.predictions,
        &config.marker.ignore_for_train_classes,
        config.marker.min_nb_pixels,
    )?;
    for err in &file.rejected {
        warn!(error = %err, "prediction record rejected");
    }
    info!(
        roi = %config.marker.roi_name,
        records = file.records.len(),
        rejected = file.rejected.len(),
        "consolidating predictions"
    );

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.worker_threads())
        .build()
        .map_err(|e| AppError::new(4, format!("Failed to start worker pool: {e}")))?;
    let results = consolidate_all(&file.records, &config.doubt_thresholds(), &pool);
    let summary = ConsolidationSummary::from_results(&results, &file.records);

    println!("{}", crate::report::format_consolidation_summary(&summary));
    if !file.rejected.is_empty() {
        println!("Rejected records: {}", file.rejected.len());
    }

    if let Some(path) = &args.out {
        crate::io::write_results_json(path, &results)?;
    }
    if let Some(path) = &args.export {
        crate::io::write_results_csv(path, &results, Some(&file.records))?;
    }
    Ok(())
}

fn handle_demo(config: &MarkerConfig, args: DemoArgs) -> Result<(), AppError> {
    let spec = SyntheticSpec {
        parcels: args.parcels,
        n_features: args.features,
        min_nb_pixels: config.marker.min_nb_pixels,
        seed: config.general.seed,
        ..SyntheticSpec::default()
    };
    let data = generate_parcels(&spec, &config.marker.ignore_for_train_classes)?;

    let prepared = crate::timeseries::prepare(&feature_table(&data.parcels), &config.prepare_options())?;
    let (parcels, _missing) = pipeline::attach_features(data.parcels, &prepared);

    let classifier = SoftmaxRegression {
        epochs: config.classifier.epochs,
        learning_rate: config.classifier.learning_rate,
        ..SoftmaxRegression::default()
    };
    let report = pipeline::MarkerPipeline::new(config, classifier)?.run(&parcels)?;

    println!("{}", crate::report::format_run_report(&report));
    if let Some(path) = &args.export {
        crate::io::write_results_csv(path, &report.results, Some(&report.records))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{AlignArgs, ConsolidateArgs};

    #[test]
    fn consolidate_requires_a_roi_name() {
        let command = Command::Consolidate(ConsolidateArgs {
            predictions: "p.json".into(),
            out: None,
            export: None,
        });
        let err = MarkerConfig::load_over(&base_config(&command), &[], &[]).unwrap_err();
        assert_eq!(AppError::from(err).exit_code(), 2);

        let command = Command::Align(AlignArgs {
            start: None,
            end: None,
            cadence: None,
            subtract_days: None,
        });
        let config = MarkerConfig::load_over(&base_config(&command), &[], &[]).unwrap();
        assert_eq!(config.marker.roi_name, "adhoc");
    }

    #[test]
    fn align_without_dates_is_a_usage_error() {
        let config = MarkerConfig::load(&[], &["marker.roi_name=x".to_string()]).unwrap();
        let args = AlignArgs {
            start: None,
            end: None,
            cadence: None,
            subtract_days: None,
        };
        assert_eq!(handle_align(&config, args).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn inverted_range_exits_as_invalid_input() {
        let config = MarkerConfig::load(&[], &["marker.roi_name=x".to_string()]).unwrap();
        let args = AlignArgs {
            start: chrono::NaiveDate::from_ymd_opt(2024, 3, 10),
            end: Some(crate::config::DateSpec::Date(
                chrono::NaiveDate::from_ymd_opt(2024, 3, 12).unwrap_or_default(),
            )),
            cadence: None,
            subtract_days: None,
        };
        assert_eq!(handle_align(&config, args).unwrap_err().exit_code(), 3);
    }
}
