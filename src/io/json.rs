//! JSON adapters for metric histories, predictions and consolidation results.
//!
//! Predictions are read as a list of records:
//!
//! ```json
//! [{"parcel_id": "p1", "input_class": "MAIS", "pixel_count": 120,
//!   "probabilities": [{"class": "MAIS", "probability": 0.8}]}]
//! ```
//!
//! Invalid records are collected rather than failing the whole file.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{ClassLabel, ClassProbability, ClassRole, ConsolidationResult, EpochMetric, PredictionRecord};
use crate::error::{AppError, CoreError};

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawPrediction {
    parcel_id: String,
    input_class: String,
    #[serde(default)]
    too_few_pixels: bool,
    #[serde(default)]
    pixel_count: Option<u32>,
    #[serde(default)]
    probabilities: Vec<ClassProbability>,
}

/// Predictions read from disk.
#[derive(Debug, Clone, Default)]
pub struct PredictionsFile {
    pub records: Vec<PredictionRecord>,
    pub rejected: Vec<CoreError>,
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>, AppError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| AppError::new(2, format!("Failed to open {what} '{}': {e}", path.display())))
}

/// Read an epoch metric history (a JSON array, in training order).
pub fn read_metrics_json(path: &Path) -> Result<Vec<EpochMetric>, AppError> {
    let metrics: Vec<EpochMetric> = serde_json::from_reader(open(path, "metrics JSON")?)
        .map_err(|e| AppError::new(2, format!("Invalid metrics JSON '{}': {e}", path.display())))?;
    for metric in &metrics {
        metric.validate()?;
    }
    Ok(metrics)
}

/// Read prediction records.
///
/// Roles are resolved from class names; a record is flagged too-few-pixels
/// when it says so or when its `pixel_count` is below `min_nb_pixels`.
pub fn read_predictions_json(
    path: &Path,
    ignore_for_train: &[String],
    min_nb_pixels: u32,
) -> Result<PredictionsFile, AppError> {
    let raw: Vec<RawPrediction> = serde_json::from_reader(open(path, "predictions JSON")?)
        .map_err(|e| AppError::new(2, format!("Invalid predictions JSON '{}': {e}", path.display())))?;

    let mut out = PredictionsFile::default();
    for r in raw {
        let role = ClassRole::for_name(&r.input_class, ignore_for_train);
        let too_few_pixels = r.too_few_pixels || r.pixel_count.is_some_and(|n| n < min_nb_pixels);
        match PredictionRecord::new(
            r.parcel_id,
            r.probabilities,
            ClassLabel::new(r.input_class, role),
            too_few_pixels,
        ) {
            Ok(record) => out.records.push(record),
            Err(err) => out.rejected.push(err),
        }
    }
    Ok(out)
}

pub fn write_results_json(path: &Path, results: &[ConsolidationResult]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create results JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), results)
        .map_err(|e| AppError::new(2, format!("Failed to write results JSON: {e}")))
}
