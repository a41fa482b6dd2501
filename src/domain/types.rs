//! Shared domain types.
//!
//! These are value objects created and consumed within a single marker run:
//!
//! - parcels, class labels and the class reference table
//! - training samples produced by the balancer
//! - epoch metrics consumed by best-epoch selection
//! - prediction records and their consolidation results
//! - mosaic periods

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Numerical tolerance on the sum of a parcel's class probabilities.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-6;

/// Periodic granularity used to align mosaic date ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Weekly,
    Biweekly,
}

impl Cadence {
    /// Nominal period length in days.
    pub fn nominal_days(self) -> i64 {
        match self {
            Cadence::Weekly => 7,
            Cadence::Biweekly => 14,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Cadence::Weekly => "weekly",
            Cadence::Biweekly => "biweekly",
        }
    }
}

/// Which Mondays count as "even" for biweekly alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekParity {
    /// The Monday's ISO week number is even.
    #[default]
    IsoWeek,
    /// The number of whole weeks since the given epoch Monday is even.
    Epoch(NaiveDate),
}

/// A mosaic period: `[start, end)` on aligned boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub cadence: Cadence,
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Short label used in column and file names.
    pub fn label(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }
}

/// Policy meaning attached to a class label at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassRole {
    /// Used for training and validation.
    Trainable,
    /// Excluded from training and validation altogether.
    IgnoredAlways,
    /// Excluded from training, kept for validation so it still gets a prediction.
    IgnoredForTrainOnly,
}

impl ClassRole {
    /// Resolve the role of a class name.
    ///
    /// Names starting with `IGNORE` are always ignored; names listed in
    /// `ignore_for_train` are only kept out of the training set.
    pub fn for_name(name: &str, ignore_for_train: &[String]) -> Self {
        if name.starts_with("IGNORE") {
            ClassRole::IgnoredAlways
        } else if ignore_for_train.iter().any(|c| c == name) {
            ClassRole::IgnoredForTrainOnly
        } else {
            ClassRole::Trainable
        }
    }
}

/// A classification label with its resolved role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassLabel {
    pub name: String,
    pub role: ClassRole,
}

impl ClassLabel {
    pub fn new(name: impl Into<String>, role: ClassRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn trainable(name: impl Into<String>) -> Self {
        Self::new(name, ClassRole::Trainable)
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Class reference table: raw crop code -> class label.
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    by_code: HashMap<String, ClassLabel>,
}

impl ClassTable {
    /// Build the table from `(crop code, class name)` pairs.
    pub fn from_codes<I, C, N>(codes: I, ignore_for_train: &[String]) -> Self
    where
        I: IntoIterator<Item = (C, N)>,
        C: Into<String>,
        N: Into<String>,
    {
        let by_code = codes
            .into_iter()
            .map(|(code, name)| {
                let name = name.into();
                let role = ClassRole::for_name(&name, ignore_for_train);
                (code.into(), ClassLabel::new(name, role))
            })
            .collect();
        Self { by_code }
    }

    pub fn lookup(&self, crop_code: &str) -> Option<&ClassLabel> {
        self.by_code.get(crop_code)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

/// An agricultural parcel as handed to the core.
#[derive(Debug, Clone)]
pub struct Parcel {
    pub id: String,
    /// Opaque geometry handle; never interpreted by the core.
    pub geometry_ref: Option<String>,
    pub declared_crop: String,
    /// Present only for spot-checked parcels.
    pub verified_crop: Option<String>,
    pub class: ClassLabel,
    pub pixel_count: u32,
    pub features: Vec<f64>,
}

impl Parcel {
    pub fn too_few_pixels(&self, min_nb_pixels: u32) -> bool {
        self.pixel_count < min_nb_pixels
    }
}

/// A sample selected for training or validation.
///
/// Duplicates are independent clones (`copy_index > 0`), never aliases.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub parcel_id: String,
    pub class: ClassLabel,
    pub features: Vec<f64>,
    pub weight: f64,
    pub copy_index: u32,
}

impl TrainingSample {
    pub fn from_parcel(parcel: &Parcel) -> Self {
        Self {
            parcel_id: parcel.id.clone(),
            class: parcel.class.clone(),
            features: parcel.features.clone(),
            weight: 1.0,
            copy_index: 0,
        }
    }

    pub fn duplicate(&self, copy_index: u32) -> Self {
        Self {
            copy_index,
            ..self.clone()
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.copy_index > 0
    }
}

/// Loss values reported for one training epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetric {
    pub epoch: usize,
    pub train_loss: f64,
    /// `None` (or a non-finite value) means the validation loss is undefined.
    pub val_loss: Option<f64>,
}

impl EpochMetric {
    pub fn new(epoch: usize, train_loss: f64, val_loss: Option<f64>) -> Result<Self> {
        let metric = Self {
            epoch,
            train_loss,
            val_loss,
        };
        metric.validate()?;
        Ok(metric)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.train_loss.is_finite() && self.train_loss >= 0.0) {
            return Err(CoreError::InvalidMetric {
                epoch: self.epoch,
                reason: format!("train_loss must be finite and >= 0, got {}", self.train_loss),
            });
        }
        if let Some(v) = self.val_loss {
            if v.is_finite() && v < 0.0 {
                return Err(CoreError::InvalidMetric {
                    epoch: self.epoch,
                    reason: format!("val_loss must be >= 0, got {v}"),
                });
            }
        }
        Ok(())
    }

    /// The validation loss if it is defined.
    pub fn defined_val_loss(&self) -> Option<f64> {
        self.val_loss.filter(|v| v.is_finite())
    }
}

/// One `(class, probability)` entry of a model prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub class: String,
    pub probability: f64,
}

impl ClassProbability {
    pub fn new(class: impl Into<String>, probability: f64) -> Self {
        Self {
            class: class.into(),
            probability,
        }
    }
}

/// Ranked model output for one parcel.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    parcel_id: String,
    ranked: Vec<ClassProbability>,
    input_class: ClassLabel,
    too_few_pixels: bool,
}

impl PredictionRecord {
    /// Validate and rank probabilities (descending, stable on ties).
    pub fn new(
        parcel_id: impl Into<String>,
        mut probabilities: Vec<ClassProbability>,
        input_class: ClassLabel,
        too_few_pixels: bool,
    ) -> Result<Self> {
        let parcel_id = parcel_id.into();
        let invalid = |reason: String| CoreError::InvalidPrediction {
            parcel_id: parcel_id.clone(),
            reason,
        };

        let mut sum = 0.0;
        for p in &probabilities {
            if !(p.probability.is_finite() && (0.0..=1.0).contains(&p.probability)) {
                return Err(invalid(format!(
                    "probability {} for class '{}' is outside [0, 1]",
                    p.probability, p.class
                )));
            }
            sum += p.probability;
        }
        if sum > 1.0 + PROBABILITY_SUM_TOLERANCE {
            return Err(invalid(format!("probabilities sum to {sum:.6} > 1")));
        }

        probabilities.sort_by(|a, b| b.probability.total_cmp(&a.probability));

        Ok(Self {
            parcel_id,
            ranked: probabilities,
            input_class,
            too_few_pixels,
        })
    }

    /// A record with an empty ranking; consolidates to `NO_PREDICTION`.
    pub fn without_prediction(parcel_id: impl Into<String>, input_class: ClassLabel, too_few_pixels: bool) -> Self {
        Self {
            parcel_id: parcel_id.into(),
            ranked: Vec::new(),
            input_class,
            too_few_pixels,
        }
    }

    pub fn parcel_id(&self) -> &str {
        &self.parcel_id
    }

    pub fn ranked(&self) -> &[ClassProbability] {
        &self.ranked
    }

    pub fn input_class(&self) -> &ClassLabel {
        &self.input_class
    }

    pub fn too_few_pixels(&self) -> bool {
        self.too_few_pixels
    }
}

/// Terminal consolidation state of a parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsolidationStatus {
    Ok,
    Doubt,
    NotEnoughPixels,
    NoPrediction,
    Ignored,
}

impl ConsolidationStatus {
    pub const ALL: [ConsolidationStatus; 5] = [
        ConsolidationStatus::Ok,
        ConsolidationStatus::Doubt,
        ConsolidationStatus::NotEnoughPixels,
        ConsolidationStatus::NoPrediction,
        ConsolidationStatus::Ignored,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConsolidationStatus::Ok => "OK",
            ConsolidationStatus::Doubt => "DOUBT",
            ConsolidationStatus::NotEnoughPixels => "NOT_ENOUGH_PIXELS",
            ConsolidationStatus::NoPrediction => "NO_PREDICTION",
            ConsolidationStatus::Ignored => "IGNORED",
        }
    }
}

/// Final, audited outcome for one parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub parcel_id: String,
    pub consolidated_class: String,
    pub status: ConsolidationStatus,
    pub detail: String,
}
