//! Per-parcel consolidation state machine.
//!
//! Terminal states are checked in order; the first match wins:
//!
//! 1. too few pixels -> `NOT_ENOUGH_PIXELS`
//! 2. input class ignored always -> `IGNORED`
//! 3. no ranked probabilities -> `NO_PREDICTION`
//! 4. doubt conditions combined by policy -> `DOUBT` or `OK`
//!
//! Only `OK` takes the predicted class; every other state keeps the input class.

use std::collections::BTreeMap;

use rayon::ThreadPool;
use rayon::prelude::*;

use crate::consolidate::policy::{DoubtCondition, DoubtThresholds};
use crate::domain::{ClassRole, ConsolidationResult, ConsolidationStatus, PredictionRecord};

pub fn consolidate(record: &PredictionRecord, thresholds: &DoubtThresholds) -> ConsolidationResult {
    let input = record.input_class();
    let keep_input = |status: ConsolidationStatus, detail: String| ConsolidationResult {
        parcel_id: record.parcel_id().to_string(),
        consolidated_class: input.name.clone(),
        status,
        detail,
    };

    if record.too_few_pixels() {
        return keep_input(
            ConsolidationStatus::NotEnoughPixels,
            ConsolidationStatus::NotEnoughPixels.as_str().to_string(),
        );
    }
    if input.role == ClassRole::IgnoredAlways {
        return keep_input(ConsolidationStatus::Ignored, ConsolidationStatus::Ignored.as_str().to_string());
    }
    let Some(top) = record.ranked().first() else {
        return keep_input(
            ConsolidationStatus::NoPrediction,
            ConsolidationStatus::NoPrediction.as_str().to_string(),
        );
    };

    let p1 = top.probability;
    let p2 = record.ranked().get(1).map_or(0.0, |p| p.probability);
    let pred_is_input = top.class == input.name;

    let fired: Vec<DoubtCondition> = DoubtCondition::ALL
        .into_iter()
        .filter(|c| thresholds.fires(*c, p1, p2, pred_is_input))
        .collect();

    if thresholds.is_doubt(&fired, pred_is_input) {
        let detail = fired
            .iter()
            .map(|c| format!("DOUBT:{}", thresholds.code(*c)))
            .collect::<Vec<_>>()
            .join(";");
        return keep_input(ConsolidationStatus::Doubt, detail);
    }

    ConsolidationResult {
        parcel_id: record.parcel_id().to_string(),
        consolidated_class: top.class.clone(),
        status: ConsolidationStatus::Ok,
        detail: ConsolidationStatus::Ok.as_str().to_string(),
    }
}

/// Consolidate every record on `pool`, preserving input order.
pub fn consolidate_all(
    records: &[PredictionRecord],
    thresholds: &DoubtThresholds,
    pool: &ThreadPool,
) -> Vec<ConsolidationResult> {
    pool.install(|| records.par_iter().map(|r| consolidate(r, thresholds)).collect())
}

/// Status counts over a set of consolidation results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationSummary {
    pub total: usize,
    pub by_status: BTreeMap<ConsolidationStatus, usize>,
    /// `OK` results whose class differs from the declared (input) class.
    pub ok_changed: usize,
}

impl ConsolidationSummary {
    pub fn from_results(results: &[ConsolidationResult], records: &[PredictionRecord]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for status in ConsolidationStatus::ALL {
            summary.by_status.insert(status, 0);
        }
        for (result, record) in results.iter().zip(records) {
            *summary.by_status.entry(result.status).or_insert(0) += 1;
            if result.status == ConsolidationStatus::Ok && result.consolidated_class != record.input_class().name {
                summary.ok_changed += 1;
            }
        }
        summary
    }

    pub fn count(&self, status: ConsolidationStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Share of results with `status`, in percent.
    pub fn pct(&self, status: ConsolidationStatus) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.count(status) as f64 * 100.0 / self.total as f64
    }
}
