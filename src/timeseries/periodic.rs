//! Per-image parcel statistics bucketed into mosaic periods.
//!
//! Each satellite image yields, per parcel, `(count, max, mean, min, std)` over
//! the parcel's pixels. Images falling in the same period are reduced to one
//! row per parcel:
//!
//! - `count`: max of counts
//! - `max` / `min`: max / min
//! - `mean` / `std`: mean of the per-image values
//! - `used_images`: number of images reduced

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Period;
use crate::timeseries::prepare::FeatureTable;

/// Parcel statistics of a single image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageObservation {
    pub parcel_id: String,
    pub date: NaiveDate,
    pub count: u32,
    pub max: f64,
    pub mean: f64,
    pub min: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodStats {
    pub period: Period,
    pub count: u32,
    pub max: f64,
    pub mean: f64,
    pub min: f64,
    pub std: f64,
    pub used_images: usize,
}

/// Statistic exposed as a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Max,
    Mean,
    Min,
    Std,
}

impl Aggregation {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Max => "max",
            Aggregation::Mean => "mean",
            Aggregation::Min => "min",
            Aggregation::Std => "std",
        }
    }

    fn value(self, stats: &PeriodStats) -> f64 {
        match self {
            Aggregation::Count => f64::from(stats.count),
            Aggregation::Max => stats.max,
            Aggregation::Mean => stats.mean,
            Aggregation::Min => stats.min,
            Aggregation::Std => stats.std,
        }
    }
}

#[derive(Default)]
struct Accumulator {
    count: u32,
    max: f64,
    min: f64,
    mean_sum: f64,
    std_sum: f64,
    n: usize,
}

impl Accumulator {
    fn push(&mut self, obs: &ImageObservation) {
        if self.n == 0 {
            self.max = obs.max;
            self.min = obs.min;
        } else {
            self.max = self.max.max(obs.max);
            self.min = self.min.min(obs.min);
        }
        self.count = self.count.max(obs.count);
        self.mean_sum += obs.mean;
        self.std_sum += obs.std;
        self.n += 1;
    }

    fn finish(&self, period: Period) -> PeriodStats {
        let n = self.n as f64;
        PeriodStats {
            period,
            count: self.count,
            max: self.max,
            mean: self.mean_sum / n,
            min: self.min,
            std: self.std_sum / n,
            used_images: self.n,
        }
    }
}

/// Reduce observations into `periods`.
///
/// Returns, per parcel, the periods that received at least one image, in
/// period order. Observations outside every period are skipped.
pub fn aggregate(observations: &[ImageObservation], periods: &[Period]) -> BTreeMap<String, Vec<PeriodStats>> {
    let mut acc: BTreeMap<(&str, usize), Accumulator> = BTreeMap::new();
    let mut skipped = 0usize;

    for obs in observations {
        // Periods are contiguous and sorted.
        let idx = periods.partition_point(|p| p.end <= obs.date);
        match periods.get(idx) {
            Some(p) if p.contains(obs.date) => acc.entry((obs.parcel_id.as_str(), idx)).or_default().push(obs),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "observations outside the aligned periods");
    }

    let mut out: BTreeMap<String, Vec<PeriodStats>> = BTreeMap::new();
    for ((parcel_id, idx), a) in acc {
        out.entry(parcel_id.to_string()).or_default().push(a.finish(periods[idx]));
    }
    out
}

/// Pixel count of a parcel: the largest per-period count.
pub fn pixel_count(series: &[PeriodStats]) -> u32 {
    series.iter().map(|s| s.count).max().unwrap_or(0)
}

/// Column name for one period/statistic, e.g. `s2-ndvi_20240304_ndvi_mean`.
pub fn column_name(profile: &str, band: &str, period: &Period, aggregation: Aggregation) -> String {
    format!(
        "{profile}_{}_{band}_{}",
        period.start.format("%Y%m%d"),
        aggregation.as_str()
    )
}

/// Lay the aggregated series out as a feature table.
///
/// Every `(period, aggregation)` pair becomes a column; periods without images
/// for a parcel stay empty (`None`).
pub fn to_feature_table(
    series: &BTreeMap<String, Vec<PeriodStats>>,
    periods: &[Period],
    profile: &str,
    band: &str,
    aggregations: &[Aggregation],
) -> FeatureTable {
    let columns: Vec<String> = periods
        .iter()
        .flat_map(|p| aggregations.iter().map(move |a| column_name(profile, band, p, *a)))
        .collect();

    let mut table = FeatureTable::with_columns(columns);
    for (parcel_id, stats) in series {
        let mut row = vec![None; periods.len() * aggregations.len()];
        for s in stats {
            let Some(pidx) = periods.iter().position(|p| p.start == s.period.start) else {
                continue;
            };
            for (aidx, a) in aggregations.iter().enumerate() {
                row[pidx * aggregations.len() + aidx] = Some(a.value(s));
            }
        }
        table.push_row(parcel_id.clone(), row);
    }
    table
}
