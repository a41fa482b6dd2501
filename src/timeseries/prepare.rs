//! Feature-table cleanup before training.
//!
//! Steps, in order:
//!
//! 1. drop columns whose share of present values is below the coverage threshold
//! 2. rescale per sensor, based on the column prefix
//! 3. drop rows with too many missing values (reported to the caller)
//! 4. fill the remaining gaps with 0
//!
//! Columns with values outside `[0, 1]` after rescaling are logged.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};

/// Parcel-keyed table of optional feature values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    parcel_ids: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl FeatureTable {
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// Append a row; it is padded or truncated to the column count.
    pub fn push_row(&mut self, parcel_id: impl Into<String>, mut values: Vec<Option<f64>>) {
        values.resize(self.columns.len(), None);
        self.parcel_ids.push(parcel_id.into());
        self.rows.push(values);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn parcel_ids(&self) -> &[String] {
        &self.parcel_ids
    }

    pub fn row(&self, parcel_id: &str) -> Option<&[Option<f64>]> {
        let idx = self.parcel_ids.iter().position(|id| id == parcel_id)?;
        Some(&self.rows[idx])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Left join on parcel id: rows of `self` are kept, `other`'s columns are
    /// appended and stay empty where `other` has no row.
    pub fn join(mut self, other: &FeatureTable) -> FeatureTable {
        let extra = other.columns.len();
        for (id, row) in self.parcel_ids.iter().zip(self.rows.iter_mut()) {
            match other.row(id) {
                Some(values) => row.extend_from_slice(values),
                None => row.extend(std::iter::repeat_n(None, extra)),
            }
        }
        self.columns.extend(other.columns.iter().cloned());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrepareOptions {
    /// Minimum share (percent) of parcels with a value for a column to be kept.
    pub min_parcels_with_data_pct: f64,
    /// Rows with more than this fraction of missing values are dropped.
    pub max_null_row_fraction: f64,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            min_parcels_with_data_pct: 90.0,
            max_null_row_fraction: 0.6,
        }
    }
}

/// Sensor family, derived from the column name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorProfile {
    /// Optical reflectance, stored as integers scaled by 10000.
    S2,
    S1Grd,
    S1Coherence,
    Other,
}

impl SensorProfile {
    pub fn of_column(column: &str) -> Self {
        if column.starts_with("s1-grd") {
            SensorProfile::S1Grd
        } else if column.starts_with("s1-coh") || column.starts_with("s1coh") {
            SensorProfile::S1Coherence
        } else if column.starts_with("s2") {
            SensorProfile::S2
        } else {
            SensorProfile::Other
        }
    }

    pub fn rescale(self, value: f64) -> f64 {
        match self {
            SensorProfile::S2 => (value / 10_000.0).min(1.0),
            SensorProfile::S1Grd => value.min(1.0),
            SensorProfile::S1Coherence => value / 300.0,
            SensorProfile::Other => value,
        }
    }
}

/// A dense, cleaned feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFeatures {
    pub columns: Vec<String>,
    pub parcel_ids: Vec<String>,
    pub values: Vec<Vec<f64>>,
    /// Dropped columns with their coverage in percent.
    pub dropped_columns: Vec<(String, f64)>,
    /// Parcels removed for having too many missing values.
    pub dropped_rows: Vec<String>,
    /// Columns with values outside `[0, 1]`.
    pub out_of_range_columns: Vec<String>,
}

impl PreparedFeatures {
    pub fn features_of(&self, parcel_id: &str) -> Option<&[f64]> {
        let idx = self.parcel_ids.iter().position(|id| id == parcel_id)?;
        Some(&self.values[idx])
    }
}

pub fn prepare(table: &FeatureTable, options: &PrepareOptions) -> Result<PreparedFeatures> {
    if !(0.0..=100.0).contains(&options.min_parcels_with_data_pct) {
        return Err(CoreError::InvalidConfig(format!(
            "min_parcels_with_data_pct must be in [0, 100], got {}",
            options.min_parcels_with_data_pct
        )));
    }
    if !(0.0..=1.0).contains(&options.max_null_row_fraction) {
        return Err(CoreError::InvalidConfig(format!(
            "max_null_row_fraction must be in [0, 1], got {}",
            options.max_null_row_fraction
        )));
    }
    if table.is_empty() {
        return Err(CoreError::EmptyFeatures("no parcels".to_string()));
    }

    let n_rows = table.len() as f64;
    let mut kept = Vec::new();
    let mut dropped_columns = Vec::new();
    for (c, name) in table.columns.iter().enumerate() {
        let present = table.rows.iter().filter(|r| r[c].is_some_and(f64::is_finite)).count();
        let coverage = present as f64 * 100.0 / n_rows;
        if coverage < options.min_parcels_with_data_pct {
            warn!(
                column = %name,
                coverage_pct = coverage,
                "drop column: too few parcels with data"
            );
            dropped_columns.push((name.clone(), coverage));
        } else {
            kept.push(c);
        }
    }
    if kept.is_empty() {
        return Err(CoreError::EmptyFeatures("no columns with enough data".to_string()));
    }

    let profiles: Vec<SensorProfile> = kept.iter().map(|&c| SensorProfile::of_column(&table.columns[c])).collect();
    let mut rows: Vec<Vec<Option<f64>>> = table
        .rows
        .iter()
        .map(|r| {
            kept.iter()
                .zip(&profiles)
                .map(|(&c, profile)| r[c].filter(|v| v.is_finite()).map(|v| profile.rescale(v)))
                .collect()
        })
        .collect();

    let columns: Vec<String> = kept.iter().map(|&c| table.columns[c].clone()).collect();
    let mut out_of_range_columns = Vec::new();
    for (c, name) in columns.iter().enumerate() {
        let outside = rows.iter().filter_map(|r| r[c]).any(|v| !(0.0..=1.0).contains(&v));
        if outside {
            warn!(column = %name, "column isn't fully normalized to [0, 1]");
            out_of_range_columns.push(name.clone());
        }
    }

    // A row may miss at most floor(fraction * columns) values.
    let max_nulls = (options.max_null_row_fraction * columns.len() as f64).floor() as usize;
    let mut parcel_ids = Vec::with_capacity(rows.len());
    let mut dropped_rows = Vec::new();
    let mut kept_rows = Vec::with_capacity(rows.len());
    for (id, row) in table.parcel_ids.iter().zip(rows.drain(..)) {
        let nulls = row.iter().filter(|v| v.is_none()).count();
        if nulls > max_nulls {
            dropped_rows.push(id.clone());
        } else {
            parcel_ids.push(id.clone());
            kept_rows.push(row);
        }
    }
    if !dropped_rows.is_empty() {
        warn!(
            rows = dropped_rows.len(),
            max_nulls,
            columns = columns.len(),
            "drop rows with too many missing values"
        );
    }
    if kept_rows.is_empty() {
        return Err(CoreError::EmptyFeatures("every parcel has too many missing values".to_string()));
    }

    let values: Vec<Vec<f64>> = kept_rows
        .into_iter()
        .map(|row| row.into_iter().map(|v| v.unwrap_or(0.0)).collect())
        .collect();

    info!(
        parcels = values.len(),
        columns = columns.len(),
        "feature table prepared"
    );

    Ok(PreparedFeatures {
        columns,
        parcel_ids,
        values,
        dropped_columns,
        dropped_rows,
        out_of_range_columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FeatureTable {
        let mut t = FeatureTable::with_columns(vec![
            "s2-agri_20240304_B08_mean".to_string(),
            "s1-grd-sigma0-asc_20240304_VV_mean".to_string(),
            "s1-coh-asc_20240304_VV_mean".to_string(),
            "s2-agri_20240311_B08_mean".to_string(),
        ]);
        t.push_row("p1", vec![Some(5_000.0), Some(1.4), Some(150.0), None]);
        t.push_row("p2", vec![Some(12_000.0), Some(0.3), Some(30.0), None]);
        t.push_row("p3", vec![Some(2_000.0), None, None, Some(1_000.0)]);
        t
    }

    #[test]
    fn rescales_by_sensor_prefix() {
        let options = PrepareOptions {
            min_parcels_with_data_pct: 60.0,
            max_null_row_fraction: 0.6,
        };
        let out = prepare(&table(), &options).unwrap();
        assert_eq!(out.columns.len(), 3);
        assert_eq!(out.dropped_columns.len(), 1);
        approx::assert_abs_diff_eq!(out.dropped_columns[0].1, 100.0 / 3.0, epsilon = 1e-9);

        let p1 = out.features_of("p1").unwrap();
        approx::assert_abs_diff_eq!(p1[0], 0.5, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(p1[1], 1.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(p1[2], 0.5, epsilon = 1e-12);
        // Clipped to 1.
        approx::assert_abs_diff_eq!(out.features_of("p2").unwrap()[0], 1.0, epsilon = 1e-12);
        assert!(out.out_of_range_columns.is_empty());
    }

    #[test]
    fn rows_with_many_gaps_are_dropped_and_others_filled() {
        let options = PrepareOptions {
            min_parcels_with_data_pct: 0.0,
            max_null_row_fraction: 0.25,
        };
        // 4 columns -> at most 1 missing value per row.
        let out = prepare(&table(), &options).unwrap();
        assert_eq!(out.dropped_rows, ["p3"]);
        assert_eq!(out.parcel_ids, ["p1", "p2"]);
        assert_eq!(out.features_of("p1").unwrap()[3], 0.0);
    }

    #[test]
    fn unknown_profiles_are_flagged_when_unscaled() {
        let mut t = FeatureTable::with_columns(vec!["ndvi_mean".to_string()]);
        t.push_row("p1", vec![Some(3.0)]);
        let out = prepare(&t, &PrepareOptions::default()).unwrap();
        assert_eq!(out.out_of_range_columns, ["ndvi_mean"]);
    }

    #[test]
    fn empty_results_are_errors() {
        assert!(matches!(
            prepare(&FeatureTable::default(), &PrepareOptions::default()),
            Err(CoreError::EmptyFeatures(_))
        ));
        let mut t = FeatureTable::with_columns(vec!["s2_x".to_string()]);
        t.push_row("p1", vec![None]);
        assert!(matches!(
            prepare(&t, &PrepareOptions::default()),
            Err(CoreError::EmptyFeatures(_))
        ));
    }

    #[test]
    fn join_appends_columns_left_join() {
        let mut a = FeatureTable::with_columns(vec!["a".to_string()]);
        a.push_row("p1", vec![Some(0.1)]);
        a.push_row("p2", vec![Some(0.2)]);
        let mut b = FeatureTable::with_columns(vec!["b".to_string()]);
        b.push_row("p2", vec![Some(0.9)]);
        b.push_row("p9", vec![Some(0.5)]);

        let joined = a.join(&b);
        assert_eq!(joined.columns(), ["a", "b"]);
        assert_eq!(joined.row("p1"), Some(&[Some(0.1), None][..]));
        assert_eq!(joined.row("p2"), Some(&[Some(0.2), Some(0.9)][..]));
        assert!(joined.row("p9").is_none());
    }
}
