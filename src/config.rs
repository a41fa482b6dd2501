//! Run configuration.
//!
//! A `MarkerConfig` is assembled once per run, in layers:
//!
//! 1. built-in defaults
//! 2. TOML files, in the order given (later files win)
//! 3. `section.key=value` overrules from the command line
//!
//! The result is validated and then only read. Values equal to
//! `MUST_OVERRIDE` mark settings a run has to provide.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;

use crate::balance::{BalancingStrategy, BalancingStrategyKind, DEFAULT_SPLIT_RATIO};
use crate::consolidate::{DEFAULT_PROBA1_VS_PROBA2_FACTOR, DoubtPolicy, DoubtThresholds};
use crate::domain::{Cadence, WeekParity};
use crate::error::{CoreError, Result};
use crate::period::PeriodAligner;
use crate::timeseries::PrepareOptions;
use crate::train::BestModelStrategy;

/// Sentinel for settings without a usable default.
pub const MUST_OVERRIDE: &str = "MUST_OVERRIDE";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkerConfig {
    pub general: GeneralConfig,
    pub period: PeriodConfig,
    pub marker: MarkerSection,
    pub classifier: ClassifierConfig,
    pub postprocess: PostprocessConfig,
    pub timeseries: TimeseriesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Worker threads; `<= 0` uses every core.
    pub nb_parallel: i64,
    pub log_level: String,
    pub seed: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            nb_parallel: -1,
            log_level: "info".to_string(),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParityMode {
    #[default]
    IsoWeek,
    Epoch,
}

/// An end date, or the day of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DateSpec {
    Now,
    Date(NaiveDate),
}

impl DateSpec {
    pub fn resolve(self, today: NaiveDate) -> NaiveDate {
        match self {
            DateSpec::Now => today,
            DateSpec::Date(date) => date,
        }
    }
}

impl FromStr for DateSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("now") {
            return Ok(DateSpec::Now);
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(DateSpec::Date)
            .map_err(|e| CoreError::InvalidConfig(format!("invalid date '{s}' (expected YYYY-MM-DD or now): {e}")))
    }
}

impl TryFrom<String> for DateSpec {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DateSpec> for String {
    fn from(value: DateSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateSpec::Now => f.write_str("now"),
            DateSpec::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeriodConfig {
    pub cadence: Cadence,
    pub parity: ParityMode,
    /// Reference Monday for `parity = "epoch"`.
    pub parity_epoch: NaiveDate,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<DateSpec>,
    pub end_date_subtract_days: u32,
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            cadence: Cadence::Weekly,
            parity: ParityMode::IsoWeek,
            parity_epoch: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            start_date: None,
            end_date: None,
            end_date_subtract_days: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkerSection {
    pub roi_name: String,
    pub balancing_strategy: BalancingStrategyKind,
    pub split_ratio: f64,
    pub min_nb_pixels: u32,
    pub ignore_for_train_classes: Vec<String>,
}

impl Default for MarkerSection {
    fn default() -> Self {
        Self {
            roi_name: MUST_OVERRIDE.to_string(),
            balancing_strategy: BalancingStrategyKind::Medium2,
            split_ratio: DEFAULT_SPLIT_RATIO,
            min_nb_pixels: 20,
            ignore_for_train_classes: vec!["UNKNOWN".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    pub best_model_strategy: BestModelStrategy,
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            best_model_strategy: BestModelStrategy::ValLoss,
            epochs: 50,
            learning_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostprocessConfig {
    pub doubt_proba1_st_2_x_proba2: f64,
    pub doubt_pred_eq_input_proba1_st_thresshold: f64,
    pub doubt_pred_ne_input_proba1_st_thresshold: f64,
    pub doubt_policy: DoubtPolicy,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            doubt_proba1_st_2_x_proba2: DEFAULT_PROBA1_VS_PROBA2_FACTOR,
            doubt_pred_eq_input_proba1_st_thresshold: 0.0,
            doubt_pred_ne_input_proba1_st_thresshold: 0.0,
            doubt_policy: DoubtPolicy::AnyCondition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeseriesConfig {
    pub min_parcels_with_data_pct: f64,
    pub max_null_row_fraction: f64,
}

impl Default for TimeseriesConfig {
    fn default() -> Self {
        let defaults = PrepareOptions::default();
        Self {
            min_parcels_with_data_pct: defaults.min_parcels_with_data_pct,
            max_null_row_fraction: defaults.max_null_row_fraction,
        }
    }
}

impl MarkerConfig {
    /// Defaults, then `paths` in order, then `overrules`; validated.
    pub fn load(paths: &[PathBuf], overrules: &[String]) -> Result<Self> {
        Self::load_over(&MarkerConfig::default(), paths, overrules)
    }

    /// Like [`MarkerConfig::load`], starting from `base` instead of the defaults.
    pub fn load_over(base: &MarkerConfig, paths: &[PathBuf], overrules: &[String]) -> Result<Self> {
        let mut layered = to_table(base)?;
        for path in paths {
            debug!(path = %path.display(), "reading config file");
            merge_tables(&mut layered, read_table(path)?);
        }
        apply_overrules(&mut layered, overrules)?;
        Self::from_table(layered)
    }

    /// Parse a single TOML document layered over the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut layered = to_table(&MarkerConfig::default())?;
        merge_tables(&mut layered, parse_table(text, "<inline>")?);
        Self::from_table(layered)
    }

    fn from_table(table: toml::Table) -> Result<Self> {
        let unresolved = sentinel_keys(&table);
        if !unresolved.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "{} must be overridden",
                unresolved.join(", ")
            )));
        }
        let config: MarkerConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| CoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CoreError::InvalidConfig(msg));

        if LevelFilter::from_str(&self.general.log_level).is_err() {
            return invalid(format!("general.log_level '{}' is not a level", self.general.log_level));
        }
        if self.marker.roi_name.trim().is_empty() || self.marker.roi_name == MUST_OVERRIDE {
            return invalid("marker.roi_name must be overridden".to_string());
        }
        if !(self.marker.split_ratio.is_finite() && self.marker.split_ratio > 0.0 && self.marker.split_ratio <= 1.0) {
            return invalid(format!("marker.split_ratio {} must be in (0, 1]", self.marker.split_ratio));
        }
        self.balancing_strategy().validate()?;
        if self.classifier.epochs == 0 {
            return invalid("classifier.epochs must be > 0".to_string());
        }
        if !(self.classifier.learning_rate.is_finite() && self.classifier.learning_rate > 0.0) {
            return invalid(format!(
                "classifier.learning_rate {} must be > 0",
                self.classifier.learning_rate
            ));
        }
        self.doubt_thresholds().validate()?;
        let ts = &self.timeseries;
        if !(0.0..=100.0).contains(&ts.min_parcels_with_data_pct) {
            return invalid(format!(
                "timeseries.min_parcels_with_data_pct {} must be in [0, 100]",
                ts.min_parcels_with_data_pct
            ));
        }
        if !(0.0..=1.0).contains(&ts.max_null_row_fraction) {
            return invalid(format!(
                "timeseries.max_null_row_fraction {} must be in [0, 1]",
                ts.max_null_row_fraction
            ));
        }
        self.aligner()?;
        Ok(())
    }

    pub fn week_parity(&self) -> WeekParity {
        match self.period.parity {
            ParityMode::IsoWeek => WeekParity::IsoWeek,
            ParityMode::Epoch => WeekParity::Epoch(self.period.parity_epoch),
        }
    }

    pub fn aligner(&self) -> Result<PeriodAligner> {
        PeriodAligner::new(self.period.cadence, self.week_parity())
    }

    pub fn balancing_strategy(&self) -> BalancingStrategy {
        self.marker.balancing_strategy.with_defaults()
    }

    pub fn doubt_thresholds(&self) -> DoubtThresholds {
        DoubtThresholds {
            proba1_vs_proba2_factor: self.postprocess.doubt_proba1_st_2_x_proba2,
            pred_eq_input_threshold: self.postprocess.doubt_pred_eq_input_proba1_st_thresshold,
            pred_ne_input_threshold: self.postprocess.doubt_pred_ne_input_proba1_st_thresshold,
            policy: self.postprocess.doubt_policy,
        }
    }

    pub fn prepare_options(&self) -> PrepareOptions {
        PrepareOptions {
            min_parcels_with_data_pct: self.timeseries.min_parcels_with_data_pct,
            max_null_row_fraction: self.timeseries.max_null_row_fraction,
        }
    }

    /// Thread count for the worker pool; 0 lets rayon use every core.
    pub fn worker_threads(&self) -> usize {
        usize::try_from(self.general.nb_parallel).unwrap_or(0)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CoreError::InvalidConfig(e.to_string()))
    }
}

fn to_table(config: &MarkerConfig) -> Result<toml::Table> {
    match toml::Value::try_from(config) {
        Ok(toml::Value::Table(table)) => Ok(table),
        Ok(_) => Err(CoreError::InvalidConfig("config is not a table".to_string())),
        Err(e) => Err(CoreError::InvalidConfig(e.to_string())),
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CoreError::InvalidConfig(format!("cannot read config file {}: {e}", path.display())))?;
    parse_table(&text, &path.display().to_string())
}

fn parse_table(text: &str, origin: &str) -> Result<toml::Table> {
    let mut table: toml::Table =
        toml::from_str(text).map_err(|e| CoreError::InvalidConfig(format!("{origin}: {e}")))?;
    for value in table.iter_mut().map(|(_, v)| v) {
        dates_to_strings(value);
    }
    Ok(table)
}

/// TOML dates are kept as text; typed fields parse them.
fn dates_to_strings(value: &mut toml::Value) {
    match value {
        toml::Value::Datetime(dt) => *value = toml::Value::String(dt.to_string()),
        toml::Value::Table(table) => table.iter_mut().map(|(_, v)| v).for_each(dates_to_strings),
        toml::Value::Array(items) => items.iter_mut().for_each(dates_to_strings),
        _ => {}
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let toml::Value::Table(incoming) = value else {
            base.insert(key, value);
            continue;
        };
        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, toml::Value::Table(incoming));
    }
}

/// Apply `section.key=value` overrules.
///
/// Each overrule holds exactly one `=` and its key exactly one `.`. Values are
/// read as TOML literals when possible, else as plain text; a list setting
/// also accepts comma-separated text.
pub fn apply_overrules(table: &mut toml::Table, overrules: &[String]) -> Result<()> {
    for overrule in overrules {
        let invalid = || CoreError::InvalidConfig(format!("invalid config overrule found: {overrule}"));
        let (key, raw) = overrule.split_once('=').ok_or_else(invalid)?;
        if raw.contains('=') {
            return Err(invalid());
        }
        let (section, name) = key.trim().split_once('.').ok_or_else(invalid)?;
        if name.contains('.') || section.is_empty() || name.is_empty() {
            return Err(invalid());
        }

        let section_table = match table
            .entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
        {
            toml::Value::Table(t) => t,
            _ => return Err(invalid()),
        };
        let expects_list = matches!(section_table.get(name), Some(toml::Value::Array(_)));
        let value = parse_overrule_value(raw.trim(), expects_list);
        debug!(section, key = name, value = %value, "config overrule");
        section_table.insert(name.to_string(), value);
    }
    Ok(())
}

fn parse_overrule_value(raw: &str, expects_list: bool) -> toml::Value {
    if let Ok(mut doc) = toml::from_str::<toml::Table>(&format!("v = {raw}")) {
        if let Some(mut value) = doc.remove("v") {
            dates_to_strings(&mut value);
            if !expects_list || value.is_array() {
                return value;
            }
        }
    }
    if expects_list {
        let items = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| toml::Value::String(s.to_string()))
            .collect();
        return toml::Value::Array(items);
    }
    toml::Value::String(raw.to_string())
}

fn sentinel_keys(table: &toml::Table) -> Vec<String> {
    let mut keys = Vec::new();
    for (section, value) in table {
        if let toml::Value::Table(entries) = value {
            for (key, value) in entries {
                if value.as_str() == Some(MUST_OVERRIDE) {
                    keys.push(format!("{section}.{key}"));
                }
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn roi() -> Vec<String> {
        vec!["marker.roi_name=flanders".to_string()]
    }

    #[test]
    fn defaults_need_a_roi_name() {
        let err = MarkerConfig::load(&[], &[]).unwrap_err();
        assert!(err.to_string().contains("marker.roi_name must be overridden"));

        let config = MarkerConfig::load(&[], &roi()).unwrap();
        assert_eq!(config.marker.roi_name, "flanders");
        assert_eq!(config.marker.min_nb_pixels, 20);
        assert_eq!(config.general.nb_parallel, -1);
        assert_eq!(config.worker_threads(), 0);
        assert_eq!(config.doubt_thresholds(), DoubtThresholds::default());
    }

    #[test]
    fn files_layer_in_order_then_overrules_win() {
        let mut base = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            base,
            "[marker]\nroi_name = \"base\"\nbalancing_strategy = \"EQUAL\"\n[period]\ncadence = \"biweekly\"\nstart_date = 2024-03-01"
        )
        .unwrap();
        let mut local = tempfile::NamedTempFile::new().unwrap();
        writeln!(local, "[marker]\nroi_name = \"local\"\n[general]\nnb_parallel = 4").unwrap();

        let paths = vec![base.path().to_path_buf(), local.path().to_path_buf()];
        let overrules = vec![
            "classifier.best_model_strategy=AVG(VAL_LOSS,LOSS)".to_string(),
            "period.end_date=now".to_string(),
            "marker.ignore_for_train_classes=UNKNOWN,IGNORE_NEW".to_string(),
        ];
        let config = MarkerConfig::load(&paths, &overrules).unwrap();

        assert_eq!(config.marker.roi_name, "local");
        assert_eq!(config.marker.balancing_strategy, BalancingStrategyKind::Equal);
        assert_eq!(config.period.cadence, Cadence::Biweekly);
        assert_eq!(config.period.start_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(config.period.end_date, Some(DateSpec::Now));
        assert_eq!(config.worker_threads(), 4);
        assert_eq!(config.classifier.best_model_strategy, BestModelStrategy::AvgValLossLoss);
        assert_eq!(config.marker.ignore_for_train_classes, ["UNKNOWN", "IGNORE_NEW"]);
    }

    #[test]
    fn a_base_config_replaces_the_defaults() {
        let mut base = MarkerConfig::default();
        base.marker.roi_name = "demo".to_string();
        let config = MarkerConfig::load_over(&base, &[], &[]).unwrap();
        assert_eq!(config.marker.roi_name, "demo");

        let config = MarkerConfig::load_over(&base, &[], &roi()).unwrap();
        assert_eq!(config.marker.roi_name, "flanders");
    }

    #[test]
    fn malformed_overrules_are_rejected() {
        for bad in ["marker.roi_name", "roi_name=x", "marker.roi.name=x", "marker.roi_name=a=b"] {
            let err = MarkerConfig::load(&[], &[bad.to_string()]).unwrap_err();
            assert!(err.to_string().contains("invalid config overrule"), "{bad}: {err}");
        }
    }

    #[test]
    fn unknown_keys_and_bad_values_are_errors() {
        let mut overrules = roi();
        overrules.push("marker.not_a_setting=1".to_string());
        assert!(MarkerConfig::load(&[], &overrules).is_err());

        let mut overrules = roi();
        overrules.push("marker.split_ratio=1.5".to_string());
        assert!(MarkerConfig::load(&[], &overrules).is_err());

        let mut overrules = roi();
        overrules.push("period.parity=epoch".to_string());
        overrules.push("period.parity_epoch=2024-01-02".to_string());
        assert!(MarkerConfig::load(&[], &overrules).is_err());
    }

    #[test]
    fn integers_are_accepted_for_float_settings() {
        let mut overrules = roi();
        overrules.push("marker.split_ratio=1".to_string());
        overrules.push("postprocess.doubt_pred_eq_input_proba1_st_thresshold=0.5".to_string());
        let config = MarkerConfig::load(&[], &overrules).unwrap();
        assert_eq!(config.marker.split_ratio, 1.0);
        assert_eq!(config.doubt_thresholds().pred_eq_input_threshold, 0.5);
    }

    #[test]
    fn toml_round_trip_keeps_settings() {
        let config = MarkerConfig::from_toml_str(
            "[marker]\nroi_name = \"x\"\n[period]\nend_date = \"2024-06-30\"\nparity = \"epoch\"",
        )
        .unwrap();
        assert_eq!(config.week_parity(), WeekParity::Epoch(config.period.parity_epoch));
        let text = config.to_toml_string().unwrap();
        assert_eq!(MarkerConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn date_spec_parsing() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 8).unwrap();
        assert_eq!("now".parse::<DateSpec>().unwrap().resolve(today), today);
        assert_eq!(
            "2024-03-01".parse::<DateSpec>().unwrap(),
            DateSpec::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert!("01/03/2024".parse::<DateSpec>().is_err());
    }
}
