//! The marker run, shared by the `demo` command and the tests.
//!
//! Stages:
//! features -> balancing -> training -> best-epoch selection -> prediction ->
//! consolidation -> report
//!
//! Per-class balancing failures and per-parcel prediction failures are kept in
//! the report; a run only fails when a whole stage cannot proceed.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::balance::{BalanceOutcome, balance, group_by_class};
use crate::config::MarkerConfig;
use crate::consolidate::{ConsolidationSummary, consolidate_all};
use crate::domain::{ConsolidationResult, ConsolidationStatus, Parcel, PredictionRecord};
use crate::error::{CoreError, Result};
use crate::timeseries::PreparedFeatures;
use crate::train::{Classifier, EpochSelection, TrainedModel, select_best};

/// Per-parcel prediction failure (the parcel is consolidated without a prediction).
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionFailure {
    pub parcel_id: String,
    pub error: CoreError,
}

/// Everything a marker run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub roi_name: String,
    pub parcels: usize,
    pub balance: BalanceOutcome,
    /// `None` for non-iterative models.
    pub selection: Option<EpochSelection>,
    pub prediction_failures: Vec<PredictionFailure>,
    pub records: Vec<PredictionRecord>,
    pub results: Vec<ConsolidationResult>,
    pub summary: ConsolidationSummary,
}

pub struct MarkerPipeline<'a, C: Classifier> {
    config: &'a MarkerConfig,
    classifier: C,
    pool: ThreadPool,
}

impl<'a, C: Classifier> MarkerPipeline<'a, C> {
    pub fn new(config: &'a MarkerConfig, classifier: C) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads())
            .build()
            .map_err(|e| CoreError::InvalidConfig(format!("cannot start worker pool: {e}")))?;
        Ok(Self {
            config,
            classifier,
            pool,
        })
    }

    pub fn run(&self, parcels: &[Parcel]) -> Result<RunReport> {
        let config = self.config;
        info!(
            roi = %config.marker.roi_name,
            parcels = parcels.len(),
            threads = self.pool.current_num_threads(),
            "marker run started"
        );

        // Balancing
        let strategy = config.balancing_strategy();
        let per_class = group_by_class(parcels);
        let outcome = self
            .pool
            .install(|| balance(&strategy, &per_class, config.marker.split_ratio, config.general.seed))?;
        if outcome.train.is_empty() {
            return Err(match outcome.dropped.first() {
                Some(dropped) => dropped.reason.clone(),
                None => CoreError::InsufficientSamples {
                    class: "<all classes>".to_string(),
                    strategy: strategy.name(),
                },
            });
        }

        // Training and best-epoch selection
        let mut model = self.classifier.fit(&outcome.train, &outcome.validation)?;
        let selection = match model.epoch_metrics() {
            None => None,
            Some(metrics) => {
                let selection = select_best(metrics, config.classifier.best_model_strategy)?;
                model.use_epoch(selection.epoch)?;
                info!(
                    epoch = selection.epoch,
                    criterion = selection.criterion,
                    strategy = selection.strategy.display_name(),
                    "best epoch selected"
                );
                Some(selection)
            }
        };

        // Prediction
        let min_nb_pixels = config.marker.min_nb_pixels;
        let predicted: Vec<(PredictionRecord, Option<PredictionFailure>)> = self.pool.install(|| {
            parcels
                .par_iter()
                .map(|parcel| predict_parcel(&model, parcel, min_nb_pixels))
                .collect()
        });
        let mut records = Vec::with_capacity(predicted.len());
        let mut prediction_failures = Vec::new();
        for (record, failure) in predicted {
            records.push(record);
            prediction_failures.extend(failure);
        }
        if !prediction_failures.is_empty() {
            warn!(failures = prediction_failures.len(), "predictions rejected");
        }

        // Consolidation
        let results = consolidate_all(&records, &config.doubt_thresholds(), &self.pool);
        let summary = ConsolidationSummary::from_results(&results, &records);
        info!(
            total = summary.total,
            ok = summary.count(ConsolidationStatus::Ok),
            doubt = summary.count(ConsolidationStatus::Doubt),
            "marker run finished"
        );

        Ok(RunReport {
            roi_name: config.marker.roi_name.clone(),
            parcels: parcels.len(),
            balance: outcome,
            selection,
            prediction_failures,
            records,
            results,
            summary,
        })
    }
}

fn predict_parcel<M: TrainedModel>(
    model: &M,
    parcel: &Parcel,
    min_nb_pixels: u32,
) -> (PredictionRecord, Option<PredictionFailure>) {
    let too_few_pixels = parcel.too_few_pixels(min_nb_pixels);
    let record = model.predict_proba(&parcel.features).and_then(|probabilities| {
        if probabilities.is_empty() {
            return Err(CoreError::Model("model returned no class probabilities".to_string()));
        }
        PredictionRecord::new(parcel.id.clone(), probabilities, parcel.class.clone(), too_few_pixels)
    });
    match record {
        Ok(record) => (record, None),
        Err(error) => {
            warn!(parcel = %parcel.id, error = %error, "prediction rejected");
            (
                PredictionRecord::without_prediction(parcel.id.clone(), parcel.class.clone(), too_few_pixels),
                Some(PredictionFailure {
                    parcel_id: parcel.id.clone(),
                    error,
                }),
            )
        }
    }
}

/// Replace parcel features with prepared ones.
///
/// Parcels without a prepared row are left out; their ids are returned.
pub fn attach_features(parcels: Vec<Parcel>, prepared: &PreparedFeatures) -> (Vec<Parcel>, Vec<String>) {
    let mut kept = Vec::with_capacity(parcels.len());
    let mut missing = Vec::new();
    for mut parcel in parcels {
        match prepared.features_of(&parcel.id) {
            Some(features) => {
                parcel.features = features.to_vec();
                kept.push(parcel);
            }
            None => missing.push(parcel.id),
        }
    }
    if !missing.is_empty() {
        warn!(parcels = missing.len(), "parcels without prepared features left out");
    }
    (kept, missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SyntheticSpec, generate_parcels};
    use crate::domain::{ClassLabel, ClassProbability, ClassRole, EpochMetric, TrainingSample};
    use crate::timeseries::{FeatureTable, PrepareOptions, prepare};
    use crate::train::SoftmaxRegression;

    fn config() -> MarkerConfig {
        let overrules = vec![
            "marker.roi_name=test".to_string(),
            "general.nb_parallel=2".to_string(),
        ];
        MarkerConfig::load(&[], &overrules).unwrap()
    }

    fn synthetic(parcels: usize) -> Vec<Parcel> {
        let spec = SyntheticSpec {
            parcels,
            ..SyntheticSpec::default()
        };
        generate_parcels(&spec, &["UNKNOWN".to_string()]).unwrap().parcels
    }

    #[test]
    fn end_to_end_run_on_synthetic_parcels() {
        let config = config();
        let parcels = synthetic(1_500);
        let classifier = SoftmaxRegression {
            epochs: 60,
            learning_rate: 1.0,
            ..SoftmaxRegression::default()
        };
        let report = MarkerPipeline::new(&config, classifier).unwrap().run(&parcels).unwrap();

        assert_eq!(report.parcels, 1_500);
        assert_eq!(report.results.len(), 1_500);
        assert!(report.prediction_failures.is_empty());
        let ids: Vec<&str> = report.results.iter().map(|r| r.parcel_id.as_str()).collect();
        let expected: Vec<&str> = parcels.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, expected);

        // Never trained on ignored classes.
        assert!(report.balance.train.iter().all(|s| s.class.role == ClassRole::Trainable));
        assert!(report.selection.is_some());

        let small = parcels.iter().filter(|p| p.too_few_pixels(20)).count();
        assert_eq!(report.summary.count(ConsolidationStatus::NotEnoughPixels), small);
        let ignored = parcels
            .iter()
            .filter(|p| !p.too_few_pixels(20) && p.class.role == ClassRole::IgnoredAlways)
            .count();
        assert_eq!(report.summary.count(ConsolidationStatus::Ignored), ignored);

        // Well separated classes: most confident predictions keep the declared class.
        let trainable_ok: Vec<&ConsolidationResult> = report
            .results
            .iter()
            .zip(&parcels)
            .filter(|(r, p)| r.status == ConsolidationStatus::Ok && p.class.role == ClassRole::Trainable)
            .map(|(r, _)| r)
            .collect();
        assert!(!trainable_ok.is_empty());
        let correct = report
            .results
            .iter()
            .zip(&parcels)
            .filter(|(r, p)| {
                r.status == ConsolidationStatus::Ok
                    && p.class.role == ClassRole::Trainable
                    && r.consolidated_class == p.class.name
            })
            .count();
        assert!(correct * 2 > trainable_ok.len(), "{correct} of {}", trainable_ok.len());
    }

    #[test]
    fn runs_are_reproducible() {
        let config = config();
        let parcels = synthetic(400);
        let classifier = SoftmaxRegression {
            epochs: 10,
            ..SoftmaxRegression::default()
        };
        let pipeline = MarkerPipeline::new(&config, classifier).unwrap();
        let a = pipeline.run(&parcels).unwrap();
        let b = pipeline.run(&parcels).unwrap();
        assert_eq!(a.results, b.results);
        assert_eq!(a.selection, b.selection);
    }

    /// Predicts a fixed distribution; optionally reports a metric history.
    struct Fixed {
        metrics: Option<Vec<EpochMetric>>,
        probabilities: Vec<ClassProbability>,
    }

    struct FixedModel {
        metrics: Option<Vec<EpochMetric>>,
        probabilities: Vec<ClassProbability>,
        epoch: Option<usize>,
    }

    impl Classifier for Fixed {
        type Model = FixedModel;

        fn fit(&self, _train: &[TrainingSample], _validation: &[TrainingSample]) -> Result<FixedModel> {
            Ok(FixedModel {
                metrics: self.metrics.clone(),
                probabilities: self.probabilities.clone(),
                epoch: None,
            })
        }
    }

    impl TrainedModel for FixedModel {
        fn epoch_metrics(&self) -> Option<&[EpochMetric]> {
            self.metrics.as_deref()
        }

        fn use_epoch(&mut self, epoch: usize) -> Result<()> {
            self.epoch = Some(epoch);
            Ok(())
        }

        fn predict_proba(&self, _features: &[f64]) -> Result<Vec<ClassProbability>> {
            Ok(self.probabilities.clone())
        }
    }

    fn probs(values: &[(&str, f64)]) -> Vec<ClassProbability> {
        values.iter().map(|(c, p)| ClassProbability::new(*c, *p)).collect()
    }

    #[test]
    fn non_iterative_models_skip_selection() {
        let config = config();
        let classifier = Fixed {
            metrics: None,
            probabilities: probs(&[("MAIS", 0.9), ("POTATO", 0.1)]),
        };
        let report = MarkerPipeline::new(&config, classifier).unwrap().run(&synthetic(200)).unwrap();
        assert!(report.selection.is_none());
    }

    #[test]
    fn empty_metric_history_aborts_the_run() {
        let config = config();
        let classifier = Fixed {
            metrics: Some(Vec::new()),
            probabilities: probs(&[("MAIS", 1.0)]),
        };
        let err = MarkerPipeline::new(&config, classifier).unwrap().run(&synthetic(200)).unwrap_err();
        assert_eq!(err, CoreError::NoMetrics);
    }

    #[test]
    fn invalid_predictions_become_no_prediction() {
        let config = config();
        let classifier = Fixed {
            metrics: None,
            probabilities: probs(&[("MAIS", 0.8), ("POTATO", 0.8)]),
        };
        let parcels = synthetic(100);
        let report = MarkerPipeline::new(&config, classifier).unwrap().run(&parcels).unwrap();
        assert_eq!(report.prediction_failures.len(), 100);
        let expected = parcels
            .iter()
            .filter(|p| !p.too_few_pixels(20) && p.class.role != ClassRole::IgnoredAlways)
            .count();
        assert_eq!(report.summary.count(ConsolidationStatus::NoPrediction), expected);
    }

    #[test]
    fn feature_length_mismatch_is_a_reported_failure() {
        let config = config();
        let mut parcels = synthetic(300);
        let classifier = SoftmaxRegression {
            epochs: 5,
            ..SoftmaxRegression::default()
        };
        // Ignored parcels are never trained on, so only prediction sees the short vector.
        parcels[3].class = ClassLabel::new("IGNORE_SHORT", ClassRole::IgnoredAlways);
        parcels[3].features.pop();
        let report = MarkerPipeline::new(&config, classifier).unwrap().run(&parcels).unwrap();

        assert_eq!(report.prediction_failures.len(), 1);
        let failure = &report.prediction_failures[0];
        assert_eq!(failure.parcel_id, parcels[3].id);
        assert!(matches!(failure.error, CoreError::Model(_)));
        assert!(report.records[3].ranked().is_empty());
        assert_eq!(report.results.len(), 300);
        assert_eq!(report.results[3].consolidated_class, "IGNORE_SHORT");
    }

    #[test]
    fn empty_rankings_from_a_trained_model_are_failures() {
        let config = config();
        let classifier = Fixed {
            metrics: None,
            probabilities: Vec::new(),
        };
        let report = MarkerPipeline::new(&config, classifier).unwrap().run(&synthetic(60)).unwrap();
        assert_eq!(report.prediction_failures.len(), 60);
    }

    #[test]
    fn a_run_without_trainable_classes_fails() {
        let config = config();
        let mut parcels = synthetic(50);
        for p in &mut parcels {
            p.class = ClassLabel::new("IGNORE_ALL", ClassRole::IgnoredAlways);
        }
        let classifier = Fixed {
            metrics: None,
            probabilities: Vec::new(),
        };
        let err = MarkerPipeline::new(&config, classifier).unwrap().run(&parcels).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientSamples { .. }));
    }

    #[test]
    fn prepared_features_replace_raw_ones() {
        let parcels = synthetic(3);
        let mut table = FeatureTable::with_columns(vec!["s2-agri_20240304_B08_mean".to_string()]);
        table.push_row(parcels[0].id.clone(), vec![Some(5_000.0)]);
        table.push_row(parcels[2].id.clone(), vec![Some(2_500.0)]);
        let prepared = prepare(&table, &PrepareOptions::default()).unwrap();

        let (kept, missing) = attach_features(parcels.clone(), &prepared);
        assert_eq!(missing, [parcels[1].id.clone()]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].features, [0.5]);
        assert_eq!(kept[1].features, [0.25]);
    }
}
