//! Reference classifier: multinomial logistic regression trained by full-batch
//! gradient descent.
//!
//! This is a stand-in for the external model capability so the pipeline can be
//! exercised end to end (the `demo` command and tests). It records one
//! `EpochMetric` per epoch and keeps a weight snapshot per epoch so the best
//! epoch can be restored.
//!
//! Shapes:
//! - `X`: `n x (d + 1)` design matrix with a leading bias column
//! - `W`: `(d + 1) x k` weights, one column per class

use std::collections::BTreeSet;

use nalgebra::DMatrix;

use crate::domain::{ClassProbability, EpochMetric, TrainingSample};
use crate::error::{CoreError, Result};
use crate::train::model::{Classifier, TrainedModel};

const LOG_EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct SoftmaxRegression {
    pub epochs: usize,
    pub learning_rate: f64,
    /// L2 penalty on the weights.
    pub l2: f64,
}

impl Default for SoftmaxRegression {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.5,
            l2: 1e-4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SoftmaxModel {
    classes: Vec<String>,
    n_features: usize,
    snapshots: Vec<DMatrix<f64>>,
    metrics: Vec<EpochMetric>,
    active: usize,
}

impl Classifier for SoftmaxRegression {
    type Model = SoftmaxModel;

    fn fit(&self, train: &[TrainingSample], validation: &[TrainingSample]) -> Result<SoftmaxModel> {
        if self.epochs == 0 {
            return Err(CoreError::Model("epochs must be > 0".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(CoreError::Model("learning rate must be > 0".to_string()));
        }
        let Some(first) = train.first() else {
            return Err(CoreError::Model("no training samples".to_string()));
        };
        let n_features = first.features.len();
        if let Some(bad) = train.iter().chain(validation).find(|s| s.features.len() != n_features) {
            return Err(CoreError::Model(format!(
                "parcel '{}' has {} features, expected {n_features}",
                bad.parcel_id,
                bad.features.len()
            )));
        }

        let classes: Vec<String> = train
            .iter()
            .map(|s| s.class.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let train_set = EncodedSet::new(train, &classes, n_features);
        // Validation samples of classes never trained on cannot contribute a loss.
        let known: Vec<TrainingSample> = validation
            .iter()
            .filter(|s| classes.binary_search(&s.class.name).is_ok())
            .cloned()
            .collect();
        let validation_set = (!known.is_empty()).then(|| EncodedSet::new(&known, &classes, n_features));

        let mut w = DMatrix::<f64>::zeros(n_features + 1, classes.len());
        let mut snapshots = Vec::with_capacity(self.epochs);
        let mut metrics = Vec::with_capacity(self.epochs);

        for epoch in 0..self.epochs {
            let probs = softmax_rows(&(&train_set.x * &w));
            let mut diff = probs - &train_set.y;
            for i in 0..diff.nrows() {
                let s = train_set.weights[i] / train_set.weight_sum;
                for j in 0..diff.ncols() {
                    diff[(i, j)] *= s;
                }
            }
            let grad = train_set.x.transpose() * &diff + &w * self.l2;
            w -= grad * self.learning_rate;

            let train_loss = train_set.loss(&w);
            let val_loss = validation_set.as_ref().map(|v| v.loss(&w));
            metrics.push(EpochMetric::new(epoch, train_loss, val_loss)?);
            snapshots.push(w.clone());
        }

        let active = snapshots.len() - 1;
        Ok(SoftmaxModel {
            classes,
            n_features,
            snapshots,
            metrics,
            active,
        })
    }
}

impl SoftmaxModel {
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn active_epoch(&self) -> usize {
        self.active
    }
}

impl TrainedModel for SoftmaxModel {
    fn epoch_metrics(&self) -> Option<&[EpochMetric]> {
        Some(&self.metrics)
    }

    fn use_epoch(&mut self, epoch: usize) -> Result<()> {
        if epoch >= self.snapshots.len() {
            return Err(CoreError::Model(format!(
                "epoch {epoch} not available ({} epochs trained)",
                self.snapshots.len()
            )));
        }
        self.active = epoch;
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Vec<ClassProbability>> {
        if features.len() != self.n_features {
            return Err(CoreError::Model(format!(
                "expected {} features, got {}",
                self.n_features,
                features.len()
            )));
        }
        let x = DMatrix::from_fn(1, self.n_features + 1, |_, j| if j == 0 { 1.0 } else { features[j - 1] });
        let probs = softmax_rows(&(x * &self.snapshots[self.active]));
        Ok(self
            .classes
            .iter()
            .enumerate()
            .map(|(j, class)| ClassProbability::new(class.clone(), probs[(0, j)]))
            .collect())
    }
}

struct EncodedSet {
    x: DMatrix<f64>,
    y: DMatrix<f64>,
    weights: Vec<f64>,
    weight_sum: f64,
}

impl EncodedSet {
    fn new(samples: &[TrainingSample], classes: &[String], n_features: usize) -> Self {
        let n = samples.len();
        let x = DMatrix::from_fn(n, n_features + 1, |i, j| {
            if j == 0 { 1.0 } else { samples[i].features[j - 1] }
        });
        let mut y = DMatrix::<f64>::zeros(n, classes.len());
        for (i, s) in samples.iter().enumerate() {
            if let Ok(j) = classes.binary_search(&s.class.name) {
                y[(i, j)] = 1.0;
            }
        }
        let weights: Vec<f64> = samples.iter().map(|s| s.weight).collect();
        let weight_sum = weights.iter().sum::<f64>().max(LOG_EPS);
        Self {
            x,
            y,
            weights,
            weight_sum,
        }
    }

    /// Weighted mean cross-entropy.
    fn loss(&self, w: &DMatrix<f64>) -> f64 {
        let probs = softmax_rows(&(&self.x * w));
        let mut total = 0.0;
        for i in 0..probs.nrows() {
            let p_true: f64 = (0..probs.ncols()).map(|j| self.y[(i, j)] * probs[(i, j)]).sum();
            total -= self.weights[i] * (p_true + LOG_EPS).ln();
        }
        total / self.weight_sum
    }
}

fn softmax_rows(logits: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = logits.clone();
    for i in 0..out.nrows() {
        let max = (0..out.ncols()).map(|j| out[(i, j)]).fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for j in 0..out.ncols() {
            let e = (out[(i, j)] - max).exp();
            out[(i, j)] = e;
            sum += e;
        }
        for j in 0..out.ncols() {
            out[(i, j)] /= sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClassLabel;

    fn sample(id: usize, class: &str, features: Vec<f64>) -> TrainingSample {
        TrainingSample {
            parcel_id: format!("p{id}"),
            class: ClassLabel::trainable(class),
            features,
            weight: 1.0,
            copy_index: 0,
        }
    }

    fn two_clusters() -> Vec<TrainingSample> {
        (0..40)
            .map(|i| {
                let jitter = (i % 5) as f64 * 0.01;
                if i % 2 == 0 {
                    sample(i, "A", vec![0.1 + jitter, 0.9 - jitter])
                } else {
                    sample(i, "B", vec![0.9 - jitter, 0.1 + jitter])
                }
            })
            .collect()
    }

    #[test]
    fn separates_two_clusters() {
        let data = two_clusters();
        let model = SoftmaxRegression::default().fit(&data[..30], &data[30..]).unwrap();
        assert_eq!(model.classes(), ["A", "B"]);

        let probs = model.predict_proba(&[0.1, 0.9]).unwrap();
        let a = probs.iter().find(|p| p.class == "A").unwrap().probability;
        assert!(a > 0.5, "P(A)={a}");
        let total: f64 = probs.iter().map(|p| p.probability).sum();
        approx::assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn records_one_metric_per_epoch_with_decreasing_loss() {
        let data = two_clusters();
        let trainer = SoftmaxRegression {
            epochs: 20,
            ..SoftmaxRegression::default()
        };
        let model = trainer.fit(&data[..30], &data[30..]).unwrap();
        let metrics = model.epoch_metrics().unwrap();
        assert_eq!(metrics.len(), 20);
        assert!(metrics.iter().all(|m| m.defined_val_loss().is_some()));
        assert!(metrics[19].train_loss < metrics[0].train_loss);
    }

    #[test]
    fn val_loss_is_undefined_without_known_validation_classes() {
        let data = two_clusters();
        let unknown = vec![sample(99, "UNKNOWN", vec![0.5, 0.5])];
        let model = SoftmaxRegression::default().fit(&data, &unknown).unwrap();
        assert!(model.epoch_metrics().unwrap().iter().all(|m| m.val_loss.is_none()));
    }

    #[test]
    fn use_epoch_switches_weights() {
        let data = two_clusters();
        let mut model = SoftmaxRegression::default().fit(&data, &[]).unwrap();
        let late = model.predict_proba(&[0.1, 0.9]).unwrap();
        model.use_epoch(0).unwrap();
        assert_eq!(model.active_epoch(), 0);
        let early = model.predict_proba(&[0.1, 0.9]).unwrap();
        assert_ne!(late, early);
        assert!(model.use_epoch(500).is_err());
    }

    #[test]
    fn mismatched_feature_lengths_are_rejected() {
        let mut data = two_clusters();
        data.push(sample(100, "A", vec![0.1]));
        assert!(SoftmaxRegression::default().fit(&data, &[]).is_err());

        let model = SoftmaxRegression::default().fit(&two_clusters(), &[]).unwrap();
        assert!(matches!(model.predict_proba(&[0.1]), Err(CoreError::Model(_))));
    }
}
