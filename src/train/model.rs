//! The trainable-model capability consumed by the pipeline.
//!
//! Model implementations are external to the marker core; the pipeline only
//! needs to fit, inspect the per-epoch history, pick an epoch and predict.

use crate::domain::{ClassProbability, EpochMetric, TrainingSample};
use crate::error::Result;

/// Something that can be trained on balanced samples.
pub trait Classifier {
    type Model: TrainedModel;

    fn fit(&self, train: &[TrainingSample], validation: &[TrainingSample]) -> Result<Self::Model>;
}

/// A fitted model.
pub trait TrainedModel: Send + Sync {
    /// Per-epoch losses in training order.
    ///
    /// `None` marks a non-iterative model (no best-epoch selection). An empty
    /// slice means an iterative model produced no history.
    fn epoch_metrics(&self) -> Option<&[EpochMetric]>;

    /// Switch to the weights of `epoch`.
    fn use_epoch(&mut self, epoch: usize) -> Result<()>;

    /// Class probabilities for one feature vector (any order).
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<ClassProbability>>;
}
