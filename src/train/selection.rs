//! Best-epoch selection for iterative classifiers.
//!
//! Strategies (ties always go to the earliest epoch):
//!
//! - `VAL_LOSS`: minimum validation loss
//! - `LOSS`: minimum training loss
//! - `AVG(VAL_LOSS,LOSS)`: minimum mean of both
//!
//! If any epoch has an undefined validation loss, strategies that need it fall
//! back to `LOSS`. The fallback is returned with the selection and logged.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::EpochMetric;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum BestModelStrategy {
    #[serde(rename = "VAL_LOSS")]
    #[value(name = "VAL_LOSS")]
    ValLoss,
    #[serde(rename = "LOSS")]
    #[value(name = "LOSS")]
    Loss,
    #[serde(rename = "AVG(VAL_LOSS,LOSS)")]
    #[value(name = "AVG(VAL_LOSS,LOSS)")]
    AvgValLossLoss,
}

impl BestModelStrategy {
    pub fn display_name(self) -> &'static str {
        match self {
            BestModelStrategy::ValLoss => "VAL_LOSS",
            BestModelStrategy::Loss => "LOSS",
            BestModelStrategy::AvgValLossLoss => "AVG(VAL_LOSS,LOSS)",
        }
    }

    pub fn requires_val_loss(self) -> bool {
        !matches!(self, BestModelStrategy::Loss)
    }

    /// Criterion value of `metric`; `None` when it depends on an undefined loss.
    pub fn criterion(self, metric: &EpochMetric) -> Option<f64> {
        match self {
            BestModelStrategy::Loss => Some(metric.train_loss),
            BestModelStrategy::ValLoss => metric.defined_val_loss(),
            BestModelStrategy::AvgValLossLoss => metric
                .defined_val_loss()
                .map(|v| (v + metric.train_loss) / 2.0),
        }
    }
}

/// A policy substitution made during selection (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackApplied {
    pub requested: BestModelStrategy,
    pub applied: BestModelStrategy,
    /// First epoch without a defined validation loss.
    pub first_undefined_epoch: usize,
}

impl fmt::Display for FallbackApplied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "best-model strategy {} replaced by {}: val_loss undefined from epoch {}",
            self.requested.display_name(),
            self.applied.display_name(),
            self.first_undefined_epoch
        )
    }
}

/// The chosen epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSelection {
    pub epoch: usize,
    /// Index of the chosen metric in the input sequence.
    pub position: usize,
    pub criterion: f64,
    /// Strategy actually applied (after any fallback).
    pub strategy: BestModelStrategy,
    pub fallback: Option<FallbackApplied>,
}

/// Online reducer over epoch metrics, in training order.
///
/// Besides the final selection it exposes the running best and the number of
/// epochs since the last improvement (for early stopping).
#[derive(Debug, Clone)]
pub struct BestEpochTracker {
    requested: BestModelStrategy,
    history: Vec<EpochMetric>,
    first_undefined_epoch: Option<usize>,
    best: Option<(usize, f64)>,
}

impl BestEpochTracker {
    pub fn new(strategy: BestModelStrategy) -> Self {
        Self {
            requested: strategy,
            history: Vec::new(),
            first_undefined_epoch: None,
            best: None,
        }
    }

    /// Strategy currently in effect.
    pub fn effective_strategy(&self) -> BestModelStrategy {
        if self.requested.requires_val_loss() && self.first_undefined_epoch.is_some() {
            BestModelStrategy::Loss
        } else {
            self.requested
        }
    }

    /// Record the next epoch. Returns `true` when it becomes the new best.
    pub fn observe(&mut self, metric: EpochMetric) -> Result<bool> {
        metric.validate()?;
        if let Some(last) = self.history.last() {
            if metric.epoch <= last.epoch {
                return Err(CoreError::InvalidMetric {
                    epoch: metric.epoch,
                    reason: format!("epochs must increase (previous epoch {})", last.epoch),
                });
            }
        }

        let switched = self.first_undefined_epoch.is_none()
            && self.requested.requires_val_loss()
            && metric.defined_val_loss().is_none();
        if switched {
            self.first_undefined_epoch = Some(metric.epoch);
        }

        self.history.push(metric);
        let position = self.history.len() - 1;

        if switched {
            // The criterion changed: rescan everything seen so far.
            self.best = scan(&self.history, self.effective_strategy());
            return Ok(self.best.is_some_and(|(p, _)| p == position));
        }

        let Some(value) = self.effective_strategy().criterion(&metric) else {
            return Ok(false);
        };
        let improved = match self.best {
            Some((_, best)) => value < best,
            None => true,
        };
        if improved {
            self.best = Some((position, value));
        }
        Ok(improved)
    }

    /// Running best `(epoch, criterion)`.
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best.map(|(p, v)| (self.history[p].epoch, v))
    }

    pub fn epochs_since_improvement(&self) -> usize {
        match self.best {
            Some((p, _)) => self.history.len() - 1 - p,
            None => self.history.len(),
        }
    }

    pub fn history(&self) -> &[EpochMetric] {
        &self.history
    }

    /// Final selection over the whole history.
    pub fn finish(&self) -> Result<EpochSelection> {
        let Some((position, criterion)) = self.best else {
            return Err(CoreError::NoMetrics);
        };

        let fallback = self.first_undefined_epoch.and_then(|epoch| {
            self.requested.requires_val_loss().then_some(FallbackApplied {
                requested: self.requested,
                applied: BestModelStrategy::Loss,
                first_undefined_epoch: epoch,
            })
        });
        if let Some(fallback) = &fallback {
            warn!(%fallback, "best-model fallback applied");
        }

        Ok(EpochSelection {
            epoch: self.history[position].epoch,
            position,
            criterion,
            strategy: self.effective_strategy(),
            fallback,
        })
    }
}

/// Pick the best epoch from an ordered metric history.
pub fn select_best(metrics: &[EpochMetric], strategy: BestModelStrategy) -> Result<EpochSelection> {
    if metrics.is_empty() {
        return Err(CoreError::NoMetrics);
    }
    let mut tracker = BestEpochTracker::new(strategy);
    for metric in metrics {
        tracker.observe(*metric)?;
    }
    tracker.finish()
}

/// Earliest position with the minimal criterion.
fn scan(history: &[EpochMetric], strategy: BestModelStrategy) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (position, metric) in history.iter().enumerate() {
        let Some(value) = strategy.criterion(metric) else {
            continue;
        };
        if best.is_none_or(|(_, b)| value < b) {
            best = Some((position, value));
        }
    }
    best
}
