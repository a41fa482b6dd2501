//! Training/validation partition per class.
//!
//! Algorithm, per class:
//!
//! 1. deterministically shuffle the class's samples (seed derived from the run
//!    seed and the class name)
//! 2. the first `round(n * split_ratio)` become train-eligible, the rest go to
//!    the validation set
//! 3. the strategy decides how many eligible samples are taken and whether the
//!    selection is cycled (duplicated) up to a floor/target
//!
//! Classes are processed in parallel; results are assembled in class order so
//! the outcome never depends on thread scheduling.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::balance::strategy::BalancingStrategy;
use crate::domain::{ClassLabel, ClassRole, Parcel, TrainingSample};
use crate::error::{CoreError, Result};

pub const DEFAULT_SPLIT_RATIO: f64 = 0.8;

/// Per-class accounting of a balancing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassBalance {
    pub class: ClassLabel,
    pub input: usize,
    pub eligible: usize,
    /// Distinct samples taken for training.
    pub selected: usize,
    /// Extra copies added on top of `selected`.
    pub duplicates: usize,
    pub validation: usize,
}

impl ClassBalance {
    pub fn train_count(&self) -> usize {
        self.selected + self.duplicates
    }
}

/// A class removed from balancing, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedClass {
    pub class: ClassLabel,
    pub reason: CoreError,
}

#[derive(Debug, Clone, Default)]
pub struct BalanceOutcome {
    pub train: Vec<TrainingSample>,
    pub validation: Vec<TrainingSample>,
    pub classes: Vec<ClassBalance>,
    pub dropped: Vec<DroppedClass>,
}

impl BalanceOutcome {
    pub fn class(&self, name: &str) -> Option<&ClassBalance> {
        self.classes.iter().find(|c| c.class.name == name)
    }
}

/// Group parcels into per-class sample lists, keeping input order.
pub fn group_by_class(parcels: &[Parcel]) -> BTreeMap<ClassLabel, Vec<TrainingSample>> {
    let mut groups: BTreeMap<ClassLabel, Vec<TrainingSample>> = BTreeMap::new();
    for parcel in parcels {
        groups
            .entry(parcel.class.clone())
            .or_default()
            .push(TrainingSample::from_parcel(parcel));
    }
    groups
}

/// Partition per-class samples into training and validation sets.
pub fn balance(
    strategy: &BalancingStrategy,
    per_class: &BTreeMap<ClassLabel, Vec<TrainingSample>>,
    split_ratio: f64,
    seed: u64,
) -> Result<BalanceOutcome> {
    strategy.validate()?;
    if !(split_ratio.is_finite() && split_ratio > 0.0 && split_ratio <= 1.0) {
        return Err(CoreError::InvalidConfig(format!(
            "split ratio {split_ratio} must be in (0, 1]"
        )));
    }

    let entries: Vec<(&ClassLabel, &Vec<TrainingSample>)> = per_class
        .iter()
        .filter(|(class, _)| class.role != ClassRole::IgnoredAlways)
        .collect();

    let splits: Vec<ClassSplit> = entries
        .par_iter()
        .map(|(class, samples)| ClassSplit::new(class, samples, split_ratio, seed))
        .collect();

    // EQUAL needs the scarcest usable class before any class can be planned.
    let equal_target = splits
        .iter()
        .filter(|s| s.class.role == ClassRole::Trainable && !s.eligible.is_empty())
        .map(|s| s.eligible.len())
        .min()
        .unwrap_or(0);

    let per_class_results: Vec<std::result::Result<ClassResult, DroppedClass>> = splits
        .par_iter()
        .map(|split| split.finish(strategy, equal_target))
        .collect();

    let mut outcome = BalanceOutcome::default();
    for result in per_class_results {
        match result {
            Ok(class_result) => {
                outcome.train.extend(class_result.train);
                outcome.validation.extend(class_result.validation);
                outcome.classes.push(class_result.summary);
            }
            Err(dropped) => {
                warn!(class = %dropped.class, reason = %dropped.reason, "class dropped from balancing");
                outcome.dropped.push(dropped);
            }
        }
    }

    info!(
        strategy = strategy.name(),
        classes = outcome.classes.len(),
        dropped = outcome.dropped.len(),
        train = outcome.train.len(),
        validation = outcome.validation.len(),
        "balanced training set"
    );

    Ok(outcome)
}

struct ClassSplit<'a> {
    class: &'a ClassLabel,
    samples: &'a [TrainingSample],
    /// Indices in shuffled order.
    eligible: Vec<usize>,
    /// Indices in input order.
    validation: Vec<usize>,
}

struct ClassResult {
    train: Vec<TrainingSample>,
    validation: Vec<TrainingSample>,
    summary: ClassBalance,
}

impl<'a> ClassSplit<'a> {
    fn new(class: &'a ClassLabel, samples: &'a [TrainingSample], split_ratio: f64, seed: u64) -> Self {
        let n = samples.len();

        if class.role == ClassRole::IgnoredForTrainOnly {
            return Self {
                class,
                samples,
                eligible: Vec::new(),
                validation: (0..n).collect(),
            };
        }

        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(class_seed(seed, &class.name));
        order.shuffle(&mut rng);

        let n_eligible = (((n as f64) * split_ratio).round() as usize).min(n);
        let mut validation = order.split_off(n_eligible);
        validation.sort_unstable();

        Self {
            class,
            samples,
            eligible: order,
            validation,
        }
    }

    fn finish(&self, strategy: &BalancingStrategy, equal_target: usize) -> std::result::Result<ClassResult, DroppedClass> {
        let validation: Vec<TrainingSample> = self.validation.iter().map(|&i| self.samples[i].clone()).collect();

        if self.class.role == ClassRole::IgnoredForTrainOnly {
            return Ok(ClassResult {
                summary: ClassBalance {
                    class: self.class.clone(),
                    input: self.samples.len(),
                    eligible: 0,
                    selected: 0,
                    duplicates: 0,
                    validation: validation.len(),
                },
                train: Vec::new(),
                validation,
            });
        }

        if self.eligible.is_empty() && strategy.requires_floor() {
            return Err(DroppedClass {
                class: self.class.clone(),
                reason: CoreError::InsufficientSamples {
                    class: self.class.name.clone(),
                    strategy: strategy.name(),
                },
            });
        }

        let (take, fill_to) = strategy.plan(self.samples.len(), self.eligible.len(), equal_target);
        let selected: Vec<&TrainingSample> = self.eligible[..take].iter().map(|&i| &self.samples[i]).collect();
        let train = fill_by_cycling(&selected, fill_to);
        let duplicates = train.len() - selected.len();

        Ok(ClassResult {
            summary: ClassBalance {
                class: self.class.clone(),
                input: self.samples.len(),
                eligible: self.eligible.len(),
                selected: selected.len(),
                duplicates,
                validation: validation.len(),
            },
            train,
            validation,
        })
    }
}

/// Clone `selected` in order, then cycle through it until `target` samples exist.
fn fill_by_cycling(selected: &[&TrainingSample], target: usize) -> Vec<TrainingSample> {
    let mut out: Vec<TrainingSample> = selected.iter().map(|s| (*s).clone()).collect();
    if selected.is_empty() {
        return out;
    }
    let mut i = 0;
    while out.len() < target {
        let round = (i / selected.len()) as u32 + 1;
        out.push(selected[i % selected.len()].duplicate(round));
        i += 1;
    }
    out
}

/// Per-class shuffle seed.
///
/// `DefaultHasher` output is only stable for a given Rust release, so the
/// same seed reproduces the same split only under the same toolchain.
fn class_seed(seed: u64, class_name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    class_name.hash(&mut hasher);
    hasher.finish()
}
