//! Balancing strategies.
//!
//! Each strategy is a closed variant carrying its own parameters. The
//! `BalancingStrategyKind` selector is what configuration and the CLI expose;
//! `with_defaults()` turns it into a parameterized strategy.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_CAP: usize = 10_000;
pub const DEFAULT_FLOOR: usize = 1_000;
/// Fraction of a class's input used for training by `NONE`.
pub const DEFAULT_NONE_TRAIN_FRACTION: f64 = 0.20;
pub const DEFAULT_PROPORTIONAL_THRESHOLD: usize = 10_000;
pub const DEFAULT_PROPORTIONAL_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalancingStrategyKind {
    #[value(name = "NONE")]
    None,
    #[value(name = "MEDIUM")]
    Medium,
    #[value(name = "MEDIUM2")]
    #[serde(rename = "MEDIUM2")]
    Medium2,
    #[value(name = "UPPER_LIMIT")]
    UpperLimit,
    #[value(name = "PROPORTIONAL_GROUPS")]
    ProportionalGroups,
    #[value(name = "EQUAL")]
    Equal,
}

impl BalancingStrategyKind {
    pub fn with_defaults(self) -> BalancingStrategy {
        match self {
            BalancingStrategyKind::None => BalancingStrategy::None {
                train_fraction: DEFAULT_NONE_TRAIN_FRACTION,
            },
            BalancingStrategyKind::Medium => BalancingStrategy::Medium {
                cap: DEFAULT_CAP,
                floor: DEFAULT_FLOOR,
            },
            BalancingStrategyKind::Medium2 => BalancingStrategy::Medium2 {
                cap: DEFAULT_CAP,
                floor: DEFAULT_FLOOR,
            },
            BalancingStrategyKind::UpperLimit => BalancingStrategy::UpperLimit { cap: DEFAULT_CAP },
            BalancingStrategyKind::ProportionalGroups => BalancingStrategy::ProportionalGroups {
                threshold: DEFAULT_PROPORTIONAL_THRESHOLD,
                factor: DEFAULT_PROPORTIONAL_FACTOR,
            },
            BalancingStrategyKind::Equal => BalancingStrategy::Equal,
        }
    }
}

/// How many samples per class are used (and duplicated) for training.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BalancingStrategy {
    /// Train on `train_fraction` of each class's input, no cap, no duplication.
    None { train_fraction: f64 },
    /// Cap at `cap`; classes below `floor` are duplicated up to it.
    Medium { cap: usize, floor: usize },
    /// Cap at `min(cap, input count)`; classes below `floor` are duplicated up to it.
    Medium2 { cap: usize, floor: usize },
    /// Cap at `cap`, nothing else.
    UpperLimit { cap: usize },
    /// Classes with more than `threshold` samples keep `factor * count` of them.
    ProportionalGroups { threshold: usize, factor: f64 },
    /// Every class is brought to the count of the scarcest class.
    Equal,
}

impl BalancingStrategy {
    pub fn kind(&self) -> BalancingStrategyKind {
        match self {
            BalancingStrategy::None { .. } => BalancingStrategyKind::None,
            BalancingStrategy::Medium { .. } => BalancingStrategyKind::Medium,
            BalancingStrategy::Medium2 { .. } => BalancingStrategyKind::Medium2,
            BalancingStrategy::UpperLimit { .. } => BalancingStrategyKind::UpperLimit,
            BalancingStrategy::ProportionalGroups { .. } => BalancingStrategyKind::ProportionalGroups,
            BalancingStrategy::Equal => BalancingStrategyKind::Equal,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind() {
            BalancingStrategyKind::None => "NONE",
            BalancingStrategyKind::Medium => "MEDIUM",
            BalancingStrategyKind::Medium2 => "MEDIUM2",
            BalancingStrategyKind::UpperLimit => "UPPER_LIMIT",
            BalancingStrategyKind::ProportionalGroups => "PROPORTIONAL_GROUPS",
            BalancingStrategyKind::Equal => "EQUAL",
        }
    }

    /// Strategies with a non-empty floor cannot serve a class without samples.
    pub fn requires_floor(&self) -> bool {
        matches!(
            self,
            BalancingStrategy::Medium { .. } | BalancingStrategy::Medium2 { .. } | BalancingStrategy::Equal
        )
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CoreError::InvalidConfig(format!("{}: {msg}", self.name())));
        match *self {
            BalancingStrategy::None { train_fraction } => {
                if !(train_fraction.is_finite() && train_fraction > 0.0 && train_fraction <= 1.0) {
                    return invalid(format!("train fraction {train_fraction} must be in (0, 1]"));
                }
            }
            BalancingStrategy::Medium { cap, floor } | BalancingStrategy::Medium2 { cap, floor } => {
                if cap == 0 || floor > cap {
                    return invalid(format!("need 0 < floor <= cap, got floor={floor}, cap={cap}"));
                }
            }
            BalancingStrategy::UpperLimit { cap } => {
                if cap == 0 {
                    return invalid("cap must be > 0".to_string());
                }
            }
            BalancingStrategy::ProportionalGroups { threshold, factor } => {
                if threshold == 0 || !(factor.is_finite() && factor > 0.0 && factor <= 1.0) {
                    return invalid(format!(
                        "need threshold > 0 and factor in (0, 1], got threshold={threshold}, factor={factor}"
                    ));
                }
            }
            BalancingStrategy::Equal => {}
        }
        Ok(())
    }

    /// Per-class `(take, fill_to)` given the class counts.
    ///
    /// `take` samples are drawn from the eligible subset, then cycled until
    /// `fill_to` samples exist. `equal_target` is only used by `Equal`.
    pub(crate) fn plan(&self, input: usize, eligible: usize, equal_target: usize) -> (usize, usize) {
        match *self {
            BalancingStrategy::None { train_fraction } => {
                let take = ((input as f64) * train_fraction).round() as usize;
                let take = take.min(eligible);
                (take, take)
            }
            BalancingStrategy::Medium { cap, floor } => {
                let take = eligible.min(cap);
                (take, take.max(floor))
            }
            BalancingStrategy::Medium2 { cap, floor } => {
                let take = eligible.min(cap.min(input));
                (take, take.max(floor.min(cap)))
            }
            BalancingStrategy::UpperLimit { cap } => {
                let take = eligible.min(cap);
                (take, take)
            }
            BalancingStrategy::ProportionalGroups { threshold, factor } => {
                let take = if input > threshold {
                    eligible.min(((input as f64) * factor).round() as usize)
                } else {
                    eligible
                };
                (take, take)
            }
            BalancingStrategy::Equal => (eligible.min(equal_target), equal_target),
        }
    }
}
