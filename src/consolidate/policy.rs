//! Doubt thresholds and how fired conditions combine.
//!
//! Three conditions are evaluated on the top-ranked class `c1` (probability
//! `p1`) and the runner-up probability `p2`:
//!
//! - A: `p1 < factor * p2`
//! - B: `c1` equals the input class and `p1 < eq_threshold`
//! - C: `c1` differs from the input class and `p1 < ne_threshold`
//!
//! A threshold (or factor) `<= 0` disables its condition.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_PROBA1_VS_PROBA2_FACTOR: f64 = 2.0;

/// How fired conditions are combined into a doubt verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum DoubtPolicy {
    /// Doubt as soon as one enabled condition fires.
    #[default]
    #[serde(rename = "any", alias = "any_condition")]
    #[value(name = "any")]
    AnyCondition,
    /// Doubt only when every enabled condition fires.
    #[serde(rename = "all", alias = "all_conditions")]
    #[value(name = "all")]
    AllConditions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DoubtCondition {
    /// A
    Proba1VsProba2,
    /// B
    PredEqInput,
    /// C
    PredNeInput,
}

impl DoubtCondition {
    pub const ALL: [DoubtCondition; 3] = [
        DoubtCondition::Proba1VsProba2,
        DoubtCondition::PredEqInput,
        DoubtCondition::PredNeInput,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoubtThresholds {
    pub proba1_vs_proba2_factor: f64,
    pub pred_eq_input_threshold: f64,
    pub pred_ne_input_threshold: f64,
    pub policy: DoubtPolicy,
}

impl Default for DoubtThresholds {
    fn default() -> Self {
        Self {
            proba1_vs_proba2_factor: DEFAULT_PROBA1_VS_PROBA2_FACTOR,
            pred_eq_input_threshold: 0.0,
            pred_ne_input_threshold: 0.0,
            policy: DoubtPolicy::AnyCondition,
        }
    }
}

impl DoubtThresholds {
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("doubt_proba1_st_2_x_proba2", self.proba1_vs_proba2_factor),
            ("doubt_pred_eq_input_proba1_st_thresshold", self.pred_eq_input_threshold),
            ("doubt_pred_ne_input_proba1_st_thresshold", self.pred_ne_input_threshold),
        ];
        for (name, value) in checks {
            if !value.is_finite() {
                return Err(CoreError::InvalidConfig(format!("{name} must be finite, got {value}")));
            }
        }
        for (name, value) in &checks[1..] {
            if *value > 1.0 {
                return Err(CoreError::InvalidConfig(format!(
                    "{name} is a probability threshold, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self, condition: DoubtCondition) -> bool {
        self.limit(condition) > 0.0
    }

    fn limit(&self, condition: DoubtCondition) -> f64 {
        match condition {
            DoubtCondition::Proba1VsProba2 => self.proba1_vs_proba2_factor,
            DoubtCondition::PredEqInput => self.pred_eq_input_threshold,
            DoubtCondition::PredNeInput => self.pred_ne_input_threshold,
        }
    }

    /// Whether `condition` fires. Disabled conditions never fire.
    pub fn fires(&self, condition: DoubtCondition, p1: f64, p2: f64, pred_is_input: bool) -> bool {
        if !self.is_enabled(condition) {
            return false;
        }
        let limit = self.limit(condition);
        match condition {
            DoubtCondition::Proba1VsProba2 => p1 < limit * p2,
            DoubtCondition::PredEqInput => pred_is_input && p1 < limit,
            DoubtCondition::PredNeInput => !pred_is_input && p1 < limit,
        }
    }

    /// Detail code fragment for a fired condition.
    pub fn code(&self, condition: DoubtCondition) -> String {
        let limit = self.limit(condition);
        match condition {
            DoubtCondition::Proba1VsProba2 => format!("PROBA1<{limit}*PROBA2"),
            DoubtCondition::PredEqInput => format!("PRED-EQ-INPUT-PROBA1<{limit}"),
            DoubtCondition::PredNeInput => format!("PRED-NE-INPUT-PROBA1<{limit}"),
        }
    }

    /// Whether `condition` can fire for a parcel whose top class does (or
    /// does not) match the declared class.
    pub fn applies(condition: DoubtCondition, pred_is_input: bool) -> bool {
        match condition {
            DoubtCondition::Proba1VsProba2 => true,
            DoubtCondition::PredEqInput => pred_is_input,
            DoubtCondition::PredNeInput => !pred_is_input,
        }
    }

    /// Combine fired conditions under the policy.
    ///
    /// `AllConditions` needs every enabled condition that applies to the
    /// parcel; the two input-agreement conditions never apply together.
    pub fn is_doubt(&self, fired: &[DoubtCondition], pred_is_input: bool) -> bool {
        match self.policy {
            DoubtPolicy::AnyCondition => !fired.is_empty(),
            DoubtPolicy::AllConditions => {
                let mut required = DoubtCondition::ALL
                    .iter()
                    .filter(|c| self.is_enabled(**c) && Self::applies(**c, pred_is_input))
                    .peekable();
                required.peek().is_some() && required.all(|c| fired.contains(c))
            }
        }
    }
}
