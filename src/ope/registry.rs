// src/ope/registry.rs
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TUNING_LAMBDAS;
use crate::error::{OpeError, OpeResult};

use super::estimators::{
    DirectMethod, DoublyRobust, DoublyRobustWithShrinkage, InverseProbabilityWeighting,
    OffPolicyEstimator, ReplayMethod, SelfNormalizedDoublyRobust,
    SelfNormalizedInverseProbabilityWeighting, SwitchDoublyRobust,
};
use super::estimators_tuning::{OffPolicyEstimatorTuning, TuningFamily};

/// Type names of every standard estimator, in registration order.
pub const ALL_ESTIMATORS: [&str; 8] = [
    "ReplayMethod",
    "DirectMethod",
    "InverseProbabilityWeighting",
    "SelfNormalizedInverseProbabilityWeighting",
    "DoublyRobust",
    "SelfNormalizedDoublyRobust",
    "SwitchDoublyRobust",
    "DoublyRobustWithShrinkage",
];

/// Type names of every tuning estimator.
pub const ALL_ESTIMATORS_TUNING: [&str; 4] = [
    "InverseProbabilityWeightingTuning",
    "DoublyRobustTuning",
    "SwitchDoublyRobustTuning",
    "DoublyRobustWithShrinkageTuning",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EstimatorKind {
    ReplayMethod,
    DirectMethod,
    InverseProbabilityWeighting,
    SelfNormalizedInverseProbabilityWeighting,
    DoublyRobust,
    SelfNormalizedDoublyRobust,
    SwitchDoublyRobust,
    DoublyRobustWithShrinkage,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 8] = [
        EstimatorKind::ReplayMethod,
        EstimatorKind::DirectMethod,
        EstimatorKind::InverseProbabilityWeighting,
        EstimatorKind::SelfNormalizedInverseProbabilityWeighting,
        EstimatorKind::DoublyRobust,
        EstimatorKind::SelfNormalizedDoublyRobust,
        EstimatorKind::SwitchDoublyRobust,
        EstimatorKind::DoublyRobustWithShrinkage,
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            EstimatorKind::ReplayMethod => "ReplayMethod",
            EstimatorKind::DirectMethod => "DirectMethod",
            EstimatorKind::InverseProbabilityWeighting => "InverseProbabilityWeighting",
            EstimatorKind::SelfNormalizedInverseProbabilityWeighting => {
                "SelfNormalizedInverseProbabilityWeighting"
            }
            EstimatorKind::DoublyRobust => "DoublyRobust",
            EstimatorKind::SelfNormalizedDoublyRobust => "SelfNormalizedDoublyRobust",
            EstimatorKind::SwitchDoublyRobust => "SwitchDoublyRobust",
            EstimatorKind::DoublyRobustWithShrinkage => "DoublyRobustWithShrinkage",
        }
    }

    pub fn from_type_name(name: &str) -> OpeResult<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_name() == name)
            .ok_or_else(|| OpeError::Config(format!("unknown estimator: {}", name)))
    }

    /// The estimator with its default hyperparameters and name.
    pub fn build_default(&self) -> Box<dyn OffPolicyEstimator> {
        match self {
            EstimatorKind::ReplayMethod => Box::new(ReplayMethod::new()),
            EstimatorKind::DirectMethod => Box::new(DirectMethod::new()),
            EstimatorKind::InverseProbabilityWeighting => {
                Box::new(InverseProbabilityWeighting::new())
            }
            EstimatorKind::SelfNormalizedInverseProbabilityWeighting => {
                Box::new(SelfNormalizedInverseProbabilityWeighting::new())
            }
            EstimatorKind::DoublyRobust => Box::new(DoublyRobust::new()),
            EstimatorKind::SelfNormalizedDoublyRobust => {
                Box::new(SelfNormalizedDoublyRobust::new())
            }
            EstimatorKind::SwitchDoublyRobust => Box::new(SwitchDoublyRobust::new()),
            EstimatorKind::DoublyRobustWithShrinkage => {
                Box::new(DoublyRobustWithShrinkage::new())
            }
        }
    }
}

impl TuningFamily {
    pub fn from_type_name(name: &str) -> OpeResult<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.type_name() == name)
            .ok_or_else(|| OpeError::Config(format!("unknown tuning estimator: {}", name)))
    }
}

/// One default-configured instance of every standard estimator.
pub fn all_estimators() -> Vec<Box<dyn OffPolicyEstimator>> {
    EstimatorKind::ALL
        .iter()
        .map(|kind| kind.build_default())
        .collect()
}

/// One instance of every tuning estimator sharing the same candidate list.
pub fn all_estimators_tuning(lambdas: &[f64]) -> OpeResult<Vec<OffPolicyEstimatorTuning>> {
    TuningFamily::ALL
        .iter()
        .map(|family| OffPolicyEstimatorTuning::new(*family, lambdas))
        .collect()
}

/// Every tuning estimator over `[1, 100, 10000, inf]`.
pub fn default_estimators_tuning() -> OpeResult<Vec<OffPolicyEstimatorTuning>> {
    all_estimators_tuning(&DEFAULT_TUNING_LAMBDAS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_names_match_kinds() {
        for (name, kind) in ALL_ESTIMATORS.iter().zip(EstimatorKind::ALL) {
            assert_eq!(*name, kind.type_name());
            assert_eq!(EstimatorKind::from_type_name(name).unwrap(), kind);
        }
        for (name, family) in ALL_ESTIMATORS_TUNING.iter().zip(TuningFamily::ALL) {
            assert_eq!(TuningFamily::from_type_name(name).unwrap(), family);
        }
        assert!(EstimatorKind::from_type_name("Unknown").is_err());
    }

    #[test]
    fn test_default_estimator_names_are_unique() {
        let mut names: HashSet<String> = all_estimators()
            .iter()
            .map(|e| e.estimator_name().to_string())
            .collect();
        for tuning in all_estimators_tuning(&[1.0, f64::INFINITY]).unwrap() {
            assert!(names.insert(tuning.estimator_name().to_string()));
        }
        assert_eq!(names.len(), 12);
    }
}
