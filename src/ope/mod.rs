// src/ope/mod.rs
pub mod estimators;
pub mod estimators_tuning;
pub mod interval;
pub mod meta;
pub mod registry;
pub mod types;
pub(crate) mod validation;

pub use estimators::{
    DirectMethod, DoublyRobust, DoublyRobustWithShrinkage, InverseProbabilityWeighting,
    NaiveEstimator, OffPolicyEstimator, ReplayMethod, SelfNormalizedDoublyRobust,
    SelfNormalizedInverseProbabilityWeighting, SwitchDoublyRobust, WithEstimatorName,
};
pub use estimators_tuning::{OffPolicyEstimatorTuning, TuningFamily};
pub use interval::{ConfidenceInterval, IntervalParams, estimate_confidence_interval_by_bootstrap};
pub use meta::{EstimateSummary, EvaluationMetric, OffPolicyEvaluation};
pub use registry::{
    ALL_ESTIMATORS, ALL_ESTIMATORS_TUNING, EstimatorKind, all_estimators, all_estimators_tuning,
    default_estimators_tuning,
};
pub use types::{EstimatorInput, Lambda};
