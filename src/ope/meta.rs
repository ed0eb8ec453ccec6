// src/ope/meta.rs
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::array::NdArray;
use crate::dataset::BanditFeedback;
use crate::error::{OpeError, OpeResult};

use super::estimators::OffPolicyEstimator;
use super::interval::{ConfidenceInterval, IntervalParams};
use super::types::EstimatorInput;

/// How an estimate is compared against the ground-truth policy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvaluationMetric {
    /// `|ground_truth - estimate| / |ground_truth|`
    RelativeEe,
    /// `(ground_truth - estimate)^2`
    Se,
}

impl EvaluationMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationMetric::RelativeEe => "relative-ee",
            EvaluationMetric::Se => "se",
        }
    }

    fn score(&self, ground_truth: f64, estimate: f64) -> f64 {
        match self {
            EvaluationMetric::RelativeEe => ((ground_truth - estimate) / ground_truth).abs(),
            EvaluationMetric::Se => (ground_truth - estimate).powi(2),
        }
    }
}

/// One row of `summarize_off_policy_estimates`.
#[derive(Debug, Clone, Serialize)]
pub struct EstimateSummary {
    pub estimator_name: String,
    pub estimated_policy_value: f64,
    pub interval: ConfidenceInterval,
    /// Estimate divided by the behavior policy's mean observed reward.
    pub relative_estimated_policy_value: f64,
}

/// Runs a named set of estimators against one logged dataset.
pub struct OffPolicyEvaluation {
    bandit_feedback: BanditFeedback,
    ope_estimators: Vec<Box<dyn OffPolicyEstimator>>,
}

fn feedback_input<'a>(
    feedback: &'a BanditFeedback,
    action_dist: &'a NdArray<f64>,
    estimated_rewards_by_reg_model: Option<&'a NdArray<f64>>,
) -> EstimatorInput<'a> {
    EstimatorInput::new(
        action_dist,
        &feedback.action,
        &feedback.reward,
        &feedback.pscore,
    )
    .with_position(feedback.position.as_ref())
    .with_reward_model(estimated_rewards_by_reg_model)
}

impl OffPolicyEvaluation {
    pub fn new(
        bandit_feedback: BanditFeedback,
        ope_estimators: Vec<Box<dyn OffPolicyEstimator>>,
    ) -> OpeResult<Self> {
        let mut seen = HashSet::new();
        for estimator in &ope_estimators {
            if !seen.insert(estimator.estimator_name().to_string()) {
                return Err(OpeError::Config(format!(
                    "estimator_name '{}' is registered more than once",
                    estimator.estimator_name()
                )));
            }
        }
        info!(
            "OffPolicyEvaluation ready with {} estimators over {} logged rounds",
            ope_estimators.len(),
            bandit_feedback.n_rounds
        );
        Ok(Self {
            bandit_feedback,
            ope_estimators,
        })
    }

    fn warn_if_no_reward_model(&self, reg: Option<&NdArray<f64>>) {
        if reg.is_none() {
            warn!(
                "estimated_rewards_by_reg_model is not given; model-based estimators will fail"
            );
        }
    }

    pub fn estimate_policy_values(
        &mut self,
        action_dist: &NdArray<f64>,
        estimated_rewards_by_reg_model: Option<&NdArray<f64>>,
    ) -> OpeResult<HashMap<String, f64>> {
        self.warn_if_no_reward_model(estimated_rewards_by_reg_model);
        let input = feedback_input(
            &self.bandit_feedback,
            action_dist,
            estimated_rewards_by_reg_model,
        );
        let mut policy_values = HashMap::new();
        for estimator in self.ope_estimators.iter_mut() {
            let value = estimator.estimate_policy_value(&input)?;
            debug!("{}: estimated policy value {:.6}", estimator.estimator_name(), value);
            policy_values.insert(estimator.estimator_name().to_string(), value);
        }
        Ok(policy_values)
    }

    pub fn estimate_intervals(
        &mut self,
        action_dist: &NdArray<f64>,
        estimated_rewards_by_reg_model: Option<&NdArray<f64>>,
        params: &IntervalParams,
    ) -> OpeResult<HashMap<String, ConfidenceInterval>> {
        self.warn_if_no_reward_model(estimated_rewards_by_reg_model);
        let input = feedback_input(
            &self.bandit_feedback,
            action_dist,
            estimated_rewards_by_reg_model,
        );
        let mut intervals = HashMap::new();
        for estimator in self.ope_estimators.iter_mut() {
            let interval = estimator.estimate_interval(&input, params)?;
            intervals.insert(estimator.estimator_name().to_string(), interval);
        }
        Ok(intervals)
    }

    /// Point estimate, interval and behavior-relative value per estimator,
    /// in registration order.
    pub fn summarize_off_policy_estimates(
        &mut self,
        action_dist: &NdArray<f64>,
        estimated_rewards_by_reg_model: Option<&NdArray<f64>>,
        params: &IntervalParams,
    ) -> OpeResult<Vec<EstimateSummary>> {
        self.warn_if_no_reward_model(estimated_rewards_by_reg_model);
        let behavior_value = self.bandit_feedback.behavior_policy_value();
        if behavior_value == 0.0 {
            warn!("Behavior policy value is zero; relative estimates will not be finite");
        }
        let input = feedback_input(
            &self.bandit_feedback,
            action_dist,
            estimated_rewards_by_reg_model,
        );
        let mut summaries = Vec::with_capacity(self.ope_estimators.len());
        for estimator in self.ope_estimators.iter_mut() {
            let estimated_policy_value = estimator.estimate_policy_value(&input)?;
            let interval = estimator.estimate_interval(&input, params)?;
            summaries.push(EstimateSummary {
                estimator_name: estimator.estimator_name().to_string(),
                estimated_policy_value,
                interval,
                relative_estimated_policy_value: estimated_policy_value / behavior_value,
            });
        }
        Ok(summaries)
    }

    pub fn evaluate_performance_of_estimators(
        &mut self,
        ground_truth_policy_value: f64,
        action_dist: &NdArray<f64>,
        estimated_rewards_by_reg_model: Option<&NdArray<f64>>,
        metric: EvaluationMetric,
    ) -> OpeResult<HashMap<String, f64>> {
        if !ground_truth_policy_value.is_finite() {
            return Err(OpeError::Value(format!(
                "`ground_truth_policy_value`= {:?}, must be finite",
                ground_truth_policy_value
            )));
        }
        if metric == EvaluationMetric::RelativeEe && ground_truth_policy_value == 0.0 {
            return Err(OpeError::Value(
                "ground_truth_policy_value must be non-zero when metric is relative-ee"
                    .to_string(),
            ));
        }
        let policy_values =
            self.estimate_policy_values(action_dist, estimated_rewards_by_reg_model)?;
        Ok(policy_values
            .into_iter()
            .map(|(name, estimate)| (name, metric.score(ground_truth_policy_value, estimate)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ope::estimators::{
        DirectMethod, DoublyRobust, InverseProbabilityWeighting, NaiveEstimator,
        WithEstimatorName,
    };

    fn feedback() -> BanditFeedback {
        BanditFeedback {
            n_rounds: 4,
            n_actions: 2,
            action: NdArray::from_vec(vec![0, 1, 0, 1]),
            reward: NdArray::from_vec(vec![1.0, 0.0, 1.0, 1.0]),
            pscore: NdArray::from_vec(vec![0.5, 0.5, 0.5, 0.5]),
            position: None,
            context: None,
            expected_reward: None,
        }
    }

    fn uniform() -> NdArray<f64> {
        NdArray::full(vec![4, 2, 1], 0.5)
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let estimators: Vec<Box<dyn OffPolicyEstimator>> = vec![
            Box::new(InverseProbabilityWeighting::new()),
            Box::new(NaiveEstimator::new().with_estimator_name("ipw")),
        ];
        let err = OffPolicyEvaluation::new(feedback(), estimators).err().unwrap();
        assert!(matches!(err, OpeError::Config(_)));
    }

    #[test]
    fn test_policy_values_are_keyed_by_name() {
        let estimators: Vec<Box<dyn OffPolicyEstimator>> = vec![
            Box::new(InverseProbabilityWeighting::new()),
            Box::new(NaiveEstimator::new()),
        ];
        let mut ope = OffPolicyEvaluation::new(feedback(), estimators).unwrap();
        let values = ope.estimate_policy_values(&uniform(), None).unwrap();
        assert_eq!(values.len(), 2);
        // uniform policy over uniform logging: every weight is 1
        assert!((values["ipw"] - 0.75).abs() < 1e-12);
        assert!((values["naive"] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_missing_reward_model_fails_the_whole_call() {
        let estimators: Vec<Box<dyn OffPolicyEstimator>> = vec![
            Box::new(InverseProbabilityWeighting::new()),
            Box::new(DirectMethod::new()),
        ];
        let mut ope = OffPolicyEvaluation::new(feedback(), estimators).unwrap();
        let err = ope.estimate_policy_values(&uniform(), None).unwrap_err();
        assert!(matches!(err, OpeError::Missing(_)));
    }

    #[test]
    fn test_performance_metrics() {
        let q_hat = NdArray::full(vec![4, 2, 1], 0.5);
        let estimators: Vec<Box<dyn OffPolicyEstimator>> = vec![
            Box::new(DirectMethod::new()),
            Box::new(DoublyRobust::new()),
        ];
        let mut ope = OffPolicyEvaluation::new(feedback(), estimators).unwrap();

        let relative = ope
            .evaluate_performance_of_estimators(1.0, &uniform(), Some(&q_hat), EvaluationMetric::RelativeEe)
            .unwrap();
        assert!((relative["dm"] - 0.5).abs() < 1e-12);
        assert!((relative["dr"] - 0.25).abs() < 1e-12);

        let squared = ope
            .evaluate_performance_of_estimators(1.0, &uniform(), Some(&q_hat), EvaluationMetric::Se)
            .unwrap();
        assert!((squared["dm"] - 0.25).abs() < 1e-12);

        let err = ope
            .evaluate_performance_of_estimators(0.0, &uniform(), Some(&q_hat), EvaluationMetric::RelativeEe)
            .unwrap_err();
        assert!(err.is_value_error());
    }

    #[test]
    fn test_summary_rows_follow_registration_order() {
        let estimators: Vec<Box<dyn OffPolicyEstimator>> = vec![
            Box::new(NaiveEstimator::new()),
            Box::new(InverseProbabilityWeighting::new()),
        ];
        let mut ope = OffPolicyEvaluation::new(feedback(), estimators).unwrap();
        let params = IntervalParams::new(0.05, 100, Some(1));
        let rows = ope
            .summarize_off_policy_estimates(&uniform(), None, &params)
            .unwrap();
        assert_eq!(rows[0].estimator_name, "naive");
        assert_eq!(rows[1].estimator_name, "ipw");
        assert!((rows[0].relative_estimated_policy_value - 1.0).abs() < 1e-12);
        assert!((rows[1].interval.mean - rows[1].estimated_policy_value).abs() < 1e-12);
    }
}
