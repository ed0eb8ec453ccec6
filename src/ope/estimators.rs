// src/ope/estimators.rs
use crate::error::OpeResult;

use super::interval::{
    ConfidenceInterval, IntervalParams, estimate_confidence_interval_by_bootstrap, mean,
};
use super::types::{EstimatorInput, Lambda};
use super::validation::{RewardModelUsage, ValidatedInput, check_ope_inputs};

/// Common contract of every off-policy estimator.
///
/// Implementors only provide the per-round reward estimates; the point
/// estimate is their mean and the interval is a bootstrap over them.
/// Methods take `&mut self` because tuning estimators record their selection.
pub trait OffPolicyEstimator: Send {
    fn estimator_name(&self) -> &str;

    /// Validates the inputs and returns one reward estimate per round.
    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>>;

    fn estimate_policy_value(&mut self, input: &EstimatorInput<'_>) -> OpeResult<f64> {
        let round_rewards = self.estimate_round_rewards(input)?;
        Ok(mean(&round_rewards))
    }

    fn estimate_interval(
        &mut self,
        input: &EstimatorInput<'_>,
        params: &IntervalParams,
    ) -> OpeResult<ConfidenceInterval> {
        params.validate()?;
        let round_rewards = self.estimate_round_rewards(input)?;
        estimate_confidence_interval_by_bootstrap(&round_rewards, params)
    }
}

// --- Per-round formulas shared with the tuning estimators ---

pub(crate) fn inverse_probability_weighting(
    v: &ValidatedInput<'_>,
    weight: impl Fn(f64) -> f64,
) -> Vec<f64> {
    v.importance_weights()
        .into_iter()
        .zip(v.reward)
        .map(|(w, r)| weight(w) * r)
        .collect()
}

pub(crate) fn doubly_robust(v: &ValidatedInput<'_>, weight: impl Fn(f64) -> f64) -> Vec<f64> {
    let iw = v.importance_weights();
    let q_factual = v.q_hat_factual();
    v.model_policy_values()
        .into_iter()
        .enumerate()
        .map(|(i, dm)| dm + weight(iw[i]) * (v.reward[i] - q_factual[i]))
        .collect()
}

fn self_normalized_weights(v: &ValidatedInput<'_>) -> Vec<f64> {
    let iw = v.importance_weights();
    let mean_iw = mean(&iw);
    if mean_iw > 0.0 {
        iw.into_iter().map(|w| w / mean_iw).collect()
    } else {
        vec![0.0; iw.len()]
    }
}

// --- Naive ---

/// Average of the logged rewards; ignores the evaluation policy entirely.
#[derive(Debug, Clone)]
pub struct NaiveEstimator {
    estimator_name: String,
}

impl Default for NaiveEstimator {
    fn default() -> Self {
        Self {
            estimator_name: "naive".to_string(),
        }
    }
}

impl NaiveEstimator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffPolicyEstimator for NaiveEstimator {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        let v = check_ope_inputs(input, RewardModelUsage::Ignored)?;
        Ok(v.reward.to_vec())
    }
}

// --- Replay Method ---

/// Averages rewards over rounds where the logged action is the evaluation
/// policy's most probable action. Only meaningful for deterministic policies.
#[derive(Debug, Clone)]
pub struct ReplayMethod {
    estimator_name: String,
}

impl Default for ReplayMethod {
    fn default() -> Self {
        Self {
            estimator_name: "rm".to_string(),
        }
    }
}

impl ReplayMethod {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffPolicyEstimator for ReplayMethod {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        let v = check_ope_inputs(input, RewardModelUsage::Ignored)?;
        let matched: Vec<f64> = (0..v.n_rounds)
            .map(|i| if v.matches_greedy_action(i) { 1.0 } else { 0.0 })
            .collect();
        let match_rate = mean(&matched);
        if match_rate == 0.0 {
            return Ok(vec![0.0; v.n_rounds]);
        }
        Ok(matched
            .into_iter()
            .zip(v.reward)
            .map(|(m, r)| m * r / match_rate)
            .collect())
    }
}

// --- Direct Method ---

#[derive(Debug, Clone)]
pub struct DirectMethod {
    estimator_name: String,
}

impl Default for DirectMethod {
    fn default() -> Self {
        Self {
            estimator_name: "dm".to_string(),
        }
    }
}

impl DirectMethod {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffPolicyEstimator for DirectMethod {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        let v = check_ope_inputs(input, RewardModelUsage::Required)?;
        Ok(v.model_policy_values())
    }
}

// --- Inverse Probability Weighting ---

/// IPW with optional weight clipping at `lambda`.
#[derive(Debug, Clone)]
pub struct InverseProbabilityWeighting {
    lambda: Lambda,
    estimator_name: String,
}

impl Default for InverseProbabilityWeighting {
    fn default() -> Self {
        Self {
            lambda: Lambda::Unbounded,
            estimator_name: "ipw".to_string(),
        }
    }
}

impl InverseProbabilityWeighting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lambda(lambda: Lambda) -> Self {
        Self {
            lambda,
            ..Self::default()
        }
    }

    pub fn lambda(&self) -> Lambda {
        self.lambda
    }
}

impl OffPolicyEstimator for InverseProbabilityWeighting {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        let v = check_ope_inputs(input, RewardModelUsage::Ignored)?;
        Ok(inverse_probability_weighting(&v, |w| self.lambda.clip(w)))
    }
}

// --- Self-Normalized IPW ---

#[derive(Debug, Clone)]
pub struct SelfNormalizedInverseProbabilityWeighting {
    estimator_name: String,
}

impl Default for SelfNormalizedInverseProbabilityWeighting {
    fn default() -> Self {
        Self {
            estimator_name: "snipw".to_string(),
        }
    }
}

impl SelfNormalizedInverseProbabilityWeighting {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffPolicyEstimator for SelfNormalizedInverseProbabilityWeighting {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        let v = check_ope_inputs(input, RewardModelUsage::Ignored)?;
        Ok(self_normalized_weights(&v)
            .into_iter()
            .zip(v.reward)
            .map(|(w, r)| w * r)
            .collect())
    }
}

// --- Doubly Robust ---

/// DR with optional weight clipping at `lambda`.
#[derive(Debug, Clone)]
pub struct DoublyRobust {
    lambda: Lambda,
    estimator_name: String,
}

impl Default for DoublyRobust {
    fn default() -> Self {
        Self {
            lambda: Lambda::Unbounded,
            estimator_name: "dr".to_string(),
        }
    }
}

impl DoublyRobust {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lambda(lambda: Lambda) -> Self {
        Self {
            lambda,
            ..Self::default()
        }
    }

    pub fn lambda(&self) -> Lambda {
        self.lambda
    }
}

impl OffPolicyEstimator for DoublyRobust {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        let v = check_ope_inputs(input, RewardModelUsage::Required)?;
        Ok(doubly_robust(&v, |w| self.lambda.clip(w)))
    }
}

// --- Self-Normalized DR ---

#[derive(Debug, Clone)]
pub struct SelfNormalizedDoublyRobust {
    estimator_name: String,
}

impl Default for SelfNormalizedDoublyRobust {
    fn default() -> Self {
        Self {
            estimator_name: "sndr".to_string(),
        }
    }
}

impl SelfNormalizedDoublyRobust {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffPolicyEstimator for SelfNormalizedDoublyRobust {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        let v = check_ope_inputs(input, RewardModelUsage::Required)?;
        let sn_weights = self_normalized_weights(&v);
        let q_factual = v.q_hat_factual();
        Ok(v.model_policy_values()
            .into_iter()
            .enumerate()
            .map(|(i, dm)| dm + sn_weights[i] * (v.reward[i] - q_factual[i]))
            .collect())
    }
}

// --- Switch-DR ---

/// DR that falls back to the model estimate in rounds whose importance
/// weight exceeds `lambda`.
#[derive(Debug, Clone)]
pub struct SwitchDoublyRobust {
    lambda: Lambda,
    estimator_name: String,
}

impl Default for SwitchDoublyRobust {
    fn default() -> Self {
        Self {
            lambda: Lambda::Unbounded,
            estimator_name: "switch-dr".to_string(),
        }
    }
}

impl SwitchDoublyRobust {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lambda(lambda: Lambda) -> Self {
        Self {
            lambda,
            ..Self::default()
        }
    }

    pub fn lambda(&self) -> Lambda {
        self.lambda
    }
}

impl OffPolicyEstimator for SwitchDoublyRobust {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        let v = check_ope_inputs(input, RewardModelUsage::Required)?;
        Ok(doubly_robust(&v, |w| self.lambda.switch(w)))
    }
}

// --- DR with optimistic shrinkage ---

/// DR whose weights are shrunk by `lambda / (w^2 + lambda)`.
#[derive(Debug, Clone)]
pub struct DoublyRobustWithShrinkage {
    lambda: Lambda,
    estimator_name: String,
}

impl Default for DoublyRobustWithShrinkage {
    fn default() -> Self {
        Self {
            lambda: Lambda::Finite(0.0),
            estimator_name: "dr-os".to_string(),
        }
    }
}

impl DoublyRobustWithShrinkage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lambda(lambda: Lambda) -> Self {
        Self {
            lambda,
            ..Self::default()
        }
    }

    pub fn lambda(&self) -> Lambda {
        self.lambda
    }
}

impl OffPolicyEstimator for DoublyRobustWithShrinkage {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        let v = check_ope_inputs(input, RewardModelUsage::Required)?;
        Ok(doubly_robust(&v, |w| self.lambda.shrink(w)))
    }
}

/// Renames an estimator so several configurations can share one evaluation.
pub trait WithEstimatorName: Sized {
    fn with_estimator_name(self, name: impl Into<String>) -> Self;
}

macro_rules! impl_with_estimator_name {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl WithEstimatorName for $ty {
                fn with_estimator_name(mut self, name: impl Into<String>) -> Self {
                    self.estimator_name = name.into();
                    self
                }
            }
        )+
    };
}

impl_with_estimator_name!(
    NaiveEstimator,
    ReplayMethod,
    DirectMethod,
    InverseProbabilityWeighting,
    SelfNormalizedInverseProbabilityWeighting,
    DoublyRobust,
    SelfNormalizedDoublyRobust,
    SwitchDoublyRobust,
    DoublyRobustWithShrinkage,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::NdArray;

    struct Fixture {
        action_dist: NdArray<f64>,
        action: NdArray<i64>,
        reward: NdArray<f64>,
        pscore: NdArray<f64>,
        q_hat: NdArray<f64>,
    }

    impl Fixture {
        // Two rounds, two actions, one slot. Weights are 1.6 and 0.5.
        fn new() -> Self {
            Self {
                action_dist: NdArray::from_nested(vec![
                    vec![vec![0.8], vec![0.2]],
                    vec![vec![0.5], vec![0.5]],
                ])
                .unwrap(),
                action: NdArray::from_vec(vec![0, 1]),
                reward: NdArray::from_vec(vec![1.0, 0.0]),
                pscore: NdArray::from_vec(vec![0.5, 1.0]),
                q_hat: NdArray::from_nested(vec![
                    vec![vec![0.6], vec![0.2]],
                    vec![vec![0.4], vec![0.4]],
                ])
                .unwrap(),
            }
        }

        fn input(&self) -> EstimatorInput<'_> {
            EstimatorInput::new(&self.action_dist, &self.action, &self.reward, &self.pscore)
                .with_reward_model(Some(&self.q_hat))
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_ipw_and_clipping() {
        let fx = Fixture::new();
        assert_close(
            InverseProbabilityWeighting::new()
                .estimate_policy_value(&fx.input())
                .unwrap(),
            (1.6 * 1.0 + 0.5 * 0.0) / 2.0,
        );
        assert_close(
            InverseProbabilityWeighting::with_lambda(Lambda::Finite(1.0))
                .estimate_policy_value(&fx.input())
                .unwrap(),
            0.5,
        );
    }

    #[test]
    fn test_snipw_normalizes_by_mean_weight() {
        let fx = Fixture::new();
        let mean_w = (1.6 + 0.5) / 2.0;
        assert_close(
            SelfNormalizedInverseProbabilityWeighting::new()
                .estimate_policy_value(&fx.input())
                .unwrap(),
            (1.6 / mean_w) / 2.0,
        );
    }

    #[test]
    fn test_dm_and_dr() {
        let fx = Fixture::new();
        // model values: 0.8*0.6 + 0.2*0.2 = 0.52 and 0.4
        let dm = DirectMethod::new().estimate_policy_value(&fx.input()).unwrap();
        assert_close(dm, (0.52 + 0.4) / 2.0);

        let dr = DoublyRobust::new().estimate_policy_value(&fx.input()).unwrap();
        let expected = ((0.52 + 1.6 * (1.0 - 0.6)) + (0.4 + 0.5 * (0.0 - 0.4))) / 2.0;
        assert_close(dr, expected);
    }

    #[test]
    fn test_switch_and_shrinkage_limits() {
        let fx = Fixture::new();
        let input = fx.input();
        let dm = DirectMethod::new().estimate_policy_value(&input).unwrap();
        let dr = DoublyRobust::new().estimate_policy_value(&input).unwrap();

        let zero = Lambda::Finite(0.0);
        assert_close(
            SwitchDoublyRobust::with_lambda(Lambda::Unbounded)
                .estimate_policy_value(&input)
                .unwrap(),
            dr,
        );
        assert_close(
            SwitchDoublyRobust::with_lambda(zero)
                .estimate_policy_value(&input)
                .unwrap(),
            dm,
        );
        assert_close(
            DoublyRobustWithShrinkage::with_lambda(Lambda::Unbounded)
                .estimate_policy_value(&input)
                .unwrap(),
            dr,
        );
        assert_close(
            DoublyRobustWithShrinkage::with_lambda(zero)
                .estimate_policy_value(&input)
                .unwrap(),
            dm,
        );

        // Only the first round (w = 1.6) exceeds the threshold.
        let switched = SwitchDoublyRobust::with_lambda(Lambda::Finite(1.0))
            .estimate_policy_value(&input)
            .unwrap();
        assert_close(switched, (0.52 + (0.4 + 0.5 * (0.0 - 0.4))) / 2.0);
    }

    #[test]
    fn test_replay_uses_matching_rounds_only() {
        let fx = Fixture::new();
        // round 0: logged action 0 is greedy; round 1: tie, also a match
        let rm = ReplayMethod::new().estimate_policy_value(&fx.input()).unwrap();
        assert_close(rm, 0.5);
    }

    #[test]
    fn test_naive_and_renaming() {
        let fx = Fixture::new();
        let mut naive = NaiveEstimator::new().with_estimator_name("baseline");
        assert_eq!(naive.estimator_name(), "baseline");
        assert_close(naive.estimate_policy_value(&fx.input()).unwrap(), 0.5);
    }

    #[test]
    fn test_interval_mean_matches_point_estimate() {
        let fx = Fixture::new();
        let mut dr = DoublyRobust::new();
        let params = IntervalParams::new(0.05, 50, Some(7));
        let ci = dr.estimate_interval(&fx.input(), &params).unwrap();
        let point = dr.estimate_policy_value(&fx.input()).unwrap();
        assert_close(ci.mean, point);
        assert!(ci.lower <= ci.mean && ci.mean <= ci.upper);
    }
}
