// src/ope/estimators_tuning.rs
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::DEFAULT_TUNING_DELTA;
use crate::error::{OpeError, OpeResult};

use super::estimators::{
    DoublyRobust, DoublyRobustWithShrinkage, InverseProbabilityWeighting, OffPolicyEstimator,
    SwitchDoublyRobust, doubly_robust, inverse_probability_weighting,
};
use super::interval::{
    ConfidenceInterval, IntervalParams, estimate_confidence_interval_by_bootstrap, mean, variance,
};
use super::types::{EstimatorInput, Lambda};
use super::validation::{RewardModelUsage, ValidatedInput, check_ope_inputs};

/// Estimator families whose single hyperparameter can be tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TuningFamily {
    InverseProbabilityWeighting,
    DoublyRobust,
    SwitchDoublyRobust,
    DoublyRobustWithShrinkage,
}

impl TuningFamily {
    pub const ALL: [TuningFamily; 4] = [
        TuningFamily::InverseProbabilityWeighting,
        TuningFamily::DoublyRobust,
        TuningFamily::SwitchDoublyRobust,
        TuningFamily::DoublyRobustWithShrinkage,
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            TuningFamily::InverseProbabilityWeighting => "InverseProbabilityWeightingTuning",
            TuningFamily::DoublyRobust => "DoublyRobustTuning",
            TuningFamily::SwitchDoublyRobust => "SwitchDoublyRobustTuning",
            TuningFamily::DoublyRobustWithShrinkage => "DoublyRobustWithShrinkageTuning",
        }
    }

    pub fn default_estimator_name(&self) -> &'static str {
        match self {
            TuningFamily::InverseProbabilityWeighting => "ipw (tuning)",
            TuningFamily::DoublyRobust => "dr (tuning)",
            TuningFamily::SwitchDoublyRobust => "switch-dr (tuning)",
            TuningFamily::DoublyRobustWithShrinkage => "dr-os (tuning)",
        }
    }

    /// The base estimator with a fixed hyperparameter.
    pub fn build(&self, lambda: Lambda) -> Box<dyn OffPolicyEstimator> {
        match self {
            TuningFamily::InverseProbabilityWeighting => {
                Box::new(InverseProbabilityWeighting::with_lambda(lambda))
            }
            TuningFamily::DoublyRobust => Box::new(DoublyRobust::with_lambda(lambda)),
            TuningFamily::SwitchDoublyRobust => Box::new(SwitchDoublyRobust::with_lambda(lambda)),
            TuningFamily::DoublyRobustWithShrinkage => {
                Box::new(DoublyRobustWithShrinkage::with_lambda(lambda))
            }
        }
    }

    fn usage(&self) -> RewardModelUsage {
        match self {
            TuningFamily::InverseProbabilityWeighting => RewardModelUsage::Ignored,
            _ => RewardModelUsage::Required,
        }
    }

    fn weight(&self, lambda: Lambda, w: f64) -> f64 {
        match self {
            TuningFamily::InverseProbabilityWeighting | TuningFamily::DoublyRobust => {
                lambda.clip(w)
            }
            TuningFamily::SwitchDoublyRobust => lambda.switch(w),
            TuningFamily::DoublyRobustWithShrinkage => lambda.shrink(w),
        }
    }

    fn round_rewards(&self, v: &ValidatedInput<'_>, lambda: Lambda) -> Vec<f64> {
        match self {
            TuningFamily::InverseProbabilityWeighting => {
                inverse_probability_weighting(v, |w| self.weight(lambda, w))
            }
            _ => doubly_robust(v, |w| self.weight(lambda, w)),
        }
    }

    /// Per-round gap between the unbounded estimator and the candidate,
    /// `(w - w_hat) * (r - q_hat)`, with `q_hat = 0` for IPW.
    fn bias_terms(&self, v: &ValidatedInput<'_>, lambda: Lambda) -> Vec<f64> {
        let q_factual = v.q_hat_factual();
        v.importance_weights()
            .into_iter()
            .enumerate()
            .map(|(i, w)| (w - self.weight(lambda, w)) * (v.reward[i] - q_factual[i]))
            .collect()
    }
}

/// Empirical Bernstein upper bound on `|E[d]|` holding with probability `1 - delta`.
fn high_probability_bias_upper_bound(bias_terms: &[f64], delta: f64) -> f64 {
    let n = bias_terms.len() as f64;
    let observed = mean(bias_terms).abs();
    if bias_terms.len() < 2 {
        return observed;
    }
    let log_term = (2.0 / delta).ln();
    let bound = bias_terms.iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));
    let sample_variance = variance(bias_terms) * n / (n - 1.0);
    observed + (2.0 * log_term * sample_variance / n).sqrt() + 7.0 * bound * log_term / (3.0 * (n - 1.0))
}

/// Wraps an estimator family and picks its hyperparameter by minimizing an
/// estimated MSE (`bias^2 + variance`) over the candidate list.
///
/// `best_hyperparam` and `estimated_mse_score_dict` describe the most recent
/// call. They are cleared when a call starts and written once the selection
/// finishes, so a failed call leaves them empty.
#[derive(Debug, Clone)]
pub struct OffPolicyEstimatorTuning {
    family: TuningFamily,
    lambdas: Vec<Lambda>,
    use_bias_upper_bound: bool,
    delta: f64,
    estimator_name: String,
    best_hyperparam: Option<Lambda>,
    estimated_mse_score_dict: BTreeMap<Lambda, f64>,
}

impl OffPolicyEstimatorTuning {
    pub fn new(family: TuningFamily, lambdas: &[f64]) -> OpeResult<Self> {
        if lambdas.is_empty() {
            return Err(OpeError::Config("`lambdas` must not be empty".to_string()));
        }
        let lambdas = lambdas
            .iter()
            .map(|&l| Lambda::new(l))
            .collect::<OpeResult<Vec<_>>>()?;
        Ok(Self {
            family,
            lambdas,
            use_bias_upper_bound: true,
            delta: DEFAULT_TUNING_DELTA,
            estimator_name: family.default_estimator_name().to_string(),
            best_hyperparam: None,
            estimated_mse_score_dict: BTreeMap::new(),
        })
    }

    pub fn ipw(lambdas: &[f64]) -> OpeResult<Self> {
        Self::new(TuningFamily::InverseProbabilityWeighting, lambdas)
    }

    pub fn dr(lambdas: &[f64]) -> OpeResult<Self> {
        Self::new(TuningFamily::DoublyRobust, lambdas)
    }

    pub fn switch_dr(lambdas: &[f64]) -> OpeResult<Self> {
        Self::new(TuningFamily::SwitchDoublyRobust, lambdas)
    }

    pub fn dr_os(lambdas: &[f64]) -> OpeResult<Self> {
        Self::new(TuningFamily::DoublyRobustWithShrinkage, lambdas)
    }

    pub fn with_estimator_name(mut self, name: impl Into<String>) -> Self {
        self.estimator_name = name.into();
        self
    }

    /// Uses `|mean bias|` instead of its high-probability upper bound.
    pub fn without_bias_upper_bound(mut self) -> Self {
        self.use_bias_upper_bound = false;
        self
    }

    pub fn with_delta(mut self, delta: f64) -> OpeResult<Self> {
        if !(delta > 0.0 && delta < 1.0) {
            return Err(OpeError::Value(format!(
                "`delta`= {:?}, must be in (0.0, 1.0)",
                delta
            )));
        }
        self.delta = delta;
        Ok(self)
    }

    pub fn family(&self) -> TuningFamily {
        self.family
    }

    pub fn lambdas(&self) -> &[Lambda] {
        &self.lambdas
    }

    pub fn best_hyperparam(&self) -> Option<Lambda> {
        self.best_hyperparam
    }

    pub fn estimated_mse_score_dict(&self) -> &BTreeMap<Lambda, f64> {
        &self.estimated_mse_score_dict
    }

    fn estimated_mse(&self, v: &ValidatedInput<'_>, lambda: Lambda, round_rewards: &[f64]) -> f64 {
        let n = round_rewards.len() as f64;
        let estimated_variance = variance(round_rewards) / n;
        let bias_terms = self.family.bias_terms(v, lambda);
        let estimated_bias = if self.use_bias_upper_bound {
            high_probability_bias_upper_bound(&bias_terms, self.delta)
        } else {
            mean(&bias_terms).abs()
        };
        estimated_bias * estimated_bias + estimated_variance
    }
}

impl OffPolicyEstimator for OffPolicyEstimatorTuning {
    fn estimator_name(&self) -> &str {
        &self.estimator_name
    }

    fn estimate_round_rewards(&mut self, input: &EstimatorInput<'_>) -> OpeResult<Vec<f64>> {
        self.best_hyperparam = None;
        self.estimated_mse_score_dict.clear();

        let v = check_ope_inputs(input, self.family.usage())?;

        let mut scores = BTreeMap::new();
        let mut best: Option<(Lambda, f64, Vec<f64>)> = None;
        for &lambda in &self.lambdas {
            let round_rewards = self.family.round_rewards(&v, lambda);
            let score = self.estimated_mse(&v, lambda, &round_rewards);
            debug!(
                "{}: lambda={} estimated_mse={:.6e}",
                self.estimator_name, lambda, score
            );
            scores.insert(lambda, score);
            let replace = match &best {
                None => true,
                Some((best_lambda, best_score, _)) => {
                    score.total_cmp(best_score).is_lt()
                        || (score == *best_score && lambda < *best_lambda)
                }
            };
            if replace {
                best = Some((lambda, score, round_rewards));
            }
        }

        let Some((best_lambda, best_score, round_rewards)) = best else {
            return Err(OpeError::Config("`lambdas` must not be empty".to_string()));
        };
        debug!(
            "{}: selected lambda={} (estimated_mse={:.6e})",
            self.estimator_name, best_lambda, best_score
        );

        self.best_hyperparam = Some(best_lambda);
        self.estimated_mse_score_dict = scores;
        Ok(round_rewards)
    }

    /// Selection runs before `params` is checked, so the recorded state
    /// always describes this call's input.
    fn estimate_interval(
        &mut self,
        input: &EstimatorInput<'_>,
        params: &IntervalParams,
    ) -> OpeResult<ConfidenceInterval> {
        let round_rewards = self.estimate_round_rewards(input)?;
        params.validate()?;
        estimate_confidence_interval_by_bootstrap(&round_rewards, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::NdArray;

    const LAMBDAS: [f64; 4] = [1.0, 100.0, 10000.0, f64::INFINITY];

    struct Fixture {
        action_dist: NdArray<f64>,
        action: NdArray<i64>,
        reward: NdArray<f64>,
        pscore: NdArray<f64>,
        q_hat: NdArray<f64>,
    }

    impl Fixture {
        // Evaluation policy puts 0.9 on action 0; behavior logged it rarely.
        fn new() -> Self {
            let n_rounds = 40;
            let mut dist = Vec::new();
            let mut action = Vec::new();
            let mut reward = Vec::new();
            let mut pscore = Vec::new();
            for i in 0..n_rounds {
                dist.extend([0.9, 0.1]);
                let a = if i % 4 == 0 { 0 } else { 1 };
                action.push(a);
                reward.push(if i % 3 == 0 { 1.0 } else { 0.0 });
                pscore.push(if a == 0 { 0.25 } else { 0.75 });
            }
            Self {
                action_dist: NdArray::from_shape_vec(vec![n_rounds, 2, 1], dist).unwrap(),
                action: NdArray::from_vec(action),
                reward: NdArray::from_vec(reward),
                pscore: NdArray::from_vec(pscore),
                q_hat: NdArray::full(vec![n_rounds, 2, 1], 0.3),
            }
        }

        fn input(&self) -> EstimatorInput<'_> {
            EstimatorInput::new(&self.action_dist, &self.action, &self.reward, &self.pscore)
                .with_reward_model(Some(&self.q_hat))
        }
    }

    #[test]
    fn test_selection_state_is_populated_for_every_family() {
        let fx = Fixture::new();
        for family in TuningFamily::ALL {
            let mut tuning = OffPolicyEstimatorTuning::new(family, &LAMBDAS).unwrap();
            assert!(tuning.best_hyperparam().is_none());
            let value = tuning.estimate_policy_value(&fx.input()).unwrap();
            let best = tuning.best_hyperparam().unwrap();
            assert!(tuning.lambdas().contains(&best));
            assert_eq!(tuning.estimated_mse_score_dict().len(), 4);

            let best_score = tuning.estimated_mse_score_dict()[&best];
            assert!(
                tuning
                    .estimated_mse_score_dict()
                    .values()
                    .all(|s| *s >= best_score)
            );

            let mut base = family.build(best);
            let expected = base.estimate_policy_value(&fx.input()).unwrap();
            assert!((value - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_ties_resolve_to_smallest_candidate() {
        let fx = Fixture::new();
        // All weights are at most 3.6, so every candidate >= 4 is the unclipped estimator.
        let mut tuning = OffPolicyEstimatorTuning::ipw(&[f64::INFINITY, 100.0, 4.0]).unwrap();
        tuning.estimate_policy_value(&fx.input()).unwrap();
        assert_eq!(tuning.best_hyperparam(), Some(Lambda::Finite(4.0)));
    }

    #[test]
    fn test_state_is_reset_when_validation_fails() {
        let fx = Fixture::new();
        let mut tuning = OffPolicyEstimatorTuning::dr(&LAMBDAS).unwrap();
        tuning.estimate_policy_value(&fx.input()).unwrap();
        assert!(tuning.best_hyperparam().is_some());

        let bad_dist = NdArray::full(vec![40, 2, 1], 1.0);
        let bad_input = EstimatorInput::new(&bad_dist, &fx.action, &fx.reward, &fx.pscore)
            .with_reward_model(Some(&fx.q_hat));
        let err = tuning.estimate_policy_value(&bad_input).unwrap_err();
        assert_eq!(err.to_string(), "action_dist must be a probability distribution");
        assert!(tuning.best_hyperparam().is_none());
        assert!(tuning.estimated_mse_score_dict().is_empty());
    }

    #[test]
    fn test_interval_call_with_bad_alpha_still_records_selection() {
        let first = Fixture::new();
        let mut second = Fixture::new();
        second.q_hat = NdArray::full(vec![40, 2, 1], 0.7);

        let mut tuning = OffPolicyEstimatorTuning::dr(&LAMBDAS).unwrap();
        tuning.estimate_policy_value(&first.input()).unwrap();
        let first_scores = tuning.estimated_mse_score_dict().clone();

        let bad_alpha = IntervalParams::new(-1.0, 10, Some(1));
        let err = tuning
            .estimate_interval(&second.input(), &bad_alpha)
            .unwrap_err();
        assert_eq!(err.to_string(), "`alpha`= -1.0, must be >= 0.0");

        let mut fresh = OffPolicyEstimatorTuning::dr(&LAMBDAS).unwrap();
        fresh.estimate_policy_value(&second.input()).unwrap();
        assert_eq!(tuning.best_hyperparam(), fresh.best_hyperparam());
        assert_eq!(tuning.estimated_mse_score_dict(), fresh.estimated_mse_score_dict());
        assert_ne!(tuning.estimated_mse_score_dict(), &first_scores);
    }

    #[test]
    fn test_invalid_candidates_are_rejected() {
        assert!(OffPolicyEstimatorTuning::dr(&[]).is_err());
        assert!(OffPolicyEstimatorTuning::dr(&[1.0, -5.0]).is_err());
        assert!(
            OffPolicyEstimatorTuning::dr(&LAMBDAS)
                .unwrap()
                .with_delta(1.5)
                .is_err()
        );
    }

    #[test]
    fn test_unbounded_candidate_has_zero_bias() {
        let fx = Fixture::new();
        let v = check_ope_inputs(&fx.input(), RewardModelUsage::Required).unwrap();
        let terms = TuningFamily::DoublyRobust.bias_terms(&v, Lambda::Unbounded);
        assert!(terms.iter().all(|d| *d == 0.0));
        assert_eq!(high_probability_bias_upper_bound(&terms, 0.05), 0.0);
    }
}
