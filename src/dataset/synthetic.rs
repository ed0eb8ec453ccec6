// src/dataset/synthetic.rs
use log::debug;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;

use super::BanditFeedback;
use crate::array::NdArray;
use crate::error::{OpeError, OpeResult};

/// Logistic-reward synthetic bandit environment.
///
/// Contexts are uniform on `[-1, 1]^dim_context`, the expected reward of an
/// action is `sigmoid(x . coef_a + intercept_a)` and the behavior policy is
/// `softmax(beta * expected_reward)`. Rewards are Bernoulli.
#[derive(Debug, Clone)]
pub struct SyntheticBanditDataset {
    n_actions: usize,
    dim_context: usize,
    beta: f64,
    coef: Vec<f64>,
    intercept: Vec<f64>,
    rng: ChaCha8Rng,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / total).collect()
}

impl SyntheticBanditDataset {
    pub fn new(n_actions: usize, dim_context: usize, beta: f64, random_state: u64) -> OpeResult<Self> {
        if n_actions < 2 {
            return Err(OpeError::Value(format!(
                "`n_actions`= {}, must be >= 2",
                n_actions
            )));
        }
        if dim_context < 1 {
            return Err(OpeError::Value(format!(
                "`dim_context`= {}, must be >= 1",
                dim_context
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(random_state);
        let coef = (0..n_actions * dim_context)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        let intercept = (0..n_actions).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Ok(Self {
            n_actions,
            dim_context,
            beta,
            coef,
            intercept,
            rng,
        })
    }

    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    fn expected_rewards_for(&self, context: &[f64]) -> Vec<f64> {
        (0..self.n_actions)
            .map(|a| {
                let coef = &self.coef[a * self.dim_context..(a + 1) * self.dim_context];
                let logit: f64 = context.iter().zip(coef).map(|(x, c)| x * c).sum();
                sigmoid(logit + self.intercept[a])
            })
            .collect()
    }

    /// Samples a fresh batch of single-slot logged feedback.
    pub fn obtain_batch_bandit_feedback(&mut self, n_rounds: usize) -> OpeResult<BanditFeedback> {
        if n_rounds < 1 {
            return Err(OpeError::Value(format!(
                "`n_rounds`= {}, must be >= 1",
                n_rounds
            )));
        }
        let mut context = Vec::with_capacity(n_rounds * self.dim_context);
        let mut expected_reward = Vec::with_capacity(n_rounds * self.n_actions);
        let mut action = Vec::with_capacity(n_rounds);
        let mut reward = Vec::with_capacity(n_rounds);
        let mut pscore = Vec::with_capacity(n_rounds);

        for _ in 0..n_rounds {
            let x: Vec<f64> = (0..self.dim_context)
                .map(|_| self.rng.gen_range(-1.0..1.0))
                .collect();
            let q = self.expected_rewards_for(&x);
            let logits: Vec<f64> = q.iter().map(|v| self.beta * v).collect();
            let behavior = softmax(&logits);

            let u: f64 = self.rng.r#gen();
            let mut cumulative = 0.0;
            let mut chosen = self.n_actions - 1;
            for (a, p) in behavior.iter().enumerate() {
                cumulative += p;
                if u < cumulative {
                    chosen = a;
                    break;
                }
            }

            let r = if self.rng.r#gen::<f64>() < q[chosen] { 1.0 } else { 0.0 };
            action.push(chosen as i64);
            reward.push(r);
            pscore.push(behavior[chosen]);
            context.extend(x);
            expected_reward.extend(q);
        }

        debug!(
            "Sampled {} rounds of synthetic feedback with {} actions",
            n_rounds, self.n_actions
        );

        Ok(BanditFeedback {
            n_rounds,
            n_actions: self.n_actions,
            action: NdArray::from_vec(action),
            reward: NdArray::from_vec(reward),
            pscore: NdArray::from_vec(pscore),
            position: None,
            context: Some(NdArray::from_shape_vec(
                vec![n_rounds, self.dim_context],
                context,
            )?),
            expected_reward: Some(NdArray::from_shape_vec(
                vec![n_rounds, self.n_actions],
                expected_reward,
            )?),
        })
    }
}

/// Policy value from known expected rewards, weighted by the first slot of `action_dist`.
pub fn calc_ground_truth_policy_value(
    expected_reward: &NdArray<f64>,
    action_dist: &NdArray<f64>,
) -> OpeResult<f64> {
    if expected_reward.ndim() != 2 || action_dist.ndim() != 3 {
        return Err(OpeError::Shape(
            "expected_reward must be 2D and action_dist must be 3D".to_string(),
        ));
    }
    if expected_reward.shape() != &action_dist.shape()[..2] {
        return Err(OpeError::Shape(
            "Expected `expected_reward.shape == action_dist.shape[:2]`, but found it False"
                .to_string(),
        ));
    }
    let (n_rounds, n_actions) = (expected_reward.shape()[0], expected_reward.shape()[1]);
    let q = expected_reward.as_slice();
    let total: f64 = (0..n_rounds)
        .map(|i| {
            (0..n_actions)
                .map(|a| action_dist.get3(i, a, 0) * q[i * n_actions + a])
                .sum::<f64>()
        })
        .sum();
    Ok(total / n_rounds as f64)
}

/// Evaluation policy choosing every action with equal probability at every slot.
pub fn uniform_action_dist(n_rounds: usize, n_actions: usize, len_list: usize) -> NdArray<f64> {
    NdArray::full(vec![n_rounds, n_actions, len_list], 1.0 / n_actions as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_is_reproducible_and_consistent() {
        let mut first = SyntheticBanditDataset::new(4, 3, -2.0, 7).unwrap();
        let mut second = SyntheticBanditDataset::new(4, 3, -2.0, 7).unwrap();
        let a = first.obtain_batch_bandit_feedback(200).unwrap();
        let b = second.obtain_batch_bandit_feedback(200).unwrap();
        assert_eq!(a.action, b.action);
        assert_eq!(a.reward, b.reward);

        assert_eq!(a.action.len(), 200);
        assert!(a.pscore.as_slice().iter().all(|p| *p > 0.0 && *p <= 1.0));
        assert!(a.action.as_slice().iter().all(|x| (0..4).contains(x)));
        assert_eq!(a.expected_reward.as_ref().unwrap().shape(), &[200, 4]);
    }

    #[test]
    fn test_ground_truth_of_uniform_policy_is_mean_expected_reward() {
        let q = NdArray::from_shape_vec(vec![2, 2], vec![0.2, 0.4, 0.6, 1.0]).unwrap();
        let dist = uniform_action_dist(2, 2, 1);
        let value = calc_ground_truth_policy_value(&q, &dist).unwrap();
        assert!((value - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        assert!(SyntheticBanditDataset::new(1, 3, -2.0, 0).is_err());
        assert!(SyntheticBanditDataset::new(3, 0, -2.0, 0).is_err());
    }
}
