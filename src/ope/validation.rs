// src/ope/validation.rs
use crate::array::NdArray;
use crate::config::PROB_SUM_TOLERANCE;
use crate::error::{OpeError, OpeResult};

use super::types::EstimatorInput;

/// Whether an estimator reads the reward model's predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RewardModelUsage {
    Required,
    Ignored,
}

/// Inputs that passed every check, with positions resolved and actions
/// converted to indices.
#[derive(Debug)]
pub(crate) struct ValidatedInput<'a> {
    action_dist: &'a NdArray<f64>,
    estimated_rewards: Option<&'a NdArray<f64>>,
    pub action: Vec<usize>,
    pub reward: &'a [f64],
    pub pscore: &'a [f64],
    pub position: Vec<usize>,
    pub n_rounds: usize,
    pub n_actions: usize,
}

impl ValidatedInput<'_> {
    /// Evaluation policy probability of `action` in round `i` at its logged slot.
    pub fn pi_e(&self, i: usize, action: usize) -> f64 {
        self.action_dist.get3(i, action, self.position[i])
    }

    /// Reward model prediction for `action` in round `i`; 0 when the model is ignored.
    pub fn q_hat(&self, i: usize, action: usize) -> f64 {
        self.estimated_rewards
            .map_or(0.0, |q| q.get3(i, action, self.position[i]))
    }

    pub fn importance_weights(&self) -> Vec<f64> {
        (0..self.n_rounds)
            .map(|i| self.pi_e(i, self.action[i]) / self.pscore[i])
            .collect()
    }

    pub fn q_hat_factual(&self) -> Vec<f64> {
        (0..self.n_rounds)
            .map(|i| self.q_hat(i, self.action[i]))
            .collect()
    }

    /// Model value of the evaluation policy per round: sum over actions of pi_e * q_hat.
    pub fn model_policy_values(&self) -> Vec<f64> {
        (0..self.n_rounds)
            .map(|i| {
                (0..self.n_actions)
                    .map(|a| self.pi_e(i, a) * self.q_hat(i, a))
                    .sum()
            })
            .collect()
    }

    /// True when the logged action is a most probable action of the evaluation policy.
    pub fn matches_greedy_action(&self, i: usize) -> bool {
        let logged = self.pi_e(i, self.action[i]);
        (0..self.n_actions).all(|a| self.pi_e(i, a) <= logged)
    }
}

/// Checks every round-level input before any estimation happens.
pub(crate) fn check_ope_inputs<'a>(
    input: &EstimatorInput<'a>,
    usage: RewardModelUsage,
) -> OpeResult<ValidatedInput<'a>> {
    let action_dist = input.action_dist;
    check_action_dist(action_dist)?;
    let (n_rounds, n_actions, len_list) = (
        action_dist.shape()[0],
        action_dist.shape()[1],
        action_dist.shape()[2],
    );

    let position = check_position(input.position, n_rounds, len_list)?;

    let estimated_rewards = match usage {
        RewardModelUsage::Ignored => None,
        RewardModelUsage::Required => {
            let q = input.estimated_rewards_by_reg_model.ok_or_else(|| {
                OpeError::Missing("estimated_rewards_by_reg_model must be given".to_string())
            })?;
            if q.shape() != action_dist.shape() {
                return Err(OpeError::Shape(
                    "Expected `estimated_rewards_by_reg_model.shape == action_dist.shape`, but found it False"
                        .to_string(),
                ));
            }
            Some(q)
        }
    };

    check_round_array("action", input.action.shape(), n_rounds)?;
    check_round_array("reward", input.reward.shape(), n_rounds)?;
    check_round_array("pscore", input.pscore.shape(), n_rounds)?;

    let mut action = Vec::with_capacity(n_rounds);
    for &a in input.action.as_slice() {
        if a < 0 || a as usize >= n_actions {
            return Err(OpeError::Value(format!(
                "action elements must be non-negative integers smaller than n_actions ({})",
                n_actions
            )));
        }
        action.push(a as usize);
    }

    // also rejects NaN
    if input.pscore.as_slice().iter().any(|p| !(*p > 0.0)) {
        return Err(OpeError::Value("pscore must be positive".to_string()));
    }

    Ok(ValidatedInput {
        action_dist,
        estimated_rewards,
        action,
        reward: input.reward.as_slice(),
        pscore: input.pscore.as_slice(),
        position,
        n_rounds,
        n_actions,
    })
}

fn check_action_dist(action_dist: &NdArray<f64>) -> OpeResult<()> {
    if action_dist.ndim() != 3 {
        return Err(OpeError::Shape("action_dist must be 3D array".to_string()));
    }
    let (n_rounds, n_actions, len_list) = (
        action_dist.shape()[0],
        action_dist.shape()[1],
        action_dist.shape()[2],
    );
    if n_rounds == 0 || n_actions == 0 || len_list == 0 {
        return Err(OpeError::Shape(
            "action_dist must have at least one round, action and slot".to_string(),
        ));
    }
    for i in 0..n_rounds {
        for k in 0..len_list {
            let mut total = 0.0;
            for a in 0..n_actions {
                let p = action_dist.get3(i, a, k);
                if !(0.0..=1.0).contains(&p) {
                    return Err(not_a_distribution());
                }
                total += p;
            }
            if (total - 1.0).abs() > PROB_SUM_TOLERANCE {
                return Err(not_a_distribution());
            }
        }
    }
    Ok(())
}

fn not_a_distribution() -> OpeError {
    OpeError::Value("action_dist must be a probability distribution".to_string())
}

fn check_position(
    position: Option<&NdArray<i64>>,
    n_rounds: usize,
    len_list: usize,
) -> OpeResult<Vec<usize>> {
    let Some(position) = position else {
        if len_list > 1 {
            return Err(OpeError::Missing(format!(
                "position elements must be given when len_list > 1 (action_dist.shape[2] = {})",
                len_list
            )));
        }
        return Ok(vec![0; n_rounds]);
    };

    if position.ndim() != 1 {
        return Err(OpeError::Shape("position must be 1D array".to_string()));
    }
    if position.as_slice().iter().any(|&p| p < 0) {
        return Err(OpeError::Value(
            "position elements must be non-negative integers".to_string(),
        ));
    }
    if position.len() != n_rounds {
        return Err(OpeError::Shape(
            "Expected `position.shape[0] == action_dist.shape[0]`, but found it False".to_string(),
        ));
    }
    if position.as_slice().iter().any(|&p| p as usize >= len_list) {
        return Err(OpeError::Value(format!(
            "position elements must be smaller than len_list ({})",
            len_list
        )));
    }
    Ok(position.as_slice().iter().map(|&p| p as usize).collect())
}

fn check_round_array(name: &str, shape: &[usize], n_rounds: usize) -> OpeResult<()> {
    if shape.len() != 1 {
        return Err(OpeError::Shape(format!("{} must be 1D array", name)));
    }
    if shape[0] != n_rounds {
        return Err(OpeError::Shape(format!(
            "Expected `{}.shape[0] == action_dist.shape[0]`, but found it False",
            name
        )));
    }
    Ok(())
}
