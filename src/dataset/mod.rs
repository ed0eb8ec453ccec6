// src/dataset/mod.rs
use serde::{Deserialize, Serialize};

use crate::array::NdArray;

pub mod synthetic;

pub use synthetic::{SyntheticBanditDataset, calc_ground_truth_policy_value, uniform_action_dist};

/// Logged bandit feedback collected by the behavior policy.
///
/// Estimation only reads `action`, `reward`, `pscore` and `position`; the
/// remaining fields travel with the log for reward models and benchmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditFeedback {
    pub n_rounds: usize,
    pub n_actions: usize,
    pub action: NdArray<i64>,
    pub reward: NdArray<f64>,
    pub pscore: NdArray<f64>,
    #[serde(default)]
    pub position: Option<NdArray<i64>>,
    #[serde(default)]
    pub context: Option<NdArray<f64>>,
    /// Mean reward of every (round, action), shape (n_rounds, n_actions). Synthetic data only.
    #[serde(default)]
    pub expected_reward: Option<NdArray<f64>>,
}

impl BanditFeedback {
    /// Average observed reward, i.e. the on-policy value of the behavior policy.
    pub fn behavior_policy_value(&self) -> f64 {
        let rewards = self.reward.as_slice();
        if rewards.is_empty() {
            return 0.0;
        }
        rewards.iter().sum::<f64>() / rewards.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logged_feedback_with_inconsistent_array_is_rejected() {
        let logged = r#"{
            "n_rounds": 2,
            "n_actions": 2,
            "action": {"shape": [2], "data": [0, 1]},
            "reward": {"shape": [2], "data": [1.0]},
            "pscore": {"shape": [2], "data": [0.5, 0.5]}
        }"#;
        let err = serde_json::from_str::<BanditFeedback>(logged).unwrap_err();
        assert!(err.to_string().contains("expects 2 elements, but 1 were given"));

        let fixed = logged.replace(r#""data": [1.0]"#, r#""data": [1.0, 0.0]"#);
        let feedback: BanditFeedback = serde_json::from_str(&fixed).unwrap();
        assert!(feedback.position.is_none());
        assert!((feedback.behavior_policy_value() - 0.5).abs() < 1e-12);
    }
}
