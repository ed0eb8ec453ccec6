// src/ope/types.rs
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::array::NdArray;
use crate::error::{OpeError, OpeResult};

/// Variance-control hyperparameter of the clipping, switching and shrinkage
/// estimators. `Unbounded` is the no-regularization limit.
#[derive(Debug, Clone, Copy, Default)]
pub enum Lambda {
    Finite(f64),
    #[default]
    Unbounded,
}

impl Lambda {
    pub fn new(value: f64) -> OpeResult<Self> {
        if value.is_nan() {
            return Err(OpeError::Value("`lambda_` must not be NaN".to_string()));
        }
        if value == f64::INFINITY {
            return Ok(Lambda::Unbounded);
        }
        if value < 0.0 {
            return Err(OpeError::Value(format!(
                "`lambda_`= {:?}, must be >= 0.0",
                value
            )));
        }
        // normalizes -0.0
        Ok(Lambda::Finite(value + 0.0))
    }

    /// `min(weight, lambda)`
    pub fn clip(&self, weight: f64) -> f64 {
        match self {
            Lambda::Finite(l) => weight.min(*l),
            Lambda::Unbounded => weight,
        }
    }

    /// `weight` when it does not exceed `lambda`, otherwise 0.
    pub fn switch(&self, weight: f64) -> f64 {
        match self {
            Lambda::Finite(l) if weight > *l => 0.0,
            _ => weight,
        }
    }

    /// `weight * lambda / (weight^2 + lambda)`
    pub fn shrink(&self, weight: f64) -> f64 {
        match self {
            Lambda::Finite(l) if *l == 0.0 => 0.0,
            Lambda::Finite(l) => weight * l / (weight * weight + l),
            Lambda::Unbounded => weight,
        }
    }
}

impl PartialEq for Lambda {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Lambda {}

impl PartialOrd for Lambda {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Lambda {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Lambda::Finite(a), Lambda::Finite(b)) => a.total_cmp(b),
            (Lambda::Finite(_), Lambda::Unbounded) => Ordering::Less,
            (Lambda::Unbounded, Lambda::Finite(_)) => Ordering::Greater,
            (Lambda::Unbounded, Lambda::Unbounded) => Ordering::Equal,
        }
    }
}

impl Hash for Lambda {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Lambda::Finite(v) => {
                0u8.hash(state);
                v.to_bits().hash(state);
            }
            Lambda::Unbounded => 1u8.hash(state),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lambda::Finite(v) => write!(f, "{}", v),
            Lambda::Unbounded => write!(f, "inf"),
        }
    }
}

impl Serialize for Lambda {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Lambda::Finite(v) => serializer.serialize_f64(*v),
            Lambda::Unbounded => serializer.serialize_str("inf"),
        }
    }
}

impl<'de> Deserialize<'de> for Lambda {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawLambda {
            Number(f64),
            Text(String),
        }

        match RawLambda::deserialize(deserializer)? {
            RawLambda::Number(v) => Lambda::new(v).map_err(serde::de::Error::custom),
            RawLambda::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "inf" | "infinity" => Ok(Lambda::Unbounded),
                other => Err(serde::de::Error::custom(format!(
                    "'{}' is not a valid lambda value",
                    other
                ))),
            },
        }
    }
}

/// Round-level inputs shared by every estimator call.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorInput<'a> {
    pub action_dist: &'a NdArray<f64>,
    pub action: &'a NdArray<i64>,
    pub reward: &'a NdArray<f64>,
    pub pscore: &'a NdArray<f64>,
    pub position: Option<&'a NdArray<i64>>,
    pub estimated_rewards_by_reg_model: Option<&'a NdArray<f64>>,
}

impl<'a> EstimatorInput<'a> {
    pub fn new(
        action_dist: &'a NdArray<f64>,
        action: &'a NdArray<i64>,
        reward: &'a NdArray<f64>,
        pscore: &'a NdArray<f64>,
    ) -> Self {
        Self {
            action_dist,
            action,
            reward,
            pscore,
            position: None,
            estimated_rewards_by_reg_model: None,
        }
    }

    pub fn with_position(mut self, position: Option<&'a NdArray<i64>>) -> Self {
        self.position = position;
        self
    }

    pub fn with_reward_model(mut self, estimated_rewards: Option<&'a NdArray<f64>>) -> Self {
        self.estimated_rewards_by_reg_model = estimated_rewards;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_infinity_becomes_unbounded() {
        assert_eq!(Lambda::new(f64::INFINITY).unwrap(), Lambda::Unbounded);
        assert!(Lambda::new(f64::NAN).is_err());
        let err = Lambda::new(-1.0).unwrap_err();
        assert_eq!(err.to_string(), "`lambda_`= -1.0, must be >= 0.0");
    }

    #[test]
    fn test_ordering_puts_unbounded_last() {
        let mut scores = BTreeMap::new();
        for v in [10000.0, f64::INFINITY, 1.0, 100.0] {
            scores.insert(Lambda::new(v).unwrap(), v);
        }
        let keys: Vec<String> = scores.keys().map(|l| l.to_string()).collect();
        assert_eq!(keys, vec!["1", "100", "10000", "inf"]);
    }

    #[test]
    fn test_weight_transforms_reach_their_limits() {
        let w = 3.0;
        assert_eq!(Lambda::Unbounded.clip(w), w);
        assert_eq!(Lambda::Unbounded.switch(w), w);
        assert_eq!(Lambda::Unbounded.shrink(w), w);
        let zero = Lambda::new(0.0).unwrap();
        assert_eq!(zero.switch(w), 0.0);
        assert_eq!(zero.shrink(w), 0.0);
        assert_eq!(zero.shrink(0.0), 0.0);
        assert_eq!(Lambda::Finite(2.0).clip(w), 2.0);
        assert!((Lambda::Finite(1.0).shrink(w) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_serde_round_trip_of_unbounded() {
        let lambdas = vec![Lambda::Finite(1.0), Lambda::Unbounded];
        let json = serde_json::to_string(&lambdas).unwrap();
        assert_eq!(json, "[1.0,\"inf\"]");
        let parsed: Vec<Lambda> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, lambdas);
    }
}
