// src/ope/interval.rs
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::{DEFAULT_ALPHA, DEFAULT_N_BOOTSTRAP_SAMPLES};
use crate::error::{OpeError, OpeResult};

/// Settings of the bootstrap confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalParams {
    pub alpha: f64,
    pub n_bootstrap_samples: usize,
    pub random_state: Option<u64>,
}

impl Default for IntervalParams {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            n_bootstrap_samples: DEFAULT_N_BOOTSTRAP_SAMPLES,
            random_state: None,
        }
    }
}

impl IntervalParams {
    pub fn new(alpha: f64, n_bootstrap_samples: usize, random_state: Option<u64>) -> Self {
        Self {
            alpha,
            n_bootstrap_samples,
            random_state,
        }
    }

    pub fn with_random_state(mut self, random_state: u64) -> Self {
        self.random_state = Some(random_state);
        self
    }

    pub fn validate(&self) -> OpeResult<()> {
        if self.alpha.is_nan() || self.alpha < 0.0 {
            return Err(OpeError::Value(format!(
                "`alpha`= {:?}, must be >= 0.0",
                self.alpha
            )));
        }
        if self.alpha > 1.0 {
            return Err(OpeError::Value(format!(
                "`alpha`= {:?}, must be <= 1.0",
                self.alpha
            )));
        }
        if self.n_bootstrap_samples < 1 {
            return Err(OpeError::Value(format!(
                "`n_bootstrap_samples`= {}, must be >= 1",
                self.n_bootstrap_samples
            )));
        }
        Ok(())
    }

    /// Parses loosely typed configuration such as `{"alpha": 0.1, "random_state": 7}`.
    ///
    /// A value of the wrong JSON type is a type error; a well-typed value out
    /// of range is a value error. Missing keys take the defaults.
    pub fn from_json(config: &Value) -> OpeResult<Self> {
        let Value::Object(fields) = config else {
            return Err(OpeError::Type(format!(
                "interval configuration must be an instance of object, not {}",
                json_type_name(config)
            )));
        };
        let mut params = Self::default();

        if let Some(alpha) = fields.get("alpha") {
            params.alpha = alpha.as_f64().ok_or_else(|| {
                OpeError::Type(format!(
                    "`alpha` must be an instance of float, not {}",
                    json_type_name(alpha)
                ))
            })?;
        }

        if let Some(n) = fields.get("n_bootstrap_samples") {
            let raw = n.as_i64().ok_or_else(|| {
                OpeError::Type(format!(
                    "`n_bootstrap_samples` must be an instance of int, not {}",
                    json_type_name(n)
                ))
            })?;
            if raw < 1 {
                return Err(OpeError::Value(format!(
                    "`n_bootstrap_samples`= {}, must be >= 1",
                    raw
                )));
            }
            params.n_bootstrap_samples = raw as usize;
        }

        match fields.get("random_state") {
            None | Some(Value::Null) => {}
            Some(seed) => {
                params.random_state = Some(seed.as_u64().ok_or_else(|| {
                    let shown = match seed {
                        Value::String(s) => format!("'{}'", s),
                        other => other.to_string(),
                    };
                    OpeError::Value(format!(
                        "{} cannot be used to seed a random number generator",
                        shown
                    ))
                })?);
            }
        }

        params.validate()?;
        Ok(params)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Bootstrap estimate of a policy value: the sample mean and a percentile interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    pub alpha: f64,
}

impl ConfidenceInterval {
    pub fn confidence_percent(&self) -> f64 {
        100.0 * (1.0 - self.alpha)
    }

    pub fn lower_label(&self) -> String {
        format!("{:?}% CI (lower)", self.confidence_percent())
    }

    pub fn upper_label(&self) -> String {
        format!("{:?}% CI (upper)", self.confidence_percent())
    }

    /// `{"mean", "95.0% CI (lower)", "95.0% CI (upper)"}` for `alpha = 0.05`.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("mean".to_string(), self.mean),
            (self.lower_label(), self.lower),
            (self.upper_label(), self.upper),
        ])
    }
}

impl Serialize for ConfidenceInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("mean", &self.mean)?;
        map.serialize_entry(&self.lower_label(), &self.lower)?;
        map.serialize_entry(&self.upper_label(), &self.upper)?;
        map.end()
    }
}

pub fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population variance (divides by n).
pub fn variance(samples: &[f64]) -> f64 {
    let m = mean(samples);
    samples.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / samples.len() as f64
}

/// Percentile of sorted data with linear interpolation between closest ranks.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = (q / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (rank.ceil() as usize).min(sorted.len() - 1);
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Nonparametric bootstrap over per-round reward estimates.
///
/// The bounds are widened to contain the sample mean, which only matters for
/// very few resamples.
pub fn estimate_confidence_interval_by_bootstrap(
    samples: &[f64],
    params: &IntervalParams,
) -> OpeResult<ConfidenceInterval> {
    params.validate()?;
    if samples.is_empty() {
        return Err(OpeError::Value("samples must not be empty".to_string()));
    }

    let mut rng = match params.random_state {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let n = samples.len();
    let mut boot_means: Vec<f64> = (0..params.n_bootstrap_samples)
        .map(|_| {
            let total: f64 = (0..n).map(|_| samples[rng.gen_range(0..n)]).sum();
            total / n as f64
        })
        .collect();
    boot_means.sort_by(|a, b| a.total_cmp(b));

    let sample_mean = mean(samples);
    let lower = percentile(&boot_means, 100.0 * (params.alpha / 2.0));
    let upper = percentile(&boot_means, 100.0 * (1.0 - params.alpha / 2.0));

    Ok(ConfidenceInterval {
        mean: sample_mean,
        lower: lower.min(sample_mean),
        upper: upper.max(sample_mean),
        alpha: params.alpha,
    })
}
