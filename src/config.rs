// src/config.rs
use log::warn;
use serde::{Deserialize, Serialize};

// Bootstrap interval defaults
pub const DEFAULT_ALPHA: f64 = 0.05;
pub const DEFAULT_N_BOOTSTRAP_SAMPLES: usize = 10000;

// Allowed deviation of an action distribution slice from summing to 1
pub const PROB_SUM_TOLERANCE: f64 = 1e-6;

// Confidence level of the high-probability bias bound used by tuning estimators
pub const DEFAULT_TUNING_DELTA: f64 = 0.05;

// Candidate hyperparameters used when none are supplied
pub const DEFAULT_TUNING_LAMBDAS: [f64; 4] = [1.0, 100.0, 10000.0, f64::INFINITY];

/// Settings for the synthetic benchmark binary, read from `OPE_*` variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub n_runs: usize,
    pub n_rounds: usize,
    pub n_actions: usize,
    pub dim_context: usize,
    pub beta: f64,
    pub base_seed: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            n_runs: 10,
            n_rounds: 1000,
            n_actions: 5,
            dim_context: 3,
            beta: -2.0,
            base_seed: 12345,
        }
    }
}

impl BenchmarkConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            n_runs: env_or("OPE_N_RUNS", defaults.n_runs),
            n_rounds: env_or("OPE_N_ROUNDS", defaults.n_rounds),
            n_actions: env_or("OPE_N_ACTIONS", defaults.n_actions),
            dim_context: env_or("OPE_DIM_CONTEXT", defaults.dim_context),
            beta: env_or("OPE_BETA", defaults.beta),
            base_seed: env_or("OPE_BASE_SEED", defaults.base_seed),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid value '{}' for {}, using {}", raw, key, default);
                default
            }
        },
        Err(_) => default,
    }
}
