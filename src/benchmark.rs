// src/benchmark.rs
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::array::NdArray;
use crate::config::BenchmarkConfig;
use crate::dataset::{BanditFeedback, SyntheticBanditDataset, calc_ground_truth_policy_value};
use crate::error::OpeResult;
use crate::ope::{
    DirectMethod, DoublyRobust, DoublyRobustWithShrinkage, EvaluationMetric,
    InverseProbabilityWeighting, Lambda, NaiveEstimator, OffPolicyEstimator,
    OffPolicyEstimatorTuning, OffPolicyEvaluation, SelfNormalizedDoublyRobust,
    SelfNormalizedInverseProbabilityWeighting, SwitchDoublyRobust, WithEstimatorName,
};

// Exploration rate of the stand-in evaluation policy
const EVALUATION_EPSILON: f64 = 0.3;

const BENCHMARK_TUNING_LAMBDAS: [f64; 3] = [100.0, 1000.0, f64::INFINITY];

/// Error distribution of one estimator across repetitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EstimatorErrorStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl EstimatorErrorStats {
    fn from_errors(errors: &[f64]) -> Self {
        let count = errors.len();
        if count == 0 {
            return Self {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
                count,
            };
        }
        let mean = errors.iter().sum::<f64>() / count as f64;
        let var = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / count as f64;
        Self {
            mean,
            std: var.sqrt(),
            min: errors.iter().cloned().fold(f64::INFINITY, f64::min),
            max: errors.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub n_runs: usize,
    pub metric: EvaluationMetric,
    pub estimators: BTreeMap<String, EstimatorErrorStats>,
}

impl BenchmarkReport {
    pub fn from_runs(metric: EvaluationMetric, runs: &[HashMap<String, f64>]) -> Self {
        let mut errors: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for run in runs {
            for (name, error) in run {
                errors.entry(name.clone()).or_default().push(*error);
            }
        }
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            n_runs: runs.len(),
            metric,
            estimators: errors
                .into_iter()
                .map(|(name, errs)| (name, EstimatorErrorStats::from_errors(&errs)))
                .collect(),
        }
    }
}

/// Runs `experiment` once per seed `base_seed + i` (wrapping) on the blocking pool.
///
/// Results come back in repetition order. The first failing repetition fails
/// the batch.
pub async fn run_repetitions<F>(
    n_runs: usize,
    base_seed: u64,
    experiment: F,
) -> Result<Vec<HashMap<String, f64>>>
where
    F: Fn(u64) -> Result<HashMap<String, f64>> + Send + Sync + 'static,
{
    let experiment = Arc::new(experiment);
    let mut tasks: Vec<JoinHandle<Result<HashMap<String, f64>>>> = Vec::with_capacity(n_runs);
    for idx in 0..n_runs {
        let experiment = Arc::clone(&experiment);
        let seed = base_seed.wrapping_add(idx as u64);
        tasks.push(tokio::task::spawn_blocking(move || {
            (*experiment)(seed)
                .with_context(|| format!("Benchmark repetition {} (seed {}) failed", idx, seed))
        }));
    }

    let joined = match try_join_all(tasks).await {
        Ok(results) => results,
        Err(join_err) => {
            warn!("A benchmark repetition panicked or was cancelled: {:?}", join_err);
            return Err(anyhow!(join_err).context("Benchmark repetition did not complete"));
        }
    };

    let mut runs = Vec::with_capacity(joined.len());
    for result in joined {
        match result {
            Ok(run) => runs.push(run),
            Err(e) => {
                warn!("{:#}", e);
                return Err(e);
            }
        }
    }
    Ok(runs)
}

/// Estimators compared by the synthetic benchmark.
pub fn standard_benchmark_estimators() -> OpeResult<Vec<Box<dyn OffPolicyEstimator>>> {
    let small = Lambda::new(1.0)?;
    let large = Lambda::new(100.0)?;
    let estimators: Vec<Box<dyn OffPolicyEstimator>> = vec![
        Box::new(NaiveEstimator::new()),
        Box::new(DirectMethod::new()),
        Box::new(InverseProbabilityWeighting::new()),
        Box::new(OffPolicyEstimatorTuning::ipw(&BENCHMARK_TUNING_LAMBDAS)?),
        Box::new(SelfNormalizedInverseProbabilityWeighting::new()),
        Box::new(DoublyRobust::new()),
        Box::new(OffPolicyEstimatorTuning::dr(&BENCHMARK_TUNING_LAMBDAS)?),
        Box::new(SelfNormalizedDoublyRobust::new()),
        Box::new(SwitchDoublyRobust::with_lambda(small).with_estimator_name("switch-dr (lambda=1)")),
        Box::new(SwitchDoublyRobust::with_lambda(large).with_estimator_name("switch-dr (lambda=100)")),
        Box::new(OffPolicyEstimatorTuning::switch_dr(&BENCHMARK_TUNING_LAMBDAS)?),
        Box::new(DoublyRobustWithShrinkage::with_lambda(small).with_estimator_name("dr-os (lambda=1)")),
        Box::new(DoublyRobustWithShrinkage::with_lambda(large).with_estimator_name("dr-os (lambda=100)")),
        Box::new(OffPolicyEstimatorTuning::dr_os(&BENCHMARK_TUNING_LAMBDAS)?),
    ];
    Ok(estimators)
}

/// Epsilon-greedy policy over the true expected rewards, shape (n_rounds, n_actions, 1).
pub fn epsilon_greedy_action_dist(expected_reward: &NdArray<f64>, epsilon: f64) -> OpeResult<NdArray<f64>> {
    let (n_rounds, n_actions) = (expected_reward.shape()[0], expected_reward.shape()[1]);
    let q = expected_reward.as_slice();
    let mut dist = Vec::with_capacity(n_rounds * n_actions);
    for i in 0..n_rounds {
        let row = &q[i * n_actions..(i + 1) * n_actions];
        let mut best = 0;
        for (a, v) in row.iter().enumerate() {
            if *v > row[best] {
                best = a;
            }
        }
        for a in 0..n_actions {
            let greedy = if a == best { 1.0 - epsilon } else { 0.0 };
            dist.push(epsilon / n_actions as f64 + greedy);
        }
    }
    NdArray::from_shape_vec(vec![n_rounds, n_actions, 1], dist)
}

/// Reward model predicting the observed mean reward of each action,
/// falling back to the overall mean for actions never logged.
pub fn per_action_mean_reward_model(feedback: &BanditFeedback) -> OpeResult<NdArray<f64>> {
    let n_actions = feedback.n_actions;
    let mut sums = vec![0.0; n_actions];
    let mut counts = vec![0usize; n_actions];
    for (a, r) in feedback.action.as_slice().iter().zip(feedback.reward.as_slice()) {
        let a = *a as usize;
        if a < n_actions {
            sums[a] += r;
            counts[a] += 1;
        }
    }
    let overall = feedback.behavior_policy_value();
    let per_action: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, c)| if *c > 0 { s / *c as f64 } else { overall })
        .collect();
    let mut data = Vec::with_capacity(feedback.n_rounds * n_actions);
    for _ in 0..feedback.n_rounds {
        data.extend_from_slice(&per_action);
    }
    NdArray::from_shape_vec(vec![feedback.n_rounds, n_actions, 1], data)
}

/// One repetition: sample logged data, evaluate the epsilon-greedy policy, and
/// score every estimator against the known ground truth.
pub fn run_synthetic_experiment(config: &BenchmarkConfig, seed: u64) -> Result<HashMap<String, f64>> {
    let mut dataset =
        SyntheticBanditDataset::new(config.n_actions, config.dim_context, config.beta, seed)
            .context("Failed to build synthetic dataset")?;
    let feedback = dataset
        .obtain_batch_bandit_feedback(config.n_rounds)
        .context("Failed to sample bandit feedback")?;
    let expected_reward = feedback
        .expected_reward
        .clone()
        .ok_or_else(|| anyhow!("synthetic feedback carries no expected rewards"))?;

    let action_dist = epsilon_greedy_action_dist(&expected_reward, EVALUATION_EPSILON)?;
    let reward_model = per_action_mean_reward_model(&feedback)?;
    let ground_truth = calc_ground_truth_policy_value(&expected_reward, &action_dist)?;

    let mut ope = OffPolicyEvaluation::new(feedback, standard_benchmark_estimators()?)?;
    let errors = ope.evaluate_performance_of_estimators(
        ground_truth,
        &action_dist,
        Some(&reward_model),
        EvaluationMetric::RelativeEe,
    )?;
    Ok(errors)
}

pub async fn run_synthetic_benchmark(config: BenchmarkConfig) -> Result<BenchmarkReport> {
    let start_time = Instant::now();
    info!(
        "Running {} synthetic repetitions ({} rounds, {} actions, dim_context {})",
        config.n_runs, config.n_rounds, config.n_actions, config.dim_context
    );
    let n_runs = config.n_runs;
    let base_seed = config.base_seed;
    let shared = Arc::new(config);
    let runs = run_repetitions(n_runs, base_seed, move |seed| {
        run_synthetic_experiment(&shared, seed)
    })
    .await?;
    let report = BenchmarkReport::from_runs(EvaluationMetric::RelativeEe, &runs);
    info!(
        "Benchmark {} finished in {:.2?}",
        report.run_id,
        start_time.elapsed()
    );
    Ok(report)
}
