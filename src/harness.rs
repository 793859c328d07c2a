//! Monte Carlo harness
//!
//! Repeats simulate → analyze many times to estimate the operating characteristics of
//! an experiment design:
//!
//! - **Power**: share of trials whose lift test rejects at α
//! - **Coverage**: share of trials whose interval contains the true lift
//! - **SRM pass rate**: share of trials whose arm sizes pass the chi-square check
//! - **Lift mean / std**: bias and spread of the estimator
//!
//! Trials run on the rayon pool. Each trial owns its config, random streams and
//! population; rows come back in trial order whatever the scheduling.
//!
//! Seed layout:
//!
//! | mode | seed of trial `i` |
//! |------|-------------------|
//! | repeated | `base + i` |
//! | grid over `n_users` | `base + 10_000 × n_users + i` |
//! | compliance sweep | `base + 1_000_000 × level_index + i` |

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::run_ab_analysis;
use crate::assignment::Variant;
use crate::config::{AnalysisConfig, ExperimentConfig, FailurePolicy, HarnessConfig};
use crate::constants::{COMPLIANCE_SEED_STRIDE, GRID_SEED_STRIDE};
use crate::decay::mean_window_factor;
use crate::errors::{ErrorSummary, Result, SimError};
use crate::metrics::{self, Timer, TRIAL_DURATION};
use crate::simulate::run_experiment;

// =============================================================================
// TRIAL ROWS
// =============================================================================

/// Undefined statistics (NaN) travel as `null` and come back as NaN
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Outcome of one simulated trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRow {
    pub n_users: usize,
    pub seed: u64,
    pub compliance_rate: f64,
    #[serde(with = "nan_as_null")]
    pub lift_hat: f64,
    #[serde(with = "nan_as_null")]
    pub ci_low: f64,
    #[serde(with = "nan_as_null")]
    pub ci_high: f64,
    #[serde(with = "nan_as_null")]
    pub ci_width: f64,
    #[serde(with = "nan_as_null")]
    pub p_value: f64,
    /// `p_value < significance_level`
    pub reject: bool,
    /// Interval contains the harness's true lift
    pub covers: bool,
    /// Interval lies entirely on one side of zero
    pub ci_excludes_zero: bool,
    pub srm_passes: bool,
    /// Realized exposed share of the treatment arm
    #[serde(with = "nan_as_null")]
    pub exposure_rate: f64,
    /// Intention-to-treat lift implied by exposure and novelty decay
    #[serde(with = "nan_as_null")]
    pub predicted_lift: f64,
    /// Set on recorded failures; numeric fields are then NaN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
}

impl TrialRow {
    /// Row for a trial whose analysis failed
    pub fn failed(n_users: usize, cfg: &ExperimentConfig, error: &SimError) -> Self {
        Self {
            n_users,
            seed: cfg.seed,
            compliance_rate: cfg.compliance_rate,
            lift_hat: f64::NAN,
            ci_low: f64::NAN,
            ci_high: f64::NAN,
            ci_width: f64::NAN,
            p_value: f64::NAN,
            reject: false,
            covers: false,
            ci_excludes_zero: false,
            srm_passes: false,
            exposure_rate: f64::NAN,
            predicted_lift: f64::NAN,
            error: Some(error.to_summary()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Write rows as JSON lines, one object per row
pub fn to_json_lines<W: Write>(rows: &[TrialRow], mut writer: W) -> anyhow::Result<()> {
    for row in rows {
        serde_json::to_writer(&mut writer, row)
            .with_context(|| format!("Failed to serialize trial row (seed {})", row.seed))?;
        writer.write_all(b"\n").context("Failed to write trial row")?;
    }
    writer.flush().context("Failed to flush trial rows")?;
    Ok(())
}

// =============================================================================
// STOP FLAG
// =============================================================================

/// Cooperative cancellation shared between a caller and a running sweep
///
/// Trials already running finish; trials not yet started are skipped.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// Runs batches of trials under one [`HarnessConfig`]
#[derive(Debug, Clone)]
pub struct MonteCarloHarness {
    config: HarnessConfig,
    stop: StopFlag,
}

impl MonteCarloHarness {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stop: StopFlag::new(),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Handle for stopping a sweep from another thread
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Simulate and analyze one experiment
    ///
    /// The SRM check always uses the trial's own nominal split.
    pub fn run_trial(&self, n_users: usize, cfg: &ExperimentConfig) -> Result<TrialRow> {
        let population = run_experiment(n_users, cfg)?;

        let analysis_cfg = AnalysisConfig {
            expected_split: cfg.expected_split(),
            ..self.config.analysis.clone()
        };
        let analysis = run_ab_analysis(&population, self.config.outcome, &analysis_cfg)?;

        let exposure_rate = population
            .exposure_rate(Variant::B)?
            .unwrap_or(f64::NAN);
        let predicted_lift = exposure_rate
            * cfg.treatment_abs_lift
            * mean_window_factor(cfg.novelty_decay_k, cfg.experiment_days);

        let ci = analysis.lift_ci;
        let row = TrialRow {
            n_users,
            seed: cfg.seed,
            compliance_rate: cfg.compliance_rate,
            lift_hat: ci.lift,
            ci_low: ci.ci_low,
            ci_high: ci.ci_high,
            ci_width: ci.width(),
            p_value: analysis.test.p_value,
            reject: analysis.rejects(analysis_cfg.significance_level),
            covers: ci.contains(self.config.true_lift),
            ci_excludes_zero: ci.excludes_zero(),
            srm_passes: analysis.srm.passes,
            exposure_rate,
            predicted_lift,
            error: None,
        };

        debug!(
            seed = row.seed,
            n_users,
            lift_hat = row.lift_hat,
            p_value = row.p_value,
            srm_passes = row.srm_passes,
            "Trial complete"
        );
        Ok(row)
    }

    /// `n_trials` trials at one sample size, seeds `base + i`
    pub fn run_repeated_trials(
        &self,
        n_users: usize,
        base_cfg: &ExperimentConfig,
    ) -> Result<Vec<TrialRow>> {
        base_cfg.validate()?;
        let jobs = (0..self.config.n_trials as u64)
            .map(|i| (n_users, base_cfg.with_seed(base_cfg.seed.wrapping_add(i))))
            .collect();

        info!(
            n_users,
            n_trials = self.config.n_trials,
            base_seed = base_cfg.seed,
            "Running repeated trials"
        );
        self.run_batch("repeated", jobs)
    }

    /// `n_trials` trials per sample size, seeds `base + 10_000 × n_users + i`
    pub fn run_grid_sweep(
        &self,
        n_users_grid: &[usize],
        base_cfg: &ExperimentConfig,
    ) -> Result<Vec<TrialRow>> {
        self.check_trials_per_point(GRID_SEED_STRIDE)?;
        base_cfg.validate()?;

        let jobs = n_users_grid
            .iter()
            .flat_map(|&n_users| {
                let offset = GRID_SEED_STRIDE.wrapping_mul(n_users as u64);
                (0..self.config.n_trials as u64).map(move |i| {
                    let seed = base_cfg.seed.wrapping_add(offset).wrapping_add(i);
                    (n_users, base_cfg.with_seed(seed))
                })
            })
            .collect();

        info!(
            grid = ?n_users_grid,
            n_trials = self.config.n_trials,
            "Running sample size sweep"
        );
        self.run_batch("grid", jobs)
    }

    /// `n_trials` trials per compliance level, seeds `base + 1_000_000 × level_index + i`
    pub fn run_compliance_sweep(
        &self,
        compliance_grid: &[f64],
        n_users: usize,
        base_cfg: &ExperimentConfig,
    ) -> Result<Vec<TrialRow>> {
        self.check_trials_per_point(COMPLIANCE_SEED_STRIDE)?;
        for &level in compliance_grid {
            base_cfg.clone().with_compliance(level).validate()?;
        }

        let jobs = compliance_grid
            .iter()
            .enumerate()
            .flat_map(|(idx, &level)| {
                let offset = COMPLIANCE_SEED_STRIDE.wrapping_mul(idx as u64);
                let level_cfg = base_cfg.clone().with_compliance(level);
                (0..self.config.n_trials as u64).map(move |i| {
                    let seed = level_cfg.seed.wrapping_add(offset).wrapping_add(i);
                    (n_users, level_cfg.with_seed(seed))
                })
            })
            .collect();

        info!(
            grid = ?compliance_grid,
            n_users,
            n_trials = self.config.n_trials,
            "Running compliance sweep"
        );
        self.run_batch("compliance", jobs)
    }

    /// Grid sweep plus its aggregate, stamped with a run id
    pub fn grid_report(
        &self,
        n_users_grid: &[usize],
        base_cfg: &ExperimentConfig,
    ) -> Result<SweepReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let rows = self.run_grid_sweep(n_users_grid, base_cfg)?;
        Ok(SweepReport::new(SweepParameter::SampleSize, started_at, start, rows))
    }

    /// Compliance sweep plus its aggregate, stamped with a run id
    pub fn compliance_report(
        &self,
        compliance_grid: &[f64],
        n_users: usize,
        base_cfg: &ExperimentConfig,
    ) -> Result<SweepReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let rows = self.run_compliance_sweep(compliance_grid, n_users, base_cfg)?;
        Ok(SweepReport::new(SweepParameter::ComplianceRate, started_at, start, rows))
    }

    fn check_trials_per_point(&self, stride: u64) -> Result<()> {
        if self.config.n_trials as u64 > stride {
            return Err(SimError::invalid_config(
                "n_trials",
                format!(
                    "{} trials per point would overlap the seed stride of {}",
                    self.config.n_trials, stride
                ),
            ));
        }
        Ok(())
    }

    /// Run jobs in parallel and collect rows in job order
    fn run_batch(
        &self,
        mode: &'static str,
        jobs: Vec<(usize, ExperimentConfig)>,
    ) -> Result<Vec<TrialRow>> {
        let start = Instant::now();
        let total = jobs.len();

        let results: Vec<Option<Result<TrialRow>>> = jobs
            .into_par_iter()
            .map(|(n_users, cfg)| {
                if self.stop.is_stopped() {
                    return None;
                }
                let _timer = Timer::new(TRIAL_DURATION.with_label_values(&[mode]));
                let outcome = self.run_trial(n_users, &cfg);
                metrics::record_trial(mode, outcome.is_ok(), n_users);
                Some(self.apply_failure_policy(n_users, &cfg, outcome))
            })
            .collect();

        let rows = results.into_iter().flatten().collect::<Result<Vec<_>>>()?;

        if rows.len() < total {
            info!(
                mode,
                completed = rows.len(),
                scheduled = total,
                "Sweep stopped early"
            );
        }
        let failed = rows.iter().filter(|r| r.is_failed()).count();
        let srm_failures = rows
            .iter()
            .filter(|r| !r.is_failed() && !r.srm_passes)
            .count();
        if srm_failures > 0 {
            warn!(mode, srm_failures, trials = rows.len(), "Trials failed the SRM check");
        }
        info!(
            mode,
            trials = rows.len(),
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch complete"
        );
        Ok(rows)
    }

    fn apply_failure_policy(
        &self,
        n_users: usize,
        cfg: &ExperimentConfig,
        outcome: Result<TrialRow>,
    ) -> Result<TrialRow> {
        match outcome {
            Err(err)
                if self.config.failure_policy == FailurePolicy::Record && err.is_trial_local() =>
            {
                warn!(
                    seed = cfg.seed,
                    n_users,
                    code = err.code(),
                    "Recording failed trial: {}",
                    err
                );
                Ok(TrialRow::failed(n_users, cfg, &err))
            }
            other => other,
        }
    }
}

/// Simulate and analyze one experiment
pub fn run_trial(
    n_users: usize,
    cfg: &ExperimentConfig,
    harness_cfg: &HarnessConfig,
) -> Result<TrialRow> {
    let harness = MonteCarloHarness::new(harness_cfg.clone())?;
    let outcome = harness.run_trial(n_users, cfg);
    metrics::record_trial("single", outcome.is_ok(), n_users);
    harness.apply_failure_policy(n_users, cfg, outcome)
}

/// See [`MonteCarloHarness::run_repeated_trials`]
pub fn run_repeated_trials(
    n_users: usize,
    base_cfg: &ExperimentConfig,
    harness_cfg: &HarnessConfig,
) -> Result<Vec<TrialRow>> {
    MonteCarloHarness::new(harness_cfg.clone())?.run_repeated_trials(n_users, base_cfg)
}

/// See [`MonteCarloHarness::run_grid_sweep`]
pub fn run_grid_sweep(
    n_users_grid: &[usize],
    base_cfg: &ExperimentConfig,
    harness_cfg: &HarnessConfig,
) -> Result<Vec<TrialRow>> {
    MonteCarloHarness::new(harness_cfg.clone())?.run_grid_sweep(n_users_grid, base_cfg)
}

/// See [`MonteCarloHarness::run_compliance_sweep`]
pub fn run_compliance_sweep(
    compliance_grid: &[f64],
    n_users: usize,
    base_cfg: &ExperimentConfig,
    harness_cfg: &HarnessConfig,
) -> Result<Vec<TrialRow>> {
    MonteCarloHarness::new(harness_cfg.clone())?.run_compliance_sweep(
        compliance_grid,
        n_users,
        base_cfg,
    )
}

// =============================================================================
// AGGREGATION
// =============================================================================

/// Row field that groups trials in [`aggregate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepParameter {
    /// Group by `n_users`
    SampleSize,
    /// Group by `compliance_rate`
    ComplianceRate,
}

impl SweepParameter {
    pub fn value_of(&self, row: &TrialRow) -> f64 {
        match self {
            SweepParameter::SampleSize => row.n_users as f64,
            SweepParameter::ComplianceRate => row.compliance_rate,
        }
    }
}

/// Count, mean and sum of squared deviations, mergeable in any order
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningMoments {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Combine two partial results (Chan et al. parallel update)
    pub fn merge(&self, other: &Self) -> Self {
        if self.count == 0 {
            return *other;
        }
        if other.count == 0 {
            return *self;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        let m2 = self.m2
            + other.m2
            + delta * delta * (self.count as f64 * other.count as f64) / count as f64;
        Self { count, mean, m2 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// NaN when empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Sample standard deviation (n - 1); NaN below two values
    pub fn sample_std(&self) -> f64 {
        if self.count < 2 {
            f64::NAN
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// Partial statistics of one group of trials
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrialAccumulator {
    trials: u64,
    failed: u64,
    rejections: u64,
    covered: u64,
    excluded_zero: u64,
    srm_passed: u64,
    lift: RunningMoments,
    width: RunningMoments,
}

impl TrialAccumulator {
    pub fn push(&mut self, row: &TrialRow) {
        self.trials += 1;
        self.rejections += u64::from(row.reject);
        self.covered += u64::from(row.covers);
        self.excluded_zero += u64::from(row.ci_excludes_zero);
        self.srm_passed += u64::from(row.srm_passes);

        if row.is_failed() {
            self.failed += 1;
        } else {
            self.lift.push(row.lift_hat);
            self.width.push(row.ci_width);
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self {
            trials: self.trials + other.trials,
            failed: self.failed + other.failed,
            rejections: self.rejections + other.rejections,
            covered: self.covered + other.covered,
            excluded_zero: self.excluded_zero + other.excluded_zero,
            srm_passed: self.srm_passed + other.srm_passed,
            lift: self.lift.merge(&other.lift),
            width: self.width.merge(&other.width),
        }
    }

    pub fn finish(&self, parameter: SweepParameter, value: f64) -> AggregateRow {
        let rate = |hits: u64| {
            if self.trials == 0 {
                f64::NAN
            } else {
                hits as f64 / self.trials as f64
            }
        };
        AggregateRow {
            parameter,
            value,
            trials: self.trials,
            failed_trials: self.failed,
            power: rate(self.rejections),
            mean_lift: self.lift.mean(),
            std_lift: self.lift.sample_std(),
            mean_ci_width: self.width.mean(),
            coverage: rate(self.covered),
            ci_excludes_zero_rate: rate(self.excluded_zero),
            srm_pass_rate: rate(self.srm_passed),
        }
    }
}

/// Summary of all trials sharing one swept value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub parameter: SweepParameter,
    pub value: f64,
    pub trials: u64,
    pub failed_trials: u64,
    /// Rejection rate; recorded failures count as non-rejections
    #[serde(with = "nan_as_null")]
    pub power: f64,
    /// NaN when every trial failed
    #[serde(with = "nan_as_null")]
    pub mean_lift: f64,
    /// NaN below two completed trials
    #[serde(with = "nan_as_null")]
    pub std_lift: f64,
    #[serde(with = "nan_as_null")]
    pub mean_ci_width: f64,
    #[serde(with = "nan_as_null")]
    pub coverage: f64,
    /// Share of trials whose interval excludes zero
    #[serde(with = "nan_as_null")]
    pub ci_excludes_zero_rate: f64,
    #[serde(with = "nan_as_null")]
    pub srm_pass_rate: f64,
}

/// Group rows by the swept value and summarize each group, ordered by value
pub fn aggregate(rows: &[TrialRow], parameter: SweepParameter) -> Vec<AggregateRow> {
    rows.par_iter()
        .fold(
            BTreeMap::<OrderedFloat<f64>, TrialAccumulator>::new,
            |mut groups, row| {
                groups
                    .entry(OrderedFloat(parameter.value_of(row)))
                    .or_default()
                    .push(row);
                groups
            },
        )
        .reduce(BTreeMap::new, |mut left, right| {
            for (value, acc) in right {
                let merged = match left.get(&value) {
                    Some(existing) => existing.merge(&acc),
                    None => acc,
                };
                left.insert(value, merged);
            }
            left
        })
        .into_iter()
        .map(|(value, acc)| acc.finish(parameter, value.into_inner()))
        .collect()
}

/// Trial rows and aggregate of one sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub run_id: Uuid,
    pub parameter: SweepParameter,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub trials: Vec<TrialRow>,
    pub summary: Vec<AggregateRow>,
}

impl SweepReport {
    fn new(
        parameter: SweepParameter,
        started_at: DateTime<Utc>,
        start: Instant,
        trials: Vec<TrialRow>,
    ) -> Self {
        let summary = aggregate(&trials, parameter);
        let report = Self {
            run_id: Uuid::new_v4(),
            parameter,
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            trials,
            summary,
        };
        info!(
            run_id = %report.run_id,
            points = report.summary.len(),
            elapsed_ms = report.elapsed_ms,
            "Sweep report ready"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn degenerate_cfg() -> ExperimentConfig {
        // Everyone signs up, so the pooled variance is zero
        ExperimentConfig::default().with_baseline(1.0).with_lift(0.0)
    }

    fn row(n_users: usize, lift_hat: f64, reject: bool, covers: bool) -> TrialRow {
        TrialRow {
            n_users,
            seed: 0,
            compliance_rate: 1.0,
            lift_hat,
            ci_low: lift_hat - 0.01,
            ci_high: lift_hat + 0.01,
            ci_width: 0.02,
            p_value: if reject { 0.01 } else { 0.5 },
            reject,
            covers,
            ci_excludes_zero: reject,
            srm_passes: true,
            exposure_rate: 1.0,
            predicted_lift: 0.012,
            error: None,
        }
    }

    #[test]
    fn test_trial_row_consistency() {
        let harness = MonteCarloHarness::new(HarnessConfig::new(1, 0.012)).unwrap();
        let row = harness.run_trial(4_000, &ExperimentConfig::default()).unwrap();

        assert_eq!(row.n_users, 4_000);
        assert_eq!(row.seed, 42);
        assert_relative_eq!(row.ci_width, row.ci_high - row.ci_low, epsilon = 1e-15);
        assert_eq!(row.reject, row.p_value < 0.05);
        assert_eq!(row.covers, row.ci_low <= 0.012 && 0.012 <= row.ci_high);
        assert_eq!(row.ci_excludes_zero, row.ci_low > 0.0 || row.ci_high < 0.0);
        assert_eq!(row.exposure_rate, 1.0);
        assert_relative_eq!(row.predicted_lift, 0.012, epsilon = 1e-15);
        assert!(row.error.is_none());
    }

    #[test]
    fn test_repeated_trials_seeds_and_order() {
        let harness = MonteCarloHarness::new(HarnessConfig::new(6, 0.012)).unwrap();
        let base = ExperimentConfig::default().with_seed(100);
        let rows = harness.run_repeated_trials(1_000, &base).unwrap();

        let seeds: Vec<u64> = rows.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![100, 101, 102, 103, 104, 105]);

        let again = harness.run_repeated_trials(1_000, &base).unwrap();
        assert_eq!(rows, again);
    }

    #[test]
    fn test_grid_sweep_seeds() {
        let harness = MonteCarloHarness::new(HarnessConfig::new(3, 0.012)).unwrap();
        let base = ExperimentConfig::default().with_seed(7);
        let rows = harness.run_grid_sweep(&[500, 800], &base).unwrap();

        let seeds: Vec<(usize, u64)> = rows.iter().map(|r| (r.n_users, r.seed)).collect();
        assert_eq!(
            seeds,
            vec![
                (500, 7 + 5_000_000),
                (500, 7 + 5_000_001),
                (500, 7 + 5_000_002),
                (800, 7 + 8_000_000),
                (800, 7 + 8_000_001),
                (800, 7 + 8_000_002),
            ]
        );
    }

    #[test]
    fn test_grid_sweep_rejects_overlapping_seeds() {
        let harness = MonteCarloHarness::new(HarnessConfig::new(10_001, 0.0)).unwrap();
        let err = harness
            .run_grid_sweep(&[100], &ExperimentConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_compliance_sweep_seeds_and_levels() {
        let harness = MonteCarloHarness::new(HarnessConfig::new(2, 0.012)).unwrap();
        let rows = harness
            .run_compliance_sweep(&[1.0, 0.5], 1_000, &ExperimentConfig::default())
            .unwrap();

        let seeds: Vec<(u64, f64)> = rows.iter().map(|r| (r.seed, r.compliance_rate)).collect();
        assert_eq!(
            seeds,
            vec![(42, 1.0), (43, 1.0), (1_000_042, 0.5), (1_000_043, 0.5)]
        );
        assert!(harness
            .run_compliance_sweep(&[1.5], 1_000, &ExperimentConfig::default())
            .is_err());
    }

    #[test]
    fn test_propagate_policy_returns_first_error() {
        let harness = MonteCarloHarness::new(HarnessConfig::new(3, 0.0)).unwrap();
        let err = harness
            .run_repeated_trials(500, &degenerate_cfg())
            .unwrap_err();
        assert_eq!(err, SimError::DegenerateVariance { pooled_rate: 1.0 });
    }

    #[test]
    fn test_record_policy_keeps_failed_rows() {
        let cfg = HarnessConfig::new(4, 0.0).with_failure_policy(FailurePolicy::Record);
        let harness = MonteCarloHarness::new(cfg).unwrap();
        let rows = harness.run_repeated_trials(500, &degenerate_cfg()).unwrap();

        assert_eq!(rows.len(), 4);
        for row in &rows {
            assert!(row.is_failed());
            assert_eq!(row.error.as_ref().unwrap().code, "DEGENERATE_VARIANCE");
            assert!(row.lift_hat.is_nan());
            assert!(!row.reject && !row.covers && !row.srm_passes && !row.ci_excludes_zero);
        }

        let summary = aggregate(&rows, SweepParameter::SampleSize);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].trials, 4);
        assert_eq!(summary[0].failed_trials, 4);
        assert_eq!(summary[0].power, 0.0);
        assert_eq!(summary[0].coverage, 0.0);
        assert!(summary[0].mean_lift.is_nan());
    }

    #[test]
    fn test_record_policy_still_propagates_config_errors() {
        let cfg = HarnessConfig::new(2, 0.0).with_failure_policy(FailurePolicy::Record);
        let harness = MonteCarloHarness::new(cfg).unwrap();
        let bad = ExperimentConfig::default().with_split(1.0);
        assert_eq!(
            harness.run_repeated_trials(500, &bad).unwrap_err().code(),
            "INVALID_CONFIG"
        );
    }

    #[test]
    fn test_stop_flag_skips_pending_trials() {
        let harness = MonteCarloHarness::new(HarnessConfig::new(5, 0.012)).unwrap();
        let flag = harness.stop_flag();
        flag.stop();
        let rows = harness
            .run_repeated_trials(1_000, &ExperimentConfig::default())
            .unwrap();
        assert!(rows.is_empty());

        flag.reset();
        assert_eq!(
            harness
                .run_repeated_trials(1_000, &ExperimentConfig::default())
                .unwrap()
                .len(),
            5
        );
    }

    #[test]
    fn test_aggregate_statistics() {
        let mut failed = TrialRow::failed(
            100,
            &ExperimentConfig::default(),
            &SimError::EmptyGroup("B".to_string()),
        );
        failed.seed = 9;
        let rows = vec![
            row(100, 0.01, true, true),
            row(100, 0.03, false, true),
            failed,
            row(200, 0.02, true, false),
        ];

        let summary = aggregate(&rows, SweepParameter::SampleSize);
        assert_eq!(summary.len(), 2);

        let first = &summary[0];
        assert_eq!(first.value, 100.0);
        assert_eq!(first.trials, 3);
        assert_eq!(first.failed_trials, 1);
        assert_relative_eq!(first.power, 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(first.coverage, 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(first.srm_pass_rate, 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(first.mean_lift, 0.02, epsilon = 1e-12);
        assert_relative_eq!(first.std_lift, 0.02_f64.sqrt() * 0.1, epsilon = 1e-12);
        assert_relative_eq!(first.mean_ci_width, 0.02, epsilon = 1e-12);

        let second = &summary[1];
        assert_eq!(second.value, 200.0);
        assert!(second.std_lift.is_nan());
    }

    #[test]
    fn test_running_moments_merge_matches_sequential() {
        let values = [0.3, -1.2, 4.5, 2.2, 0.0, 7.1, -3.3];
        let mut all = RunningMoments::default();
        values.iter().for_each(|&v| all.push(v));

        let mut left = RunningMoments::default();
        let mut right = RunningMoments::default();
        values[..3].iter().for_each(|&v| left.push(v));
        values[3..].iter().for_each(|&v| right.push(v));

        let merged = left.merge(&right);
        let reversed = right.merge(&left);
        assert_eq!(merged.count(), all.count());
        assert_relative_eq!(merged.mean(), all.mean(), epsilon = 1e-12);
        assert_relative_eq!(merged.sample_std(), all.sample_std(), epsilon = 1e-12);
        assert_relative_eq!(reversed.sample_std(), all.sample_std(), epsilon = 1e-12);
        assert_eq!(RunningMoments::default().merge(&all), all);
    }

    #[test]
    fn test_json_lines_export() {
        let failed = TrialRow::failed(
            100,
            &ExperimentConfig::default(),
            &SimError::EmptyPopulation,
        );
        let rows = vec![row(100, 0.01, true, true), failed];

        let mut buffer = Vec::new();
        to_json_lines(&rows, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        for key in [
            "n_users", "lift_hat", "ci_low", "ci_high", "ci_width", "p_value", "reject",
            "covers", "ci_excludes_zero", "srm_passes",
        ] {
            assert!(first.get(key).is_some(), "missing {}", key);
        }
        assert!(first.get("error").is_none());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["error"]["code"], "EMPTY_POPULATION");
        assert!(second["lift_hat"].is_null());
    }

    #[test]
    fn test_recorded_failures_read_back_from_json_lines() {
        let cfg = HarnessConfig::new(1, 0.0).with_failure_policy(FailurePolicy::Record);
        let harness = MonteCarloHarness::new(cfg).unwrap();
        let rows = harness.run_repeated_trials(500, &degenerate_cfg()).unwrap();

        let mut buffer = Vec::new();
        to_json_lines(&rows, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let line = text.lines().next().unwrap();

        let restored: TrialRow = serde_json::from_str(line).unwrap();
        assert_eq!(restored.seed, 42);
        assert_eq!(restored.error.unwrap().code, "DEGENERATE_VARIANCE");
        assert!(restored.lift_hat.is_nan());
        assert!(restored.p_value.is_nan());
        assert!(restored.predicted_lift.is_nan());
        assert_eq!(restored.compliance_rate, 1.0);
        assert!(!restored.reject && !restored.ci_excludes_zero);
    }

    #[test]
    fn test_aggregate_rows_with_undefined_statistics_read_back() {
        let single = aggregate(&[row(100, 0.02, true, true)], SweepParameter::SampleSize);
        let all_failed = aggregate(
            &[TrialRow::failed(
                200,
                &ExperimentConfig::default(),
                &SimError::EmptyGroup("B".to_string()),
            )],
            SweepParameter::SampleSize,
        );

        let json = serde_json::to_string(&single[0]).unwrap();
        let restored: AggregateRow = serde_json::from_str(&json).unwrap();
        assert!(restored.std_lift.is_nan());
        assert_relative_eq!(restored.mean_lift, 0.02, epsilon = 1e-15);
        assert_eq!(restored.power, 1.0);
        assert_eq!(restored.ci_excludes_zero_rate, 1.0);

        let json = serde_json::to_string(&all_failed[0]).unwrap();
        let restored: AggregateRow = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.failed_trials, 1);
        assert!(restored.mean_lift.is_nan());
        assert!(restored.mean_ci_width.is_nan());
        assert_eq!(restored.coverage, 0.0);
    }

    #[test]
    fn test_grid_report() {
        let harness = MonteCarloHarness::new(HarnessConfig::new(2, 0.012)).unwrap();
        let report = harness
            .grid_report(&[600, 300], &ExperimentConfig::default())
            .unwrap();
        assert_eq!(report.trials.len(), 4);
        assert_eq!(report.summary.len(), 2);
        assert_eq!(report.summary[0].value, 300.0);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["run_id"].is_string());
        assert_eq!(json["parameter"], "sample_size");
    }
}
