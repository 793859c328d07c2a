//! Configuration for simulated experiments
//!
//! All configurable parameters in one place with environment variable overrides.
//! Sensible defaults, validated ranges, and never mutated once a trial starts:
//! a new trial gets a new config via [`ExperimentConfig::with_seed`].

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::Alternative;
use crate::assignment::Variant;
use crate::constants::{
    DEFAULT_CONFIDENCE_LEVEL, DEFAULT_SIGNIFICANCE_LEVEL, DEFAULT_SRM_THRESHOLD,
    SPLIT_SUM_TOLERANCE,
};
use crate::errors::{Result, SimError};
use crate::population::Column;

/// Read and parse an environment variable, warning on unparsable values
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable value '{}' for {}", raw, key);
            None
        }
    }
}

fn check_rate(field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SimError::invalid_config(
            field,
            format!("{value} is outside [0, 1]"),
        ));
    }
    Ok(())
}

fn check_open_unit(field: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(SimError::invalid_config(
            field,
            format!("{value} is outside (0, 1)"),
        ));
    }
    Ok(())
}

// =============================================================================
// EXPERIMENT CONFIG
// =============================================================================

/// Extra key mixed into the assignment hash
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSalt {
    /// Hash the bare user identifier
    #[default]
    None,
    /// Hash `"{key}:{user_id}"` so distinct experiments bucket independently
    Fixed(String),
    /// Hash `"{seed}:{user_id}"` so every simulated trial re-randomizes
    TrialSeed,
}

/// Parameters of one hypothetical experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Root seed for every random stream of the trial (default: 42)
    pub seed: u64,

    /// Fraction of users bucketed into arm A (default: 0.5)
    pub split: f64,

    /// Expected daily traffic, informational for sizing (default: 10_000)
    pub traffic_per_day: u64,

    /// Baseline signup conversion rate, the intercept of the signup model (default: 0.12)
    pub baseline_signup_cvr: f64,

    /// Absolute signup lift for exposed users on day 0 (default: 0.012)
    pub treatment_abs_lift: f64,

    /// Base purchase rate among signed-up users (default: 0.20)
    pub purchase_given_signup: f64,

    /// Smallest lift worth shipping, consumed by decision layers (default: 0.005)
    pub practical_abs_lift: f64,

    /// Probability that a treatment-arm user actually sees the treatment (default: 1.0)
    pub compliance_rate: f64,

    /// Length of the experiment window in days (default: 28)
    pub experiment_days: u32,

    /// Novelty decay rate k in `lift0 * exp(-k * day)`; 0 keeps the effect constant
    pub novelty_decay_k: f64,

    /// Key mixed into the assignment hash (default: none)
    pub assignment_salt: AssignmentSalt,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            split: 0.5,
            traffic_per_day: 10_000,
            baseline_signup_cvr: 0.12,
            treatment_abs_lift: 0.012,
            purchase_given_signup: 0.20,
            practical_abs_lift: 0.005,
            compliance_rate: 1.0,
            experiment_days: 28,
            novelty_decay_k: 0.0,
            assignment_salt: AssignmentSalt::None,
        }
    }
}

impl ExperimentConfig {
    /// Derive the config of another trial: identical except for the seed
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }

    pub fn with_split(mut self, split: f64) -> Self {
        self.split = split;
        self
    }

    pub fn with_baseline(mut self, baseline_signup_cvr: f64) -> Self {
        self.baseline_signup_cvr = baseline_signup_cvr;
        self
    }

    pub fn with_lift(mut self, treatment_abs_lift: f64) -> Self {
        self.treatment_abs_lift = treatment_abs_lift;
        self
    }

    pub fn with_compliance(mut self, compliance_rate: f64) -> Self {
        self.compliance_rate = compliance_rate;
        self
    }

    pub fn with_purchase_given_signup(mut self, rate: f64) -> Self {
        self.purchase_given_signup = rate;
        self
    }

    pub fn with_novelty_decay(mut self, k: f64) -> Self {
        self.novelty_decay_k = k;
        self
    }

    pub fn with_experiment_days(mut self, days: u32) -> Self {
        self.experiment_days = days;
        self
    }

    pub fn with_assignment_salt(mut self, salt: AssignmentSalt) -> Self {
        self.assignment_salt = salt;
        self
    }

    /// Check every field against its valid range
    pub fn validate(&self) -> Result<()> {
        check_open_unit("split", self.split)?;
        check_rate("baseline_signup_cvr", self.baseline_signup_cvr)?;
        check_rate("purchase_given_signup", self.purchase_given_signup)?;
        check_rate("compliance_rate", self.compliance_rate)?;
        check_rate("practical_abs_lift", self.practical_abs_lift)?;

        if !(-1.0..=1.0).contains(&self.treatment_abs_lift) {
            return Err(SimError::invalid_config(
                "treatment_abs_lift",
                format!("{} is outside [-1, 1]", self.treatment_abs_lift),
            ));
        }
        if self.experiment_days == 0 {
            return Err(SimError::invalid_config(
                "experiment_days",
                "must be at least 1",
            ));
        }
        if !(self.novelty_decay_k >= 0.0 && self.novelty_decay_k.is_finite()) {
            return Err(SimError::invalid_config(
                "novelty_decay_k",
                format!("{} must be a finite non-negative rate", self.novelty_decay_k),
            ));
        }
        Ok(())
    }

    /// Expected share of each arm under the nominal split, ordered (A, B)
    pub fn expected_split(&self) -> (f64, f64) {
        (self.split, 1.0 - self.split)
    }

    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seed) = env_parse("ABSIM_SEED") {
            config.seed = seed;
        }
        if let Some(split) = env_parse("ABSIM_SPLIT") {
            config.split = split;
        }
        if let Some(traffic) = env_parse("ABSIM_TRAFFIC_PER_DAY") {
            config.traffic_per_day = traffic;
        }
        if let Some(rate) = env_parse("ABSIM_BASELINE_CVR") {
            config.baseline_signup_cvr = rate;
        }
        if let Some(lift) = env_parse("ABSIM_TREATMENT_LIFT") {
            config.treatment_abs_lift = lift;
        }
        if let Some(rate) = env_parse("ABSIM_PURCHASE_GIVEN_SIGNUP") {
            config.purchase_given_signup = rate;
        }
        if let Some(lift) = env_parse("ABSIM_PRACTICAL_LIFT") {
            config.practical_abs_lift = lift;
        }
        if let Some(rate) = env_parse("ABSIM_COMPLIANCE") {
            config.compliance_rate = rate;
        }
        if let Some(days) = env_parse("ABSIM_EXPERIMENT_DAYS") {
            config.experiment_days = days;
        }
        if let Some(k) = env_parse("ABSIM_NOVELTY_DECAY_K") {
            config.novelty_decay_k = k;
        }
        if let Ok(key) = env::var("ABSIM_ASSIGNMENT_SALT") {
            config.assignment_salt = match key.trim() {
                "" => AssignmentSalt::None,
                "seed" => AssignmentSalt::TrialSeed,
                other => AssignmentSalt::Fixed(other.to_string()),
            };
        }

        config
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Experiment configuration:");
        info!("   Seed: {}", self.seed);
        info!(
            "   Split: {:.2}/{:.2} (A/B)",
            self.split,
            1.0 - self.split
        );
        info!(
            "   Baseline signup CVR: {:.4}, treatment lift: {:+.4}",
            self.baseline_signup_cvr, self.treatment_abs_lift
        );
        info!("   Compliance rate: {:.2}", self.compliance_rate);
        info!(
            "   Purchase given signup: {:.3}",
            self.purchase_given_signup
        );
        info!(
            "   Window: {} days (novelty decay k = {:.3})",
            self.experiment_days, self.novelty_decay_k
        );
        match &self.assignment_salt {
            AssignmentSalt::None => info!("   Assignment salt: none"),
            AssignmentSalt::Fixed(key) => info!("   Assignment salt: '{}'", key),
            AssignmentSalt::TrialSeed => info!("   Assignment salt: trial seed"),
        }
    }
}

// =============================================================================
// ANALYSIS CONFIG
// =============================================================================

/// Significance conventions and column wiring for one analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Column holding the arm label (default: variant)
    pub group_column: Column,

    /// Control and treatment labels, ordered (A, B)
    pub labels: (Variant, Variant),

    /// Nominal share of each arm, ordered (A, B)
    pub expected_split: (f64, f64),

    /// Two-sided confidence level of the Wald interval (default: 0.95)
    pub confidence_level: f64,

    /// Direction of the lift test (default: greater)
    pub alternative: Alternative,

    /// Rejection threshold for the lift test (default: 0.05)
    pub significance_level: f64,

    /// SRM passes iff p >= this threshold (default: 0.05)
    pub srm_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            group_column: Column::Variant,
            labels: (Variant::A, Variant::B),
            expected_split: (0.5, 0.5),
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            alternative: Alternative::Greater,
            significance_level: DEFAULT_SIGNIFICANCE_LEVEL,
            srm_threshold: DEFAULT_SRM_THRESHOLD,
        }
    }
}

impl AnalysisConfig {
    /// Analysis matching an experiment's nominal split
    pub fn for_experiment(cfg: &ExperimentConfig) -> Self {
        Self {
            expected_split: cfg.expected_split(),
            ..Self::default()
        }
    }

    pub fn with_alternative(mut self, alternative: Alternative) -> Self {
        self.alternative = alternative;
        self
    }

    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn with_significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = alpha;
        self
    }

    pub fn with_srm_threshold(mut self, threshold: f64) -> Self {
        self.srm_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_open_unit("confidence_level", self.confidence_level)?;
        check_open_unit("significance_level", self.significance_level)?;
        check_open_unit("srm_threshold", self.srm_threshold)?;
        check_open_unit("expected_split.0", self.expected_split.0)?;
        check_open_unit("expected_split.1", self.expected_split.1)?;
        let share_total = self.expected_split.0 + self.expected_split.1;
        if (share_total - 1.0).abs() > SPLIT_SUM_TOLERANCE {
            return Err(SimError::invalid_config(
                "expected_split",
                format!("shares sum to {share_total}, expected 1"),
            ));
        }
        if self.labels.0 == self.labels.1 {
            return Err(SimError::invalid_config(
                "labels",
                "control and treatment labels must differ",
            ));
        }
        Ok(())
    }

    /// Apply `ABSIM_ALPHA`, `ABSIM_CONFIDENCE`, `ABSIM_SRM_THRESHOLD` and
    /// `ABSIM_ALTERNATIVE` overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(alpha) = env_parse("ABSIM_ALPHA") {
            config.significance_level = alpha;
        }
        if let Some(level) = env_parse("ABSIM_CONFIDENCE") {
            config.confidence_level = level;
        }
        if let Some(threshold) = env_parse("ABSIM_SRM_THRESHOLD") {
            config.srm_threshold = threshold;
        }
        if let Some(alternative) = env_parse("ABSIM_ALTERNATIVE") {
            config.alternative = alternative;
        }

        config
    }
}

// =============================================================================
// HARNESS CONFIG
// =============================================================================

/// What the harness does with a trial whose analysis fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run with the first trial error
    #[default]
    Propagate,
    /// Keep a row with the error attached; it counts as a non-rejection, non-covering,
    /// SRM-failing trial and is left out of lift and width statistics
    Record,
}

/// Monte Carlo harness settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Trials per grid point (default: 200)
    pub n_trials: usize,

    /// Lift the intervals are judged against for coverage (default: 0.012)
    pub true_lift: f64,

    /// Outcome column analyzed in every trial (default: signed_up)
    pub outcome: Column,

    /// Analysis conventions applied to every trial
    pub analysis: AnalysisConfig,

    /// Failed-trial handling (default: propagate)
    pub failure_policy: FailurePolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            n_trials: 200,
            true_lift: 0.012,
            outcome: Column::SignedUp,
            analysis: AnalysisConfig::default(),
            failure_policy: FailurePolicy::Propagate,
        }
    }
}

impl HarnessConfig {
    pub fn new(n_trials: usize, true_lift: f64) -> Self {
        Self {
            n_trials,
            true_lift,
            ..Self::default()
        }
    }

    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_outcome(mut self, outcome: Column) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_trials == 0 {
            return Err(SimError::invalid_config("n_trials", "must be at least 1"));
        }
        if !self.true_lift.is_finite() {
            return Err(SimError::invalid_config("true_lift", "must be finite"));
        }
        if !self.outcome.is_binary() {
            return Err(SimError::invalid_config(
                "outcome",
                format!("'{}' is not a binary column", self.outcome),
            ));
        }
        self.analysis.validate()
    }

    /// Load `ABSIM_TRIALS` and `ABSIM_TRUE_LIFT` plus the analysis overrides
    pub fn from_env() -> Self {
        let mut config = Self {
            analysis: AnalysisConfig::from_env(),
            ..Self::default()
        };

        if let Some(n) = env_parse("ABSIM_TRIALS") {
            config.n_trials = n;
        }
        if let Some(lift) = env_parse("ABSIM_TRUE_LIFT") {
            config.true_lift = lift;
        }
        if let Ok(val) = env::var("ABSIM_RECORD_FAILURES") {
            if val.to_lowercase() == "true" || val == "1" {
                config.failure_policy = FailurePolicy::Record;
            }
        }

        config
    }
}
