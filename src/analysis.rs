//! Statistical analysis of one experiment
//!
//! Two-proportion inference on a binary outcome:
//!
//! - [`compute_group_stats`]: per-arm sample sizes, conversions, rates
//! - [`estimate_lift`]: absolute lift (B - A) with an unpooled Wald interval
//! - [`test_lift`]: z-test under a pooled-variance null
//! - [`check_srm`]: chi-square goodness of fit of arm sizes against the nominal split
//! - [`run_ab_analysis`]: all four for one outcome column
//!
//! Result records serialize with the key names downstream decision layers expect
//! (`n_A`, `ci_low`, `se0`, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use tracing::debug;

use crate::assignment::Variant;
use crate::config::AnalysisConfig;
use crate::constants::SPLIT_SUM_TOLERANCE;
use crate::errors::{Result, SimError};
use crate::population::{Column, Population};

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Per-arm counts and rates for one outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    /// Users in A
    #[serde(rename = "n_A")]
    pub n_a: u64,
    /// Users in B
    #[serde(rename = "n_B")]
    pub n_b: u64,
    /// Users in A who converted
    #[serde(rename = "conv_A")]
    pub conv_a: u64,
    /// Users in B who converted
    #[serde(rename = "conv_B")]
    pub conv_b: u64,
    /// Conversion rate in A
    #[serde(rename = "p_A")]
    pub p_a: f64,
    /// Conversion rate in B
    #[serde(rename = "p_B")]
    pub p_b: f64,
}

impl GroupStats {
    /// Stats from raw counts; both arms must be non-empty
    pub fn from_counts(n_a: u64, conv_a: u64, n_b: u64, conv_b: u64) -> Result<Self> {
        if n_a == 0 {
            return Err(SimError::EmptyGroup(Variant::A.to_string()));
        }
        if n_b == 0 {
            return Err(SimError::EmptyGroup(Variant::B.to_string()));
        }
        if conv_a > n_a || conv_b > n_b {
            return Err(SimError::invalid_config(
                "conversions",
                "conversions cannot exceed sample size",
            ));
        }
        Ok(Self {
            n_a,
            n_b,
            conv_a,
            conv_b,
            p_a: conv_a as f64 / n_a as f64,
            p_b: conv_b as f64 / n_b as f64,
        })
    }

    /// Absolute lift B - A
    pub fn lift(&self) -> f64 {
        self.p_b - self.p_a
    }
}

/// Absolute lift with a two-sided Wald interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiftEstimate {
    pub lift: f64,
    /// Unpooled standard error
    pub se: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub alpha: f64,
    pub conf_level: f64,
}

impl LiftEstimate {
    pub fn width(&self) -> f64 {
        self.ci_high - self.ci_low
    }

    /// Whether the interval covers `value` (closed on both ends)
    pub fn contains(&self, value: f64) -> bool {
        self.ci_low <= value && value <= self.ci_high
    }

    pub fn excludes_zero(&self) -> bool {
        self.ci_low > 0.0 || self.ci_high < 0.0
    }
}

/// Direction of the alternative hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alternative {
    /// p_B > p_A (upper tail)
    Greater,
    /// p_B < p_A (lower tail)
    Less,
    /// p_B != p_A
    #[serde(alias = "two_sided", alias = "twosided")]
    TwoSided,
}

impl Alternative {
    pub fn as_str(&self) -> &'static str {
        match self {
            Alternative::Greater => "greater",
            Alternative::Less => "less",
            Alternative::TwoSided => "two-sided",
        }
    }
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Alternative {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "greater" => Ok(Alternative::Greater),
            "less" => Ok(Alternative::Less),
            "two-sided" | "two_sided" | "twosided" => Ok(Alternative::TwoSided),
            other => Err(SimError::InvalidAlternative(other.to_string())),
        }
    }
}

/// Two-proportion z-test result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HypothesisTest {
    pub z: f64,
    pub p_value: f64,
    pub alternative: Alternative,
    pub pooled_rate: f64,
    /// Standard error under the pooled null
    pub se0: f64,
    pub lift: f64,
}

/// Sample ratio mismatch check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SrmResult {
    #[serde(rename = "n_A")]
    pub n_a: u64,
    #[serde(rename = "n_B")]
    pub n_b: u64,
    #[serde(rename = "expected_A")]
    pub expected_a: f64,
    #[serde(rename = "expected_B")]
    pub expected_b: f64,
    pub chi2: f64,
    pub p_value: f64,
    pub passes: bool,
}

/// Everything computed for one outcome column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbAnalysis {
    pub group_stats: GroupStats,
    pub lift_ci: LiftEstimate,
    pub test: HypothesisTest,
    pub srm: SrmResult,
}

impl AbAnalysis {
    /// Whether the lift test rejects the null at `alpha`
    pub fn rejects(&self, alpha: f64) -> bool {
        self.test.p_value < alpha
    }
}

/// Analyses for the signup funnel, as consumed by ship/no-ship decision layers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FunnelAnalysis {
    /// Primary metric: signup conversion
    pub signup: AbAnalysis,
    /// Secondary metric: purchase per assigned user
    pub purchase: AbAnalysis,
    /// Guardrail: purchase among signed-up users
    ///
    /// The SRM block of this analysis conditions on a post-treatment variable and is
    /// not a randomization check.
    pub purchase_given_signup: AbAnalysis,
}

// =============================================================================
// OPERATIONS
// =============================================================================

fn standard_normal() -> Result<Normal> {
    Ok(Normal::new(0.0, 1.0)?)
}

/// Sample sizes and conversions per arm for a binary outcome
pub fn compute_group_stats(
    population: &Population,
    group_column: Column,
    outcome_column: Column,
    labels: (Variant, Variant),
) -> Result<GroupStats> {
    let (control, treatment) = labels;
    let (n_a, conv_a) = population.count_outcome(group_column, outcome_column, control)?;
    let (n_b, conv_b) = population.count_outcome(group_column, outcome_column, treatment)?;

    if n_a == 0 {
        return Err(SimError::EmptyGroup(control.to_string()));
    }
    if n_b == 0 {
        return Err(SimError::EmptyGroup(treatment.to_string()));
    }
    GroupStats::from_counts(n_a, conv_a, n_b, conv_b)
}

/// Difference in proportions (B - A) with a Wald interval
///
/// `se = sqrt(p_A(1-p_A)/n_A + p_B(1-p_B)/n_B)`, interval `lift ± z_(1-α/2) · se`.
/// No multiple-comparison correction.
pub fn estimate_lift(stats: &GroupStats, confidence_level: f64) -> Result<LiftEstimate> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(SimError::invalid_config(
            "confidence_level",
            format!("{confidence_level} is outside (0, 1)"),
        ));
    }

    let lift = stats.lift();
    let se = (stats.p_a * (1.0 - stats.p_a) / stats.n_a as f64
        + stats.p_b * (1.0 - stats.p_b) / stats.n_b as f64)
        .sqrt();

    let alpha = 1.0 - confidence_level;
    let z_crit = standard_normal()?.inverse_cdf(1.0 - alpha / 2.0);

    Ok(LiftEstimate {
        lift,
        se,
        ci_low: lift - z_crit * se,
        ci_high: lift + z_crit * se,
        alpha,
        conf_level: confidence_level,
    })
}

/// Two-proportion z-test of H0: p_B - p_A = 0 with the pooled standard error
pub fn test_lift(stats: &GroupStats, alternative: Alternative) -> Result<HypothesisTest> {
    let lift = stats.lift();
    let n_a = stats.n_a as f64;
    let n_b = stats.n_b as f64;

    let pooled = (stats.conv_a + stats.conv_b) as f64 / (n_a + n_b);
    let se0 = (pooled * (1.0 - pooled) * (1.0 / n_a + 1.0 / n_b)).sqrt();

    if se0 == 0.0 {
        return Err(SimError::DegenerateVariance {
            pooled_rate: pooled,
        });
    }

    let z = lift / se0;
    let normal = standard_normal()?;
    let p_value = match alternative {
        Alternative::Greater => normal.sf(z),
        Alternative::Less => normal.cdf(z),
        Alternative::TwoSided => (2.0 * normal.sf(z.abs())).min(1.0),
    };

    Ok(HypothesisTest {
        z,
        p_value,
        alternative,
        pooled_rate: pooled,
        se0,
        lift,
    })
}

/// Same as [`test_lift`] with the direction given as text
pub fn test_lift_str(stats: &GroupStats, alternative: &str) -> Result<HypothesisTest> {
    test_lift(stats, alternative.parse()?)
}

/// Chi-square goodness-of-fit of observed arm sizes against the nominal split
///
/// Passes iff `p_value >= threshold`.
pub fn check_srm(
    population: &Population,
    group_column: Column,
    expected_split: (f64, f64),
    labels: (Variant, Variant),
    threshold: f64,
) -> Result<SrmResult> {
    let n_a = population.count_variant(group_column, labels.0)?;
    let n_b = population.count_variant(group_column, labels.1)?;
    let n_total = n_a + n_b;

    if n_total == 0 {
        return Err(SimError::EmptyPopulation);
    }
    if !(expected_split.0 > 0.0 && expected_split.1 > 0.0) {
        return Err(SimError::invalid_config(
            "expected_split",
            "both arms need a positive expected share",
        ));
    }
    let share_total = expected_split.0 + expected_split.1;
    if (share_total - 1.0).abs() > SPLIT_SUM_TOLERANCE {
        return Err(SimError::invalid_config(
            "expected_split",
            format!("shares sum to {share_total}, expected 1"),
        ));
    }

    let expected_a = n_total as f64 * expected_split.0;
    let expected_b = n_total as f64 * expected_split.1;

    let chi2 = (n_a as f64 - expected_a).powi(2) / expected_a
        + (n_b as f64 - expected_b).powi(2) / expected_b;
    let p_value = ChiSquared::new(1.0)?.sf(chi2);

    Ok(SrmResult {
        n_a,
        n_b,
        expected_a,
        expected_b,
        chi2,
        p_value,
        passes: p_value >= threshold,
    })
}

/// Group stats, lift with CI, hypothesis test and SRM for one outcome column
pub fn run_ab_analysis(
    population: &Population,
    outcome_column: Column,
    config: &AnalysisConfig,
) -> Result<AbAnalysis> {
    config.validate()?;

    let group_stats =
        compute_group_stats(population, config.group_column, outcome_column, config.labels)?;
    let lift_ci = estimate_lift(&group_stats, config.confidence_level)?;
    let test = test_lift(&group_stats, config.alternative)?;
    let srm = check_srm(
        population,
        config.group_column,
        config.expected_split,
        config.labels,
        config.srm_threshold,
    )?;

    debug!(
        outcome = %outcome_column,
        lift = lift_ci.lift,
        p_value = test.p_value,
        srm_passes = srm.passes,
        "A/B analysis complete"
    );

    Ok(AbAnalysis {
        group_stats,
        lift_ci,
        test,
        srm,
    })
}

/// Signup, purchase and purchase-given-signup analyses of one population
pub fn analyze_funnel(population: &Population, config: &AnalysisConfig) -> Result<FunnelAnalysis> {
    let signup = run_ab_analysis(population, Column::SignedUp, config)?;
    let purchase = run_ab_analysis(population, Column::Purchased, config)?;
    let signed_up = population.filter_column(Column::SignedUp)?;
    let purchase_given_signup = run_ab_analysis(&signed_up, Column::Purchased, config)?;

    Ok(FunnelAnalysis {
        signup,
        purchase,
        purchase_given_signup,
    })
}
