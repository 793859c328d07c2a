//! absim
//!
//! Synthetic A/B experiment simulator and calibration engine.
//! Generates user populations, assigns them to arms, simulates signup and purchase
//! outcomes under a known treatment effect, and checks that the statistics recover it.
//!
//! # Key Features
//! - Deterministic hash-based variant assignment
//! - Logistic signup model with covariates, partial compliance and novelty decay
//! - Two-proportion lift estimate, z-test and sample ratio mismatch check
//! - Parallel Monte Carlo sweeps for power, coverage and A/A calibration
//!
//! # Example
//! ```no_run
//! use absim::{run_experiment, run_ab_analysis, AnalysisConfig, Column, ExperimentConfig};
//!
//! let cfg = ExperimentConfig::default();
//! let population = run_experiment(200_000, &cfg)?;
//! let analysis = run_ab_analysis(&population, Column::SignedUp, &AnalysisConfig::for_experiment(&cfg))?;
//! println!("lift {:+.4} (p = {:.4})", analysis.lift_ci.lift, analysis.test.p_value);
//! # Ok::<(), absim::SimError>(())
//! ```

pub mod analysis;
pub mod assignment;
pub mod config;
pub mod constants;
pub mod decay;
pub mod errors;
pub mod harness;
pub mod logging;
pub mod metrics;
pub mod population;
pub mod rng;
pub mod simulate;

pub use analysis::{
    analyze_funnel, check_srm, compute_group_stats, estimate_lift, run_ab_analysis, test_lift,
    AbAnalysis, Alternative, FunnelAnalysis, GroupStats, HypothesisTest, LiftEstimate, SrmResult,
};
pub use assignment::{assign_variant, assign_variants, Variant};
pub use config::{AnalysisConfig, AssignmentSalt, ExperimentConfig, FailurePolicy, HarnessConfig};
pub use errors::{ErrorSummary, Result, SimError};
pub use harness::{
    aggregate, run_compliance_sweep, run_grid_sweep, run_repeated_trials, run_trial,
    AggregateRow, MonteCarloHarness, StopFlag, SweepParameter, SweepReport, TrialRow,
};
pub use population::{Channel, Column, Device, Population, UserRecord};
pub use simulate::{generate_users, run_experiment};

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use uuid;
