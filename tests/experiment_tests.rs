//! End-to-end tests for a single simulated experiment
//!
//! Simulate one population, analyze it, and check the result against the known
//! ground truth of the generator.

use absim::{
    analyze_funnel, assign_variant, run_ab_analysis, run_experiment, run_trial, AnalysisConfig,
    Column, ExperimentConfig, FailurePolicy, HarnessConfig, SimError,
};

fn concrete_config() -> ExperimentConfig {
    ExperimentConfig::default()
        .with_seed(42)
        .with_baseline(0.12)
        .with_lift(0.012)
        .with_compliance(1.0)
}

#[test]
fn test_concrete_scenario() {
    let cfg = concrete_config();
    let population = run_experiment(200_000, &cfg).unwrap();
    let analysis =
        run_ab_analysis(&population, Column::SignedUp, &AnalysisConfig::for_experiment(&cfg))
            .unwrap();

    let stats = analysis.group_stats;
    assert_eq!(stats.n_a + stats.n_b, 200_000);
    assert!(
        (stats.n_a as i64 - 100_000).abs() < 2_000,
        "arm A has {} users",
        stats.n_a
    );

    assert!(analysis.test.p_value < 0.05, "p = {}", analysis.test.p_value);
    assert!(analysis.lift_ci.excludes_zero());
    assert!(
        (analysis.lift_ci.lift - 0.012).abs() < 0.006,
        "lift {}",
        analysis.lift_ci.lift
    );
    assert!(analysis.lift_ci.ci_low < analysis.lift_ci.lift);
    assert!(analysis.lift_ci.lift < analysis.lift_ci.ci_high);
}

#[test]
fn test_same_seed_reproduces_analysis() {
    let cfg = concrete_config();
    let analysis_cfg = AnalysisConfig::for_experiment(&cfg);

    let first = run_ab_analysis(&run_experiment(20_000, &cfg).unwrap(), Column::SignedUp, &analysis_cfg)
        .unwrap();
    let second = run_ab_analysis(&run_experiment(20_000, &cfg).unwrap(), Column::SignedUp, &analysis_cfg)
        .unwrap();
    assert_eq!(first, second);

    let other_seed = cfg.with_seed(43);
    let third =
        run_ab_analysis(&run_experiment(20_000, &other_seed).unwrap(), Column::SignedUp, &analysis_cfg)
            .unwrap();
    assert_ne!(first.lift_ci.lift, third.lift_ci.lift);
}

#[test]
fn test_assignment_matches_standalone_hashing() {
    let population = run_experiment(2_000, &concrete_config()).unwrap();
    for user in population.iter() {
        assert_eq!(user.variant, Some(assign_variant(user.user_id, 0.5)));
    }
}

#[test]
fn test_degenerate_population_raises() {
    let cfg = ExperimentConfig::default().with_baseline(1.0).with_lift(0.0);
    let population = run_experiment(1_000, &cfg).unwrap();
    assert!(population.iter().all(|u| u.signed_up == Some(true)));

    let err = run_ab_analysis(&population, Column::SignedUp, &AnalysisConfig::default())
        .unwrap_err();
    assert_eq!(err, SimError::DegenerateVariance { pooled_rate: 1.0 });
}

#[test]
fn test_missing_outcome_column() {
    let population = absim::generate_users(100, 1);
    let err = run_ab_analysis(&population, Column::SignedUp, &AnalysisConfig::default())
        .unwrap_err();
    assert_eq!(err, SimError::MissingColumn("variant".to_string()));
}

#[test]
fn test_funnel_analysis() {
    let cfg = concrete_config();
    let population = run_experiment(50_000, &cfg).unwrap();
    let funnel = analyze_funnel(&population, &AnalysisConfig::for_experiment(&cfg)).unwrap();

    let signup = funnel.signup.group_stats;
    let purchase = funnel.purchase.group_stats;
    let conditional = funnel.purchase_given_signup.group_stats;

    assert_eq!(purchase.n_a, signup.n_a);
    assert!(purchase.conv_a <= signup.conv_a);
    assert_eq!(conditional.n_a, signup.conv_a);
    assert_eq!(conditional.n_b, signup.conv_b);
    assert_eq!(conditional.conv_a, purchase.conv_a);
    // Purchase among signups sits near the configured base rate
    assert!((conditional.p_a - 0.20).abs() < 0.05, "p = {}", conditional.p_a);
}

#[test]
fn test_run_trial_failure_policies() {
    let cfg = ExperimentConfig::default().with_baseline(0.0).with_lift(0.0);

    let propagate = HarnessConfig::new(1, 0.0);
    assert_eq!(
        run_trial(1_000, &cfg, &propagate).unwrap_err().code(),
        "DEGENERATE_VARIANCE"
    );

    let record = propagate.with_failure_policy(FailurePolicy::Record);
    let row = run_trial(1_000, &cfg, &record).unwrap();
    assert_eq!(row.seed, 42);
    assert_eq!(row.error.unwrap().code, "DEGENERATE_VARIANCE");
}

#[test]
fn test_purchase_outcome_can_drive_the_harness() {
    let harness_cfg = HarnessConfig::new(1, 0.0).with_outcome(Column::Purchased);
    let row = run_trial(20_000, &concrete_config(), &harness_cfg).unwrap();
    assert!(row.error.is_none());
    assert!(row.lift_hat.abs() < 0.05);

    let bad = HarnessConfig::new(1, 0.0).with_outcome(Column::Day);
    assert!(run_trial(1_000, &concrete_config(), &bad).is_err());
}
