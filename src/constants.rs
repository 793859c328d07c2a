//! Documented constants for the generative user model
//!
//! Centralizing constants prevents magic numbers in the simulator and makes the
//! model easy to retune.

// =============================================================================
// POPULATION MIX
// =============================================================================

/// Probability that a synthetic user is new (first visit)
pub const NEW_USER_PROBABILITY: f64 = 0.70;

/// Probability that a synthetic user is on mobile (otherwise desktop)
pub const MOBILE_PROBABILITY: f64 = 0.65;

/// Probability that a synthetic user arrived from search (otherwise social)
pub const SEARCH_PROBABILITY: f64 = 0.55;

// =============================================================================
// SIGNUP MODEL (log-odds offsets added to the baseline intercept)
// =============================================================================

/// New users are slightly more likely to sign up
pub const SIGNUP_LOGIT_NEW_USER: f64 = 0.30;

/// Mobile users are slightly less likely to sign up
pub const SIGNUP_LOGIT_MOBILE: f64 = -0.20;

/// Search traffic carries slightly higher intent
pub const SIGNUP_LOGIT_SEARCH: f64 = 0.10;

// =============================================================================
// PURCHASE MODEL (absolute offsets on the purchase-given-signup rate)
// =============================================================================

/// Returning users purchase more often once signed up
pub const PURCHASE_RETURNING_BONUS: f64 = 0.03;

/// Social traffic purchases less often once signed up
pub const PURCHASE_SOCIAL_PENALTY: f64 = 0.02;

// =============================================================================
// SIGNIFICANCE CONVENTIONS
// =============================================================================

/// Default significance level for the lift test (p < 0.05)
pub const DEFAULT_SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Default two-sided confidence level for the Wald interval
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Default SRM pass threshold (pass iff p >= 0.05)
pub const DEFAULT_SRM_THRESHOLD: f64 = 0.05;

/// Largest allowed distance of the expected arm shares' sum from 1
pub const SPLIT_SUM_TOLERANCE: f64 = 1e-9;

// =============================================================================
// SEED DERIVATION
// =============================================================================

/// Seed stride per sample size in grid sweeps
///
/// Trial seeds are `base + stride * n_users + i`. Keeping `i < stride` makes the
/// mapping injective, so sweeps are limited to this many trials per grid point.
pub const GRID_SEED_STRIDE: u64 = 10_000;

/// Seed stride per level in compliance sweeps
pub const COMPLIANCE_SEED_STRIDE: u64 = 1_000_000;

/// Histogram buckets for trial duration (seconds)
pub const TRIAL_DURATION_BUCKETS: [f64; 10] =
    [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
