//! Generative model for one simulated experiment
//!
//! Pipeline per trial, each stage consuming its own random stream:
//!
//! 1. [`generate_users`]: covariates (new/returning, device, channel)
//! 2. [`assign_variants`](crate::assignment::assign_variants): hash bucketing
//! 3. [`simulate_compliance`]: which treatment-arm users actually see the treatment
//! 4. [`simulate_signup`]: logistic covariate model plus day-decayed lift for exposed users
//! 5. [`simulate_purchase`]: purchase drawn only for signed-up users
//!
//! [`run_experiment`] chains all five. The same config always reproduces the same
//! population bit for bit.

use rand::Rng;
use tracing::debug;

use crate::assignment::assign_variants;
use crate::config::ExperimentConfig;
use crate::constants::{
    MOBILE_PROBABILITY, NEW_USER_PROBABILITY, PURCHASE_RETURNING_BONUS, PURCHASE_SOCIAL_PENALTY,
    SEARCH_PROBABILITY, SIGNUP_LOGIT_MOBILE, SIGNUP_LOGIT_NEW_USER, SIGNUP_LOGIT_SEARCH,
};
use crate::decay::decayed_lift;
use crate::errors::Result;
use crate::population::{Channel, Column, Device, Population, UserRecord};
use crate::rng::{RandomStreams, Stream};

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Log-odds of a probability; 0 and 1 map to -inf and +inf
#[inline]
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Baseline signup probability before any treatment effect
pub fn baseline_signup_probability(baseline_cvr: f64, user: &UserRecord) -> f64 {
    let mut z = logit(baseline_cvr);
    if user.is_new {
        z += SIGNUP_LOGIT_NEW_USER;
    }
    if user.device == Device::Mobile {
        z += SIGNUP_LOGIT_MOBILE;
    }
    if user.channel == Channel::Search {
        z += SIGNUP_LOGIT_SEARCH;
    }
    sigmoid(z)
}

/// Purchase probability once signed up
pub fn purchase_probability(purchase_given_signup: f64, user: &UserRecord) -> f64 {
    let mut p = purchase_given_signup;
    if !user.is_new {
        p += PURCHASE_RETURNING_BONUS;
    }
    if user.channel == Channel::Social {
        p -= PURCHASE_SOCIAL_PENALTY;
    }
    p.clamp(0.0, 1.0)
}

/// Users `1..=n_users` with covariates drawn from the population stream of `seed`
pub fn generate_users(n_users: usize, seed: u64) -> Population {
    let mut rng = RandomStreams::new(seed).rng(Stream::Population);

    let users = (1..=n_users as u64)
        .map(|user_id| {
            let is_new = rng.gen::<f64>() < NEW_USER_PROBABILITY;
            let device = if rng.gen::<f64>() < MOBILE_PROBABILITY {
                Device::Mobile
            } else {
                Device::Desktop
            };
            let channel = if rng.gen::<f64>() < SEARCH_PROBABILITY {
                Channel::Search
            } else {
                Channel::Social
            };
            UserRecord::new(user_id, is_new, device, channel)
        })
        .collect();

    Population::new(users)
}

/// Draw treatment exposure; control users are never exposed
///
/// One uniform is drawn per row, including control rows, so the stream stays aligned
/// with row position whatever the arm mix.
pub fn simulate_compliance(mut population: Population, cfg: &ExperimentConfig) -> Result<Population> {
    cfg.validate()?;
    population.require(Column::Variant)?;
    let mut rng = RandomStreams::new(cfg.seed).rng(Stream::Compliance);

    for user in population.stage_mut(&[Column::Exposed]) {
        let draw: f64 = rng.gen();
        let assigned_b = user.variant.is_some_and(|v| v.is_treatment());
        user.exposed = Some(assigned_b && draw < cfg.compliance_rate);
    }
    Ok(population)
}

/// Draw entry day and signup outcome
///
/// The day-decayed lift is added to the baseline probability of exposed users once,
/// clipped to [0, 1], and the outcome is a single Bernoulli draw.
pub fn simulate_signup(mut population: Population, cfg: &ExperimentConfig) -> Result<Population> {
    cfg.validate()?;
    population.require(Column::Exposed)?;

    let streams = RandomStreams::new(cfg.seed);
    let mut day_rng = streams.rng(Stream::Day);
    let mut signup_rng = streams.rng(Stream::Signup);

    for user in population.stage_mut(&[Column::Day, Column::PSignup, Column::SignedUp]) {
        let day = day_rng.gen_range(0..cfg.experiment_days);
        let p_base = baseline_signup_probability(cfg.baseline_signup_cvr, user);

        let lift = if user.exposed.unwrap_or(false) {
            decayed_lift(cfg.treatment_abs_lift, cfg.novelty_decay_k, day)
        } else {
            0.0
        };
        let p_signup = (p_base + lift).clamp(0.0, 1.0);

        user.day = Some(day);
        user.p_signup = Some(p_signup);
        user.signed_up = Some(signup_rng.gen::<f64>() < p_signup);
    }
    Ok(population)
}

/// Draw purchases for signed-up users; everyone else gets 0 without a draw
pub fn simulate_purchase(mut population: Population, cfg: &ExperimentConfig) -> Result<Population> {
    cfg.validate()?;
    population.require(Column::SignedUp)?;
    let mut rng = RandomStreams::new(cfg.seed).rng(Stream::Purchase);

    for user in population.stage_mut(&[Column::PPurchase, Column::Purchased]) {
        let p = purchase_probability(cfg.purchase_given_signup, user);
        user.p_purchase = Some(p);
        user.purchased = Some(user.signed_up.unwrap_or(false) && rng.gen::<f64>() < p);
    }
    Ok(population)
}

/// Full pipeline for one trial
pub fn run_experiment(n_users: usize, cfg: &ExperimentConfig) -> Result<Population> {
    cfg.validate()?;

    let users = generate_users(n_users, cfg.seed);
    let assigned = assign_variants(users, cfg.split, &cfg.assignment_salt, cfg.seed)?;
    let exposed = simulate_compliance(assigned, cfg)?;
    let signed = simulate_signup(exposed, cfg)?;
    let population = simulate_purchase(signed, cfg)?;

    debug!(
        seed = cfg.seed,
        n_users,
        compliance = cfg.compliance_rate,
        "Simulated experiment population"
    );
    Ok(population)
}
