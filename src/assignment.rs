//! Deterministic variant assignment
//!
//! Users are bucketed by hashing their identifier, so the same identifier with the same
//! split always lands in the same arm regardless of generation order or process
//! restarts. Assignment holds no state: every call is a pure function of its inputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AssignmentSalt;
use crate::errors::{Result, SimError};
use crate::population::{Column, Population};

/// Arm of an A/B experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// Control
    A,
    /// Treatment
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }

    pub fn is_treatment(&self) -> bool {
        *self == Variant::B
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A" | "a" => Ok(Variant::A),
            "B" | "b" => Ok(Variant::B),
            other => Err(SimError::invalid_config(
                "variant",
                format!("unknown arm label '{other}'"),
            )),
        }
    }
}

/// Map text to a bucket in [0, 1)
///
/// Reads the first 32 bits of the SHA-256 digest (the first 8 hex characters) as a
/// big-endian integer and divides by 2^32.
pub fn bucket(key: &str) -> f64 {
    let digest = Sha256::digest(key.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    f64::from(prefix) / 4_294_967_296.0
}

/// Arm for one user: `A` when the bucket is below `split`, otherwise `B`
pub fn assign_variant(user_id: u64, split: f64) -> Variant {
    variant_for_bucket(bucket(&user_id.to_string()), split)
}

/// Arm for one user with an experiment key mixed into the hash
pub fn assign_variant_salted(user_id: u64, salt: &AssignmentSalt, seed: u64, split: f64) -> Variant {
    let key = match salt {
        AssignmentSalt::None => user_id.to_string(),
        AssignmentSalt::Fixed(key) => format!("{key}:{user_id}"),
        AssignmentSalt::TrialSeed => format!("{seed}:{user_id}"),
    };
    variant_for_bucket(bucket(&key), split)
}

fn variant_for_bucket(bucket: f64, split: f64) -> Variant {
    if bucket < split {
        Variant::A
    } else {
        Variant::B
    }
}

/// Add the `variant` column to every row, keeping row order
pub fn assign_variants(
    mut population: Population,
    split: f64,
    salt: &AssignmentSalt,
    seed: u64,
) -> Result<Population> {
    if !(split > 0.0 && split < 1.0) {
        return Err(SimError::invalid_config(
            "split",
            format!("{split} is outside (0, 1)"),
        ));
    }
    population.require(Column::UserId)?;

    for user in population.stage_mut(&[Column::Variant]) {
        user.variant = Some(assign_variant_salted(user.user_id, salt, seed, split));
    }
    Ok(population)
}
