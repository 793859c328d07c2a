//! Reproducible random streams
//!
//! Each simulation sub-step draws from its own generator, seeded from the trial seed
//! and a stream tag through SHA-256. Streams of one trial are independent of each
//! other, and consecutive trial seeds do not share streams (seed `s + 1`'s population
//! stream is unrelated to seed `s`'s purchase stream).

use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

/// Simulation sub-steps that consume randomness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Population,
    Compliance,
    Day,
    Signup,
    Purchase,
}

impl Stream {
    pub fn tag(&self) -> &'static str {
        match self {
            Stream::Population => "population",
            Stream::Compliance => "compliance",
            Stream::Day => "day",
            Stream::Signup => "signup",
            Stream::Purchase => "purchase",
        }
    }
}

/// Stream factory for one trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomStreams {
    seed: u64,
}

impl RandomStreams {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Fresh generator for a sub-step; calling twice yields identical sequences
    pub fn rng(&self, stream: Stream) -> StdRng {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(stream.tag().as_bytes());
        let key: [u8; 32] = hasher.finalize().into();
        StdRng::from_seed(key)
    }
}
