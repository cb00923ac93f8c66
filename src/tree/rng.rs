//! Seeded random source with full state capture
//!
//! ChaCha8 gives the same stream on every platform, and because the state is
//! plain data a snapshot is just a copy of it. Child stems grow on streams of
//! their own, split off with [`TreeRng::fork`] or [`TreeRng::derive`].

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Captured generator state, see [`TreeRng::snapshot`]
#[derive(Clone, Debug)]
pub struct RngSnapshot(ChaCha8Rng);

/// Deterministic uniform source driving every random decision of a tree
#[derive(Clone, Debug)]
pub struct TreeRng {
    rng: ChaCha8Rng,
    /// Seed this stream was created from
    key: u64,
    /// Total values drawn, including draws later rolled back
    draws: u64,
}

/// splitmix64 finalizer
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

impl TreeRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            key: seed,
            draws: 0,
        }
    }

    /// New stream seeded from the next value of this one
    pub fn fork(&mut self) -> TreeRng {
        self.draws += 1;
        TreeRng::new(self.rng.next_u64())
    }

    /// New stream determined by this stream's seed and `salt`.
    ///
    /// Draws nothing, so the result does not depend on how far this stream
    /// has advanced.
    pub fn derive(&self, salt: u64) -> TreeRng {
        TreeRng::new(mix(self.key ^ mix(salt.wrapping_add(0x9e3779b97f4a7c15))))
    }

    /// Uniform f32 in [0, 1)
    pub fn random(&mut self) -> f32 {
        self.draws += 1;
        self.rng.gen_range(0.0..1.0)
    }

    /// Uniform f32 in [lo, hi)
    pub fn uniform(&mut self, lo: f32, hi: f32) -> f32 {
        lo + self.random() * (hi - lo)
    }

    /// Uniform f32 in [-1, 1), the usual multiplier for a `*_v` variance
    pub fn signed(&mut self) -> f32 {
        self.uniform(-1.0, 1.0)
    }

    pub fn snapshot(&self) -> RngSnapshot {
        RngSnapshot(self.rng.clone())
    }

    /// Rewind to a snapshot. The draw counter keeps counting.
    pub fn restore(&mut self, snapshot: &RngSnapshot) {
        self.rng = snapshot.0.clone();
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }
}
