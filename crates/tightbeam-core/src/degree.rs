//! Symbol degree sampling.
//!
//! Each redundant output symbol XORs together `d` source blocks. The degree
//! `d` is drawn from a robust soliton distribution (c = 0.1, δ = 0.5) mixed
//! with a dense component: with probability [`DENSE_FRACTION`] the degree is
//! instead drawn uniformly from `[ceil(k/2), k]`. The soliton mass at degrees
//! 1 and 2 keeps the receiver's peeling fast path productive; the occasional
//! dense row bounds the coverage and rank-deficiency failure probability at
//! the small block counts an optical session actually uses, where a plain
//! soliton stream decodes unreliably at low overhead.
//!
//! Every draw is reproducible from `(seed, emission_index)`: the per-emission
//! RNG is a ChaCha8 stream keyed by an xxh3 hash of the pair, so two senders
//! with identical inputs emit identical symbol streams regardless of call
//! pattern.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tightbeam_error::{Result, TightbeamError};
use xxhash_rust::xxh3::xxh3_64;

/// Robust soliton shape parameter `c`.
pub const DEFAULT_SOLITON_C: f64 = 0.1;

/// Robust soliton decoder-failure bound `δ`.
pub const DEFAULT_SOLITON_DELTA: f64 = 0.5;

/// Probability that a draw uses the dense component instead of the soliton.
pub const DENSE_FRACTION: f64 = 0.2;

/// Derive the deterministic per-emission RNG for `(seed, emission_index)`.
#[must_use]
pub fn emission_rng(seed: u64, emission_index: u64) -> ChaCha8Rng {
    let mut key = [0_u8; 16];
    key[..8].copy_from_slice(&seed.to_le_bytes());
    key[8..].copy_from_slice(&emission_index.to_le_bytes());
    ChaCha8Rng::seed_from_u64(xxh3_64(&key))
}

/// Precomputed robust soliton CDF for a fixed `k`.
#[derive(Debug, Clone)]
pub struct RobustSoliton {
    k: u32,
    cdf: Vec<f64>,
}

impl RobustSoliton {
    /// Build the distribution for `k` source blocks.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `k == 0`.
    pub fn new(k: u32, c: f64, delta: f64) -> Result<Self> {
        if k == 0 {
            return Err(TightbeamError::out_of_range("soliton k", 0));
        }
        Ok(Self {
            k,
            cdf: Self::build_cdf(k, c, delta),
        })
    }

    fn build_cdf(k: u32, c: f64, delta: f64) -> Vec<f64> {
        let kf = f64::from(k);
        if k == 1 {
            return vec![1.0];
        }

        let c = c.max(1e-6);
        let delta = delta.clamp(1e-6, 1.0 - 1e-6);
        let r = (c * (kf / delta).ln() * kf.sqrt()).max(1.0);

        // Ideal soliton rho plus the robust spike tau at k/R.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let threshold = (kf / r) as u32;

        let mut weights = vec![0.0_f64; k as usize];
        weights[0] = 1.0 / kf;
        for d in 2..=k {
            let df = f64::from(d);
            weights[d as usize - 1] += 1.0 / (df * (df - 1.0));
        }
        if threshold >= 1 {
            for d in 1..threshold.min(k) {
                weights[d as usize - 1] += r / (f64::from(d) * kf);
            }
            if threshold <= k {
                weights[threshold as usize - 1] += r * (r / delta).ln() / kf;
            }
        }

        let total: f64 = weights.iter().sum();
        let mut cdf = Vec::with_capacity(k as usize);
        let mut running = 0.0;
        for w in &weights {
            running += w / total;
            cdf.push(running);
        }
        // Guard against accumulated rounding below 1.0.
        if let Some(last) = cdf.last_mut() {
            *last = 1.0;
        }
        cdf
    }

    /// Sample a degree in `[1, k]`.
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> u32 {
        let roll: f64 = rng.gen();
        for (i, cutoff) in self.cdf.iter().enumerate() {
            if roll <= *cutoff {
                return i as u32 + 1;
            }
        }
        self.k
    }
}

/// Degree sampler for one broadcast session: soliton core + dense mixture.
#[derive(Debug, Clone)]
pub struct DegreeSampler {
    k: u32,
    soliton: RobustSoliton,
    dense_fraction: f64,
}

impl DegreeSampler {
    /// Build the sampler for `k` source blocks with default parameters.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `k == 0`.
    pub fn new(k: u32) -> Result<Self> {
        Ok(Self {
            k,
            soliton: RobustSoliton::new(k, DEFAULT_SOLITON_C, DEFAULT_SOLITON_DELTA)?,
            dense_fraction: DENSE_FRACTION,
        })
    }

    /// Number of source blocks this sampler was built for.
    #[must_use]
    pub const fn k(&self) -> u32 {
        self.k
    }

    /// Draw a degree in `[1, k]` from the mixture.
    pub fn draw(&self, rng: &mut ChaCha8Rng) -> u32 {
        if self.k <= 2 {
            return self.soliton.sample(rng);
        }
        let mix: f64 = rng.gen();
        if mix < self.dense_fraction {
            rng.gen_range(self.k.div_ceil(2)..=self.k)
        } else {
            self.soliton.sample(rng)
        }
    }
}
