//! Deterministic lossy-channel models for tests and benches.
//!
//! The optical channel loses frames in characteristic ways: independent
//! glare flashes (uniform drop), motion-blur runs (bursts), and longer
//! good/bad alternation as the camera hunts focus (Gilbert–Elliott). All
//! models draw from a seeded ChaCha8 stream, so a failing case replays
//! bit-identically from its seed.

use rand::seq::index::sample as index_sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Keep each item independently with probability `1 - loss_rate`.
#[must_use]
pub fn uniform_drop<T: Clone>(items: &[T], loss_rate: f64, seed: u64) -> Vec<T> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    items
        .iter()
        .filter(|_| rng.gen::<f64>() >= loss_rate)
        .cloned()
        .collect()
}

/// Drop random bursts: with probability `loss_rate` a burst of up to
/// `burst_len` consecutive items begins; everything else passes through.
#[must_use]
pub fn burst_eraser<T: Clone>(
    items: &[T],
    loss_rate: f64,
    burst_len: usize,
    seed: u64,
) -> Vec<T> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut kept = Vec::with_capacity(items.len());
    let mut i = 0;
    while i < items.len() {
        if rng.gen::<f64>() < loss_rate {
            i += rng.gen_range(1..=burst_len.max(1));
        } else {
            kept.push(items[i].clone());
            i += 1;
        }
    }
    kept
}

/// Two-state Gilbert–Elliott channel parameters.
#[derive(Debug, Clone, Copy)]
pub struct GilbertElliott {
    /// Good → Bad transition probability per item.
    pub p: f64,
    /// Bad → Good transition probability per item.
    pub r: f64,
    /// Erasure probability in the Good state.
    pub good_loss: f64,
    /// Erasure probability in the Bad state.
    pub bad_loss: f64,
}

impl Default for GilbertElliott {
    fn default() -> Self {
        Self {
            p: 0.05,
            r: 0.25,
            good_loss: 0.0,
            bad_loss: 0.8,
        }
    }
}

/// Run items through a Gilbert–Elliott channel starting in the Good state.
#[must_use]
pub fn gilbert_elliott_eraser<T: Clone>(
    items: &[T],
    channel: GilbertElliott,
    seed: u64,
) -> Vec<T> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut bad = false;
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        let loss = if bad { channel.bad_loss } else { channel.good_loss };
        if rng.gen::<f64>() >= loss {
            kept.push(item.clone());
        }
        let flip = if bad { channel.r } else { channel.p };
        if rng.gen::<f64>() < flip {
            bad = !bad;
        }
    }
    kept
}

/// A uniformly random subset of `count` items, in original order.
#[must_use]
pub fn uniform_subset<T: Clone>(items: &[T], count: usize, seed: u64) -> Vec<T> {
    let count = count.min(items.len());
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut picked: Vec<usize> = index_sample(&mut rng, items.len(), count).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| items[i].clone()).collect()
}
