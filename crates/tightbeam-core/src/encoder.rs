//! LT-style fountain encoder with systematic-first emission.
//!
//! The encoder emits exactly `k` systematic symbols (one source block each,
//! degree 1) followed by an unbounded stream of redundant symbols, each the
//! XOR of `d` distinct source blocks with `d` drawn from the session's
//! [`DegreeSampler`]. Redundant emission `i` draws everything from the RNG
//! keyed by `(seed, k + i)`, so the stream is a pure function of
//! `(payload, block_size, seed)`.

use rand::seq::index::sample as index_sample;
use tightbeam_error::{Result, TightbeamError};
use tracing::debug;

use crate::block::{split_blocks, xor_into};
use crate::degree::{emission_rng, DegreeSampler};

/// Bounded retries when resampling away from the previous index set.
const RESAMPLE_LIMIT: u32 = 16;

/// One output symbol: the source indices it covers and their XOR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSymbol {
    /// Distinct source-block indices, sorted ascending.
    pub indices: Vec<u32>,
    /// XOR of the source blocks at `indices`; `block_size` bytes.
    pub payload: Vec<u8>,
}

impl EncodedSymbol {
    /// Number of source blocks combined into this symbol.
    #[must_use]
    pub fn degree(&self) -> usize {
        self.indices.len()
    }

    /// Whether this symbol carries a single source block verbatim.
    #[must_use]
    pub fn is_systematic(&self) -> bool {
        self.indices.len() == 1
    }
}

/// Sender-side fountain encoder for one broadcast session.
#[derive(Debug)]
pub struct FountainEncoder {
    blocks: Vec<Vec<u8>>,
    block_size: usize,
    orig_len: usize,
    seed: u64,
    sampler: Option<DegreeSampler>,
    /// Emission index of the next redundant symbol; starts at `k`.
    next_emission: u64,
    prev_indices: Vec<u32>,
}

impl FountainEncoder {
    /// Partition `payload` and prepare the symbol stream.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if `block_size == 0`.
    pub fn new(payload: &[u8], block_size: usize, seed: u64) -> Result<Self> {
        let blocks = split_blocks(payload, block_size)?;
        let k = u32::try_from(blocks.len())
            .map_err(|_| TightbeamError::out_of_range("k", blocks.len()))?;
        let sampler = if k == 0 { None } else { Some(DegreeSampler::new(k)?) };

        debug!(k, block_size, seed, "fountain encoder ready");
        Ok(Self {
            blocks,
            block_size,
            orig_len: payload.len(),
            seed,
            sampler,
            next_emission: u64::from(k),
            prev_indices: Vec::new(),
        })
    }

    /// Number of source blocks.
    #[must_use]
    pub fn k(&self) -> u32 {
        self.blocks.len() as u32
    }

    /// Source block size in bytes.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Original payload length in bytes.
    #[must_use]
    pub const fn orig_len(&self) -> usize {
        self.orig_len
    }

    /// Session seed all redundant draws derive from.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Emit the `k` systematic symbols in block order.
    #[must_use]
    pub fn systematic_symbols(&self) -> Vec<EncodedSymbol> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| EncodedSymbol {
                indices: vec![i as u32],
                payload: block.clone(),
            })
            .collect()
    }

    /// Emit the next redundant symbol.
    ///
    /// Returns `None` when the session has no source blocks (`k == 0`).
    pub fn next_redundant(&mut self) -> Option<EncodedSymbol> {
        let sampler = self.sampler.as_ref()?;
        let k = sampler.k();
        let mut rng = emission_rng(self.seed, self.next_emission);
        self.next_emission += 1;

        let mut indices = Self::draw_indices(sampler, &mut rng, k);
        if k > 1 {
            // Diversification only: avoid repeating the previous index set.
            let mut retries = 0;
            while indices == self.prev_indices && retries < RESAMPLE_LIMIT {
                indices = Self::draw_indices(sampler, &mut rng, k);
                retries += 1;
            }
        }

        let mut payload = vec![0_u8; self.block_size];
        for &i in &indices {
            xor_into(&mut payload, &self.blocks[i as usize]);
        }

        self.prev_indices.clone_from(&indices);
        Some(EncodedSymbol { indices, payload })
    }

    /// Emit `count` redundant symbols.
    pub fn redundant_symbols(&mut self, count: u32) -> Vec<EncodedSymbol> {
        (0..count).filter_map(|_| self.next_redundant()).collect()
    }

    fn draw_indices(
        sampler: &DegreeSampler,
        rng: &mut rand_chacha::ChaCha8Rng,
        k: u32,
    ) -> Vec<u32> {
        let d = sampler.draw(rng) as usize;
        let mut indices: Vec<u32> = index_sample(rng, k as usize, d)
            .into_iter()
            .map(|i| i as u32)
            .collect();
        indices.sort_unstable();
        indices
    }
}
