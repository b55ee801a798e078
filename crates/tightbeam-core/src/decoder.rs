//! LT fountain decoder: degree-1 peeling with a Gaussian-elimination fallback.
//!
//! Incoming symbols are first normalised against already-solved blocks, then
//! either peeled immediately (degree 1) or buffered. The symbol/block
//! adjacency is kept as two parallel integer-indexed tables (symbol slot →
//! index set, block → containing slots), so a solved block cascades through
//! every buffered symbol that references it in amortised linear time. When
//! peeling stalls and enough symbols have accumulated, the decoder runs
//! Gauss–Jordan elimination over GF(2) on bitset rows (64-bit words) and
//! feeds any fully-determined rows back into the peeler.
//!
//! Decode output is a function of the accepted-symbol multiset and metadata
//! only; arrival order changes how much work the cascade does, never the
//! recovered bytes.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use tightbeam_error::{Result, TightbeamError};
use tracing::{debug, error, info};

use crate::block::{assemble, xor_into};
use crate::frame::BroadcastMetadata;
use crate::integrity;
use crate::metrics::{LinkMetrics, RejectionKind};

/// Outcome of feeding one symbol into the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolOutcome {
    /// Symbol carried new information and was absorbed.
    Accepted,
    /// Symbol normalised to nothing (all its blocks already solved).
    Redundant,
    /// Normalised index set already present in the buffer.
    Duplicate,
    /// Normalised to empty indices with a non-zero payload: the symbol
    /// contradicts blocks the decoder has already solved.
    Corrupt,
}

/// A buffered symbol whose indices are all currently unsolved.
#[derive(Debug, Clone)]
struct ActiveSymbol {
    /// Sorted, distinct, unsolved source indices.
    indices: Vec<u32>,
    payload: Vec<u8>,
}

/// Receiver-side fountain decoder for one session.
#[derive(Debug)]
pub struct FountainDecoder {
    block_size: usize,
    k: usize,
    orig_len: usize,
    integrity_check: String,

    solved: Vec<Option<Vec<u8>>>,
    solved_count: usize,
    /// Symbol buffer; a slot goes `None` once peeled into a solved block.
    buffer: Vec<Option<ActiveSymbol>>,
    active_count: usize,
    /// block index → buffer slots whose index set contains that block.
    by_block: Vec<Vec<usize>>,
    /// Normalised index sets currently active, for duplicate detection.
    fingerprints: HashSet<Vec<u32>>,

    accepted_count: u32,
    complete: bool,
    integrity_failed: bool,
    recovered: Option<Vec<u8>>,
}

impl FountainDecoder {
    /// Create a decoder from validated session metadata.
    ///
    /// A `k == 0` session (empty payload) completes immediately.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if the metadata invariants do not hold.
    pub fn new(metadata: &BroadcastMetadata) -> Result<Self> {
        metadata.validate()?;
        let k = metadata.k as usize;
        let mut decoder = Self {
            block_size: metadata.block_size as usize,
            k,
            orig_len: usize::try_from(metadata.orig_len)
                .map_err(|_| TightbeamError::out_of_range("orig_len", metadata.orig_len))?,
            integrity_check: metadata.integrity_check.clone(),
            solved: vec![None; k],
            solved_count: 0,
            buffer: Vec::new(),
            active_count: 0,
            by_block: vec![Vec::new(); k],
            fingerprints: HashSet::new(),
            accepted_count: 0,
            complete: false,
            integrity_failed: false,
            recovered: None,
        };
        if k == 0 {
            decoder.finalize(&mut LinkMetrics::new());
        }
        Ok(decoder)
    }

    /// Number of solved source blocks.
    #[must_use]
    pub const fn solved_count(&self) -> usize {
        self.solved_count
    }

    /// Fraction of source blocks solved; 1.0 for the empty session.
    #[must_use]
    pub fn coverage(&self) -> f64 {
        if self.k == 0 {
            1.0
        } else {
            self.solved_count as f64 / self.k as f64
        }
    }

    /// Whether the payload is recovered and integrity-verified.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether a full recovery failed its integrity digest (latched).
    #[must_use]
    pub const fn integrity_failed(&self) -> bool {
        self.integrity_failed
    }

    /// The recovered payload, once complete.
    #[must_use]
    pub fn recovered(&self) -> Option<&[u8]> {
        self.recovered.as_deref()
    }

    /// Symbols accepted so far (excludes rejected ones).
    #[must_use]
    pub const fn accepted_count(&self) -> u32 {
        self.accepted_count
    }

    /// Feed one symbol.
    ///
    /// Rejection outcomes (`Redundant`, `Duplicate`, `Corrupt`) are recorded
    /// in `metrics` and returned as values; they never abort the session.
    ///
    /// # Errors
    ///
    /// Returns `MalformedFrame` for an empty index list, repeated indices, or
    /// a payload whose length disagrees with the block size, and
    /// `IndexOutOfRange` for indices `>= k`.
    pub fn ingest(
        &mut self,
        indices: &[u32],
        payload: &[u8],
        metrics: &mut LinkMetrics,
    ) -> Result<SymbolOutcome> {
        if indices.is_empty() {
            return Err(TightbeamError::malformed("symbol has no indices"));
        }
        for &index in indices {
            if index as usize >= self.k {
                return Err(TightbeamError::IndexOutOfRange {
                    index,
                    k: self.k as u32,
                });
            }
        }
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(TightbeamError::malformed("symbol indices repeat"));
        }
        if payload.len() != self.block_size {
            return Err(TightbeamError::malformed(format!(
                "payload length {} != block_size {}",
                payload.len(),
                self.block_size
            )));
        }

        // Normalise: XOR out solved blocks, keep the unsolved indices.
        let mut data = payload.to_vec();
        let mut remaining = Vec::with_capacity(sorted.len());
        for index in sorted {
            match &self.solved[index as usize] {
                Some(block) => xor_into(&mut data, block),
                None => remaining.push(index),
            }
        }

        if remaining.is_empty() {
            return if data.iter().all(|&b| b == 0) {
                metrics.record_rejection(RejectionKind::Redundant);
                Ok(SymbolOutcome::Redundant)
            } else {
                metrics.record_rejection(RejectionKind::Corrupt);
                error!("symbol contradicts solved blocks; counting as corrupt");
                Ok(SymbolOutcome::Corrupt)
            };
        }

        if self.fingerprints.contains(&remaining) {
            metrics.record_rejection(RejectionKind::Duplicate);
            return Ok(SymbolOutcome::Duplicate);
        }

        self.accepted_count += 1;
        metrics.record_degree(indices.len() as u32);

        if remaining.len() == 1 {
            let block = remaining[0];
            self.solve_cascade(block, data);
        } else {
            self.push_active(ActiveSymbol {
                indices: remaining,
                payload: data,
            });
        }

        self.probe_completion(metrics);
        Ok(SymbolOutcome::Accepted)
    }

    /// Buffer a reduced symbol and index it.
    fn push_active(&mut self, symbol: ActiveSymbol) {
        let slot = self.buffer.len();
        self.fingerprints.insert(symbol.indices.clone());
        for &index in &symbol.indices {
            self.by_block[index as usize].push(slot);
        }
        self.buffer.push(Some(symbol));
        self.active_count += 1;
    }

    /// Solve `block` and propagate through every buffered symbol touching it.
    fn solve_cascade(&mut self, block: u32, payload: Vec<u8>) {
        let mut queue = VecDeque::new();
        queue.push_back((block, payload));

        while let Some((block, payload)) = queue.pop_front() {
            let slot_ids = {
                let cell = &mut self.solved[block as usize];
                if cell.is_some() {
                    continue;
                }
                *cell = Some(payload.clone());
                self.solved_count += 1;
                std::mem::take(&mut self.by_block[block as usize])
            };

            for slot in slot_ids {
                let Some(symbol) = self.buffer[slot].as_mut() else {
                    continue;
                };
                let Ok(pos) = symbol.indices.binary_search(&block) else {
                    continue;
                };
                self.fingerprints.remove(&symbol.indices);
                symbol.indices.remove(pos);
                xor_into(&mut symbol.payload, &payload);

                match symbol.indices.len() {
                    0 => {
                        // Fully absorbed; nothing left to learn from it.
                        self.buffer[slot] = None;
                        self.active_count -= 1;
                    }
                    1 => {
                        let next_block = symbol.indices[0];
                        let next_payload = std::mem::take(&mut symbol.payload);
                        self.buffer[slot] = None;
                        self.active_count -= 1;
                        queue.push_back((next_block, next_payload));
                    }
                    _ => {
                        if !self.fingerprints.insert(symbol.indices.clone()) {
                            // Reduced onto another active symbol: now dependent.
                            let indices = symbol.indices.clone();
                            for &index in &indices {
                                self.by_block[index as usize].retain(|&s| s != slot);
                            }
                            self.buffer[slot] = None;
                            self.active_count -= 1;
                        }
                    }
                }
            }
        }
    }

    /// Finish if everything is solved, or fall back to elimination.
    fn probe_completion(&mut self, metrics: &mut LinkMetrics) {
        if self.complete || self.integrity_failed {
            return;
        }
        if self.solved_count == self.k {
            self.finalize(metrics);
            return;
        }
        if self.active_count > 0 && self.solved_count + self.active_count >= self.k {
            let started = Instant::now();
            self.eliminate();
            let success = self.solved_count == self.k;
            metrics.record_decode(
                started.elapsed(),
                success,
                self.solved_count as u32,
                self.accepted_count,
            );
            if success {
                self.finalize(metrics);
            }
        }
    }

    /// Gauss–Jordan elimination over GF(2) on the active buffer.
    ///
    /// Works on copies; the buffer itself is only consumed through the
    /// peeling cascade when a row reduces to a single block.
    fn eliminate(&mut self) {
        let unsolved: Vec<u32> = (0..self.k as u32)
            .filter(|&b| self.solved[b as usize].is_none())
            .collect();
        if unsolved.is_empty() {
            return;
        }
        let col_of = |block: u32| unsolved.binary_search(&block).expect("unsolved block");
        let words = unsolved.len().div_ceil(64);

        struct Row {
            mask: Vec<u64>,
            payload: Vec<u8>,
        }

        let mut rows: Vec<Row> = Vec::with_capacity(self.active_count);
        for symbol in self.buffer.iter().flatten() {
            let mut mask = vec![0_u64; words];
            for &index in &symbol.indices {
                let col = col_of(index);
                mask[col / 64] |= 1 << (col % 64);
            }
            rows.push(Row {
                mask,
                payload: symbol.payload.clone(),
            });
        }

        // Forward pass with full (Jordan) reduction.
        let mut pivot_rows = 0_usize;
        for col in 0..unsolved.len() {
            let word = col / 64;
            let bit = 1_u64 << (col % 64);
            let Some(pivot) = (pivot_rows..rows.len()).find(|&r| rows[r].mask[word] & bit != 0)
            else {
                continue;
            };
            rows.swap(pivot_rows, pivot);
            let pivot_mask = rows[pivot_rows].mask.clone();
            let pivot_payload = rows[pivot_rows].payload.clone();
            for (r, row) in rows.iter_mut().enumerate() {
                if r == pivot_rows || row.mask[word] & bit == 0 {
                    continue;
                }
                for (m, p) in row.mask.iter_mut().zip(&pivot_mask) {
                    *m ^= *p;
                }
                xor_into(&mut row.payload, &pivot_payload);
            }
            pivot_rows += 1;
            if pivot_rows == rows.len() {
                break;
            }
        }

        // Any row reduced to a single block is a solve; the cascade does the
        // rest of the bookkeeping against the live buffer.
        let mut solves = Vec::new();
        for row in &rows {
            let weight: u32 = row.mask.iter().map(|w| w.count_ones()).sum();
            if weight == 1 {
                let word = row.mask.iter().position(|&w| w != 0).expect("weight 1");
                let col = word * 64 + row.mask[word].trailing_zeros() as usize;
                solves.push((unsolved[col], row.payload.clone()));
            }
        }
        debug!(
            rank = pivot_rows,
            unsolved = unsolved.len(),
            solves = solves.len(),
            "elimination pass"
        );
        for (block, payload) in solves {
            self.solve_cascade(block, payload);
        }
    }

    /// Assemble, truncate, and verify the recovered payload.
    fn finalize(&mut self, metrics: &mut LinkMetrics) {
        debug_assert_eq!(self.solved_count, self.k);
        let blocks: Vec<Vec<u8>> = self
            .solved
            .iter()
            .map(|b| b.clone().expect("all blocks solved"))
            .collect();
        let payload = assemble(&blocks, self.orig_len);

        match integrity::verify(&self.integrity_check, &payload) {
            Ok(()) => {
                info!(
                    orig_len = self.orig_len,
                    symbols_accepted = self.accepted_count,
                    "payload recovered and verified"
                );
                self.recovered = Some(payload);
                self.complete = true;
            }
            Err(err) => {
                error!(%err, "recovered payload failed integrity check");
                metrics.record_rejection(RejectionKind::IntegrityFailure);
                self.integrity_failed = true;
            }
        }
    }
}
