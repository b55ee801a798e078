//! Source block partitioning.
//!
//! A payload is split into `k = ceil(orig_len / block_size)` fixed-size
//! blocks, the last one zero-padded. Reassembly concatenates solved blocks in
//! index order and truncates back to `orig_len`, stripping the padding.

use tightbeam_error::{Result, TightbeamError};
use tracing::debug;

/// Split a payload into fixed-size source blocks, zero-padding the last.
///
/// An empty payload partitions into zero blocks.
///
/// # Errors
///
/// Returns `InvalidMetadata` if `block_size == 0`.
pub fn split_blocks(payload: &[u8], block_size: usize) -> Result<Vec<Vec<u8>>> {
    if block_size == 0 {
        return Err(TightbeamError::invalid_metadata("block_size is zero"));
    }

    let k = payload.len().div_ceil(block_size);
    let mut blocks = Vec::with_capacity(k);
    for chunk in payload.chunks(block_size) {
        let mut block = chunk.to_vec();
        block.resize(block_size, 0);
        blocks.push(block);
    }

    debug!(
        orig_len = payload.len(),
        block_size,
        k,
        "partitioned payload into source blocks"
    );
    debug_assert_eq!(blocks.len(), k);
    Ok(blocks)
}

/// Concatenate source blocks in index order and truncate to `orig_len`.
#[must_use]
pub fn assemble(blocks: &[Vec<u8>], orig_len: usize) -> Vec<u8> {
    let mut out: Vec<u8> = blocks.iter().flatten().copied().collect();
    out.truncate(orig_len);
    out
}

/// XOR `src` into `dst` in place. Both slices must be the same length.
pub(crate) fn xor_into(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // -----------------------------------------------------------------------
    // Unit tests
    // -----------------------------------------------------------------------

    #[test]
    fn empty_payload_partitions_to_zero_blocks() {
        let blocks = split_blocks(b"", 16).expect("empty payload should succeed");
        assert!(blocks.is_empty());
    }

    #[test]
    fn exact_multiple_has_no_padding() {
        let blocks = split_blocks(b"abcdefgh", 4).expect("partition should succeed");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], b"abcd");
        assert_eq!(blocks[1], b"efgh");
    }

    #[test]
    fn payload_of_one_block_size_is_single_block() {
        let blocks = split_blocks(b"abcd", 4).expect("partition should succeed");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], b"abcd");
    }

    #[test]
    fn last_block_is_zero_padded() {
        let blocks = split_blocks(b"abcde", 4).expect("partition should succeed");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1], b"e\x00\x00\x00");
    }

    #[test]
    fn zero_block_size_rejected() {
        let result = split_blocks(b"abc", 0);
        assert!(matches!(
            result,
            Err(TightbeamError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn assemble_strips_padding() {
        let blocks = split_blocks(b"abcde", 4).expect("partition should succeed");
        assert_eq!(assemble(&blocks, 5), b"abcde");
    }

    #[test]
    fn assemble_empty() {
        assert_eq!(assemble(&[], 0), Vec::<u8>::new());
    }

    #[test]
    fn xor_into_is_involutive() {
        let a = [0xde, 0xad, 0xbe, 0xef];
        let b = [0x01, 0x02, 0x03, 0x04];
        let mut acc = a;
        xor_into(&mut acc, &b);
        xor_into(&mut acc, &b);
        assert_eq!(acc, a);
    }

    // -----------------------------------------------------------------------
    // Property tests
    // -----------------------------------------------------------------------

    proptest! {
        #[test]
        fn prop_split_then_assemble_round_trips(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            block_size in 1_usize..96,
        ) {
            let blocks = split_blocks(&payload, block_size).unwrap();
            prop_assert_eq!(blocks.len(), payload.len().div_ceil(block_size));
            for block in &blocks {
                prop_assert_eq!(block.len(), block_size);
            }
            prop_assert_eq!(assemble(&blocks, payload.len()), payload);
        }

        #[test]
        fn prop_padding_is_zero(
            payload in proptest::collection::vec(1_u8..=255, 1..256),
            block_size in 1_usize..64,
        ) {
            let blocks = split_blocks(&payload, block_size).unwrap();
            let tail = blocks.last().unwrap();
            let used = payload.len() - (blocks.len() - 1) * block_size;
            for &byte in &tail[used..] {
                prop_assert_eq!(byte, 0);
            }
        }
    }
}
