//! Frame wire codec.
//!
//! Every frame renders to one ASCII string small enough for a single QR
//! payload. The first two bytes are the type tag:
//!
//! ```text
//! M:{"block_size":64,"k":3,"orig_len":170,"integrity_check":"<hex>"}
//! Y:{"sequence":0,"ordinal":1,"total":4,"block_size":64,...,"confirmation_required":2}
//! S:<sequence>|<i1,i2,...>|<payload_hex>
//! ```
//!
//! `parse` is total over arbitrary input: anything that does not decode into
//! a well-formed frame comes back as `MalformedFrame`, never a panic. Range
//! checks that need session metadata (`index < k`, payload length) live in
//! [`SymbolFrame::validate_against`] so the codec itself stays stateless.

use serde::{Deserialize, Serialize};
use tightbeam_error::{Result, TightbeamError};

use crate::integrity::IntegrityAlgorithm;

/// Session constants carried by Meta and Sync frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMetadata {
    /// Source block size in bytes.
    pub block_size: u32,
    /// Number of source blocks.
    pub k: u32,
    /// Original payload length in bytes.
    pub orig_len: u64,
    /// Hex digest of the original payload (see [`crate::integrity`]).
    pub integrity_check: String,
}

impl BroadcastMetadata {
    /// Check the metadata invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` when `block_size == 0`, when `k == 0` with a
    /// nonzero `orig_len`, when `orig_len > k * block_size`, or when the
    /// integrity digest is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(TightbeamError::invalid_metadata("block_size is zero"));
        }
        if self.k == 0 && self.orig_len > 0 {
            return Err(TightbeamError::invalid_metadata(format!(
                "k is zero but orig_len = {}",
                self.orig_len
            )));
        }
        let capacity = u64::from(self.k) * u64::from(self.block_size);
        if self.orig_len > capacity {
            return Err(TightbeamError::invalid_metadata(format!(
                "orig_len {} exceeds k * block_size = {capacity}",
                self.orig_len
            )));
        }
        IntegrityAlgorithm::infer(&self.integrity_check)?;
        Ok(())
    }
}

/// Sync frame: acquisition beacon with an embedded metadata copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFrame {
    /// Session-unique frame sequence number.
    pub sequence: u64,
    /// Position of this sync within its burst, `1..=total`.
    pub ordinal: u32,
    /// Size of the sync burst (the preamble length).
    pub total: u32,
    /// Embedded session metadata, identical across all syncs of a session.
    #[serde(flatten)]
    pub metadata: BroadcastMetadata,
    /// Distinct sync sequences a receiver must observe before locking.
    pub confirmation_required: u32,
}

/// Symbol frame: one fountain-coded output symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFrame {
    /// Session-unique frame sequence number.
    pub sequence: u64,
    /// Distinct source-block indices, sorted ascending.
    pub indices: Vec<u32>,
    /// XOR of the source blocks at `indices`.
    pub payload: Vec<u8>,
}

impl SymbolFrame {
    /// Build a symbol frame, canonicalising the index order.
    #[must_use]
    pub fn new(sequence: u64, mut indices: Vec<u32>, payload: Vec<u8>) -> Self {
        indices.sort_unstable();
        Self {
            sequence,
            indices,
            payload,
        }
    }

    /// Degree of the carried symbol.
    #[must_use]
    pub fn degree(&self) -> usize {
        self.indices.len()
    }

    /// Validate this symbol against installed session metadata.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` for indices `>= k` and `MalformedFrame` when
    /// the payload length disagrees with `block_size`.
    pub fn validate_against(&self, metadata: &BroadcastMetadata) -> Result<()> {
        for &index in &self.indices {
            if index >= metadata.k {
                return Err(TightbeamError::IndexOutOfRange {
                    index,
                    k: metadata.k,
                });
            }
        }
        if self.payload.len() != metadata.block_size as usize {
            return Err(TightbeamError::malformed(format!(
                "payload length {} != block_size {}",
                self.payload.len(),
                metadata.block_size
            )));
        }
        Ok(())
    }
}

/// A parsed wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Metadata announcement.
    Meta(BroadcastMetadata),
    /// Sync beacon.
    Sync(SyncFrame),
    /// Fountain symbol.
    Symbol(SymbolFrame),
}

impl Frame {
    /// Sequence number, where the frame kind carries one.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Meta(_) => None,
            Self::Sync(sync) => Some(sync.sequence),
            Self::Symbol(symbol) => Some(symbol.sequence),
        }
    }
}

/// Render a frame to its wire string.
#[must_use]
pub fn encode(frame: &Frame) -> String {
    match frame {
        Frame::Meta(metadata) => {
            let body = serde_json::to_string(metadata).expect("metadata serialises");
            format!("M:{body}")
        }
        Frame::Sync(sync) => {
            let body = serde_json::to_string(sync).expect("sync frame serialises");
            format!("Y:{body}")
        }
        Frame::Symbol(symbol) => {
            let indices = symbol
                .indices
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "S:{}|{}|{}",
                symbol.sequence,
                indices,
                hex::encode(&symbol.payload)
            )
        }
    }
}

/// Parse a wire string back into a frame.
///
/// # Errors
///
/// Returns `MalformedFrame` for unknown tags, malformed JSON bodies,
/// unparseable integers, duplicate indices, or bad hex. Never panics on
/// truncated input.
pub fn parse(input: &str) -> Result<Frame> {
    if let Some(body) = input.strip_prefix("M:") {
        let metadata: BroadcastMetadata = serde_json::from_str(body)
            .map_err(|e| TightbeamError::malformed(format!("meta body: {e}")))?;
        return Ok(Frame::Meta(metadata));
    }
    if let Some(body) = input.strip_prefix("Y:") {
        let sync: SyncFrame = serde_json::from_str(body)
            .map_err(|e| TightbeamError::malformed(format!("sync body: {e}")))?;
        return Ok(Frame::Sync(sync));
    }
    if let Some(body) = input.strip_prefix("S:") {
        return parse_symbol_body(body).map(Frame::Symbol);
    }
    Err(TightbeamError::malformed(format!(
        "unknown frame tag: {:?}",
        input.chars().take(8).collect::<String>()
    )))
}

fn parse_symbol_body(body: &str) -> Result<SymbolFrame> {
    let mut parts = body.splitn(3, '|');
    let (Some(seq_part), Some(index_part), Some(hex_part)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(TightbeamError::malformed(
            "symbol frame needs sequence|indices|payload",
        ));
    };

    let sequence: u64 = seq_part
        .parse()
        .map_err(|_| TightbeamError::malformed(format!("symbol sequence: {seq_part:?}")))?;

    if index_part.is_empty() {
        return Err(TightbeamError::malformed("symbol has no indices"));
    }
    let mut indices = Vec::new();
    for piece in index_part.split(',') {
        let index: u32 = piece
            .parse()
            .map_err(|_| TightbeamError::malformed(format!("symbol index: {piece:?}")))?;
        indices.push(index);
    }
    indices.sort_unstable();
    if indices.windows(2).any(|w| w[0] == w[1]) {
        return Err(TightbeamError::malformed("symbol indices repeat"));
    }

    let payload = hex::decode(hex_part)
        .map_err(|e| TightbeamError::malformed(format!("symbol payload hex: {e}")))?;

    Ok(SymbolFrame {
        sequence,
        indices,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_metadata() -> BroadcastMetadata {
        BroadcastMetadata {
            block_size: 16,
            k: 3,
            orig_len: 48,
            integrity_check: IntegrityAlgorithm::Sha256.digest(b"sample"),
        }
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[test]
    fn meta_round_trip() {
        let frame = Frame::Meta(sample_metadata());
        let wire = encode(&frame);
        assert!(wire.starts_with("M:{"));
        assert_eq!(parse(&wire).unwrap(), frame);
    }

    #[test]
    fn sync_round_trip() {
        let frame = Frame::Sync(SyncFrame {
            sequence: 2,
            ordinal: 3,
            total: 4,
            metadata: sample_metadata(),
            confirmation_required: 2,
        });
        let wire = encode(&frame);
        assert!(wire.starts_with("Y:{"));
        assert_eq!(parse(&wire).unwrap(), frame);
    }

    #[test]
    fn symbol_round_trip() {
        let frame = Frame::Symbol(SymbolFrame::new(17, vec![2, 0], vec![0xab, 0xcd]));
        let wire = encode(&frame);
        assert_eq!(wire, "S:17|0,2|abcd");
        assert_eq!(parse(&wire).unwrap(), frame);
    }

    #[test]
    fn sync_wire_embeds_metadata_fields_flat() {
        let frame = Frame::Sync(SyncFrame {
            sequence: 0,
            ordinal: 1,
            total: 4,
            metadata: sample_metadata(),
            confirmation_required: 2,
        });
        let wire = encode(&frame);
        let value: serde_json::Value = serde_json::from_str(&wire[2..]).unwrap();
        assert_eq!(value["block_size"], 16);
        assert_eq!(value["k"], 3);
        assert_eq!(value["confirmation_required"], 2);
    }

    // -----------------------------------------------------------------------
    // Rejections
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_tag_rejected() {
        for input in ["X:whatever", "", "S", "M", "QR garbage"] {
            assert!(matches!(
                parse(input),
                Err(TightbeamError::MalformedFrame { .. })
            ));
        }
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(parse("M:{not json").is_err());
        assert!(parse("Y:[1,2,3]").is_err());
        assert!(parse("M:{\"block_size\":16}").is_err());
    }

    #[test]
    fn symbol_truncations_rejected() {
        for input in ["S:", "S:1", "S:1|", "S:1|0", "S:1|0|zz", "S:x|0|ab", "S:1||ab"] {
            assert!(
                matches!(parse(input), Err(TightbeamError::MalformedFrame { .. })),
                "expected rejection for {input:?}"
            );
        }
    }

    #[test]
    fn duplicate_indices_rejected() {
        assert!(matches!(
            parse("S:1|3,3|abcd"),
            Err(TightbeamError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn index_order_is_insensitive() {
        let a = parse("S:1|0,2,5|ab").unwrap();
        let b = parse("S:1|5,0,2|ab").unwrap();
        assert_eq!(a, b);
    }

    // -----------------------------------------------------------------------
    // Validation against metadata
    // -----------------------------------------------------------------------

    #[test]
    fn validate_rejects_out_of_range_index() {
        let metadata = sample_metadata();
        let frame = SymbolFrame::new(0, vec![0, 3], vec![0; 16]);
        assert!(matches!(
            frame.validate_against(&metadata),
            Err(TightbeamError::IndexOutOfRange { index: 3, k: 3 })
        ));
    }

    #[test]
    fn validate_rejects_wrong_payload_length() {
        let metadata = sample_metadata();
        let frame = SymbolFrame::new(0, vec![0], vec![0; 15]);
        assert!(matches!(
            frame.validate_against(&metadata),
            Err(TightbeamError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn metadata_validate_invariants() {
        let mut m = sample_metadata();
        assert!(m.validate().is_ok());

        m.block_size = 0;
        assert!(m.validate().is_err());

        m = sample_metadata();
        m.orig_len = 49;
        assert!(m.validate().is_err());

        m = sample_metadata();
        m.k = 0;
        assert!(m.validate().is_err());

        // Empty payload: k = 0 with orig_len = 0 is the one valid zero case.
        m = sample_metadata();
        m.k = 0;
        m.orig_len = 0;
        m.integrity_check = IntegrityAlgorithm::Sha256.digest(b"");
        assert!(m.validate().is_ok());

        m = sample_metadata();
        m.integrity_check = "nothex".to_owned();
        assert!(m.validate().is_err());
    }

    // -----------------------------------------------------------------------
    // Property tests
    // -----------------------------------------------------------------------

    proptest! {
        #[test]
        fn prop_symbol_round_trip(
            sequence in any::<u64>(),
            raw_indices in proptest::collection::btree_set(0_u32..1024, 1..12),
            payload in proptest::collection::vec(any::<u8>(), 0..128),
        ) {
            let indices: Vec<u32> = raw_indices.into_iter().collect();
            let frame = Frame::Symbol(SymbolFrame::new(sequence, indices, payload));
            prop_assert_eq!(parse(&encode(&frame)).unwrap(), frame);
        }

        #[test]
        fn prop_meta_round_trip(
            block_size in 1_u32..4096,
            k in 1_u32..4096,
            payload in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let metadata = BroadcastMetadata {
                block_size,
                k,
                orig_len: u64::from(k) * u64::from(block_size),
                integrity_check: IntegrityAlgorithm::Sha256.digest(&payload),
            };
            let frame = Frame::Meta(metadata);
            prop_assert_eq!(parse(&encode(&frame)).unwrap(), frame);
        }

        #[test]
        fn prop_parse_never_panics(input in "\\PC*") {
            let _ = parse(&input);
        }
    }
}
