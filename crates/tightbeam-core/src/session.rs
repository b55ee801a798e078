//! Session orchestration: the surface the capture pipeline talks to.
//!
//! Sender side, [`prepare_broadcast`] turns a payload and options into a
//! fully materialised playback list (preamble syncs, one metadata frame, the
//! interleaved symbol stream) plus emission stats. Receiver side,
//! [`ReceiverSession`] owns the sync tracker, decoder, and metrics for one
//! session and exposes the reset / feed-symbol / status contract. Both are
//! plain owned values; running several sessions side by side just means
//! holding several values.

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;
use tightbeam_error::{Result, TightbeamError};
use tracing::{debug, info, warn};

use crate::decoder::{FountainDecoder, SymbolOutcome};
use crate::encoder::FountainEncoder;
use crate::frame::{self, BroadcastMetadata, Frame, SymbolFrame};
use crate::integrity::IntegrityAlgorithm;
use crate::metrics::{LinkMetrics, MetricsSummary, RejectionKind};
use crate::sync::{interleave_playback, SyncConfig, SyncEvent, SyncState, SyncTracker};

/// Default source block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 64;

/// Cap on symbols buffered while acquiring lock with pending metadata.
const PRELOCK_BUFFER_MAX: usize = 1024;

/// Sender-side session options.
#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    /// Source block size in bytes.
    pub block_size: u32,
    /// Redundant symbol count; `None` means `ceil(0.75 * k)`.
    pub redundant_count: Option<u32>,
    /// Sync interleaving parameters.
    pub sync: SyncConfig,
    /// Session seed; `None` draws a fresh random 64-bit seed.
    pub seed: Option<u64>,
    /// Digest algorithm for the session integrity check.
    pub integrity_algorithm: IntegrityAlgorithm,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            redundant_count: None,
            sync: SyncConfig::default(),
            seed: None,
            integrity_algorithm: IntegrityAlgorithm::Sha256,
        }
    }
}

/// A fully materialised broadcast, ready for playback.
#[derive(Debug, Clone)]
pub struct BroadcastPackage {
    /// Seed every redundant draw derived from.
    pub seed: u64,
    /// Session metadata embedded in the meta and sync frames.
    pub metadata: BroadcastMetadata,
    /// The playback list, in emission order.
    pub frames: Vec<Frame>,
    /// Number of systematic symbols in the stream.
    pub systematic_count: u32,
    /// Number of redundant symbols in the stream.
    pub redundant_count: u32,
    /// Sync configuration the list was interleaved with.
    pub sync: SyncConfig,
    /// Emission-side metrics (degree histogram).
    pub metrics: MetricsSummary,
}

impl BroadcastPackage {
    /// Render every frame to its wire string, in playback order.
    #[must_use]
    pub fn wire_frames(&self) -> Vec<String> {
        self.frames.iter().map(frame::encode).collect()
    }
}

/// Materialise a broadcast package for `payload`.
///
/// The frame list is deterministic given `(payload, seed, options)`.
///
/// # Errors
///
/// Returns `InvalidMetadata` if `options.block_size == 0`.
pub fn prepare_broadcast(payload: &[u8], options: &BroadcastOptions) -> Result<BroadcastPackage> {
    let seed = options.seed.unwrap_or_else(rand::random);
    let mut encoder = FountainEncoder::new(payload, options.block_size as usize, seed)?;
    let k = encoder.k();

    let metadata = BroadcastMetadata {
        block_size: options.block_size,
        k,
        orig_len: payload.len() as u64,
        integrity_check: options.integrity_algorithm.digest(payload),
    };
    metadata.validate()?;

    let redundant_count = options
        .redundant_count
        .unwrap_or_else(|| (3 * k).div_ceil(4));

    let mut metrics = LinkMetrics::new();
    let mut symbols = encoder.systematic_symbols();
    symbols.extend(encoder.redundant_symbols(redundant_count));
    for symbol in &symbols {
        metrics.record_degree(symbol.degree() as u32);
    }
    let systematic_count = k;
    let redundant_count = symbols.len() as u32 - systematic_count;

    let frames = interleave_playback(&metadata, &symbols, &options.sync);
    info!(
        k,
        seed,
        systematic_count,
        redundant_count,
        total_frames = frames.len(),
        "broadcast package prepared"
    );

    Ok(BroadcastPackage {
        seed,
        metadata,
        frames,
        systematic_count,
        redundant_count,
        sync: options.sync,
        metrics: metrics.summary(),
    })
}

/// Receiver status snapshot, returned from every ingestion call.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    /// The last symbol carried new information.
    pub newly_added: bool,
    /// The last symbol was redundant (repeat sequence or no new information).
    pub redundant: bool,
    /// Distinct symbol sequences observed.
    pub symbols_observed: u64,
    /// Distinct symbol index-set fingerprints observed.
    pub unique_symbols: u64,
    /// Solved source blocks over `k`.
    pub coverage: f64,
    /// Payload recovered and integrity-verified.
    pub decode_complete: bool,
    /// Full recovery failed its integrity digest (latched until reset).
    pub integrity_failed: bool,
    /// Recovered payload, when complete and valid UTF-8.
    pub recovered_text: Option<String>,
    /// Session metrics snapshot.
    pub metrics: MetricsSummary,
}

/// Receiver-side state for one broadcast session.
#[derive(Debug)]
pub struct ReceiverSession {
    sync_config: SyncConfig,
    tracker: SyncTracker,
    metadata: Option<BroadcastMetadata>,
    decoder: Option<FountainDecoder>,
    metrics: LinkMetrics,
    sequences_seen: HashSet<u64>,
    unique_fingerprints: HashSet<Vec<u32>>,
    prelock_buffer: Vec<SymbolFrame>,
}

impl ReceiverSession {
    /// Create a session with no metadata yet; lock comes from the stream.
    #[must_use]
    pub fn new(sync_config: SyncConfig) -> Self {
        Self {
            sync_config,
            tracker: SyncTracker::new(&sync_config),
            metadata: None,
            decoder: None,
            metrics: LinkMetrics::new(),
            sequences_seen: HashSet::new(),
            unique_fingerprints: HashSet::new(),
            prelock_buffer: Vec::new(),
        }
    }

    /// Create a session with metadata already known out of band.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if the metadata invariants do not hold; this
    /// is the only condition that refuses to create a session.
    pub fn with_metadata(sync_config: SyncConfig, metadata: BroadcastMetadata) -> Result<Self> {
        let mut session = Self::new(sync_config);
        session.reset(metadata)?;
        Ok(session)
    }

    /// Install metadata and drop all decoder state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if the metadata invariants do not hold; the
    /// previous session state is left untouched in that case.
    pub fn reset(&mut self, metadata: BroadcastMetadata) -> Result<()> {
        let decoder = FountainDecoder::new(&metadata)?;
        info!(
            block_size = metadata.block_size,
            k = metadata.k,
            orig_len = metadata.orig_len,
            "receiver session reset"
        );
        self.metadata = Some(metadata);
        self.decoder = Some(decoder);
        self.metrics = LinkMetrics::new();
        self.sequences_seen.clear();
        self.unique_fingerprints.clear();
        self.prelock_buffer.clear();
        self.tracker = SyncTracker::new(&self.sync_config);
        Ok(())
    }

    /// Current sync acquisition state.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.tracker.state()
    }

    /// Installed session metadata, if any.
    #[must_use]
    pub fn metadata(&self) -> Option<&BroadcastMetadata> {
        self.metadata.as_ref()
    }

    /// Recovered payload bytes, once decode is complete.
    #[must_use]
    pub fn recovered_payload(&self) -> Option<&[u8]> {
        self.decoder.as_ref().and_then(FountainDecoder::recovered)
    }

    /// Idempotent status read.
    #[must_use]
    pub fn status(&self) -> Status {
        self.make_status(false, false)
    }

    /// Ingest one symbol, stamping it with the current time.
    ///
    /// # Errors
    ///
    /// Propagates only internal errors; every per-frame failure is recorded
    /// as a rejection and folded into the returned `Status`.
    pub fn add_symbol(&mut self, sequence: u64, indices: &[u32], payload: &[u8]) -> Result<Status> {
        self.add_symbol_at(sequence, indices, payload, Instant::now())
    }

    /// Ingest one symbol given its wire-format hex payload.
    ///
    /// # Errors
    ///
    /// See [`Self::add_symbol`].
    pub fn add_symbol_hex(
        &mut self,
        sequence: u64,
        indices: &[u32],
        payload_hex: &str,
    ) -> Result<Status> {
        match hex::decode(payload_hex) {
            Ok(payload) => self.add_symbol(sequence, indices, &payload),
            Err(err) => {
                debug!(%err, sequence, "rejecting symbol with bad hex payload");
                self.metrics.record_rejection(RejectionKind::Malformed);
                Ok(self.make_status(false, false))
            }
        }
    }

    /// Ingest one symbol at an explicit instant (replayable form).
    ///
    /// # Errors
    ///
    /// See [`Self::add_symbol`].
    pub fn add_symbol_at(
        &mut self,
        sequence: u64,
        indices: &[u32],
        payload: &[u8],
        now: Instant,
    ) -> Result<Status> {
        self.tracker.check_watchdog(now);
        let frame = SymbolFrame::new(sequence, indices.to_vec(), payload.to_vec());
        Ok(self.ingest_symbol(frame, now))
    }

    /// Ingest one wire frame string: codec, sync tracking, then the decoder.
    pub fn ingest_frame(&mut self, text: &str, now: Instant) -> Status {
        self.tracker.check_watchdog(now);

        let frame = match frame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%err, "dropping unparseable frame");
                self.metrics.record_rejection(RejectionKind::Malformed);
                return self.make_status(false, false);
            }
        };

        match frame {
            Frame::Meta(metadata) => {
                if let Err(err) = self.install_metadata(metadata) {
                    warn!(%err, "ignoring unusable metadata frame");
                    self.metrics.record_rejection(RejectionKind::Malformed);
                }
                self.make_status(false, false)
            }
            Frame::Sync(sync) => {
                if let Err(err) = sync.metadata.validate() {
                    warn!(%err, "ignoring sync frame with unusable metadata");
                    self.metrics.record_rejection(RejectionKind::Malformed);
                    return self.make_status(false, false);
                }
                if let SyncEvent::Locked(metadata) = self.tracker.observe_sync(&sync, now) {
                    if let Err(err) = self.install_metadata(metadata) {
                        warn!(%err, "sync-confirmed metadata rejected");
                    } else {
                        self.flush_prelock(now);
                    }
                }
                self.make_status(false, false)
            }
            Frame::Symbol(symbol) => {
                if self.metadata.is_some() {
                    self.ingest_symbol(symbol, now)
                } else if self.tracker.pending_metadata().is_some() {
                    if self.prelock_buffer.len() < PRELOCK_BUFFER_MAX {
                        self.prelock_buffer.push(symbol);
                    }
                    self.make_status(false, false)
                } else {
                    self.metrics.record_rejection(RejectionKind::NotLocked);
                    self.make_status(false, false)
                }
            }
        }
    }

    /// Install metadata, keeping decoder state when nothing changed.
    fn install_metadata(&mut self, metadata: BroadcastMetadata) -> Result<()> {
        if self.metadata.as_ref() == Some(&metadata) {
            return Ok(());
        }
        metadata.validate()?;
        if self.metadata.is_some() {
            warn!("session metadata changed; dropping decoder state");
        }
        let decoder = FountainDecoder::new(&metadata)?;
        self.metadata = Some(metadata);
        self.decoder = Some(decoder);
        self.sequences_seen.clear();
        self.unique_fingerprints.clear();
        Ok(())
    }

    /// Replay symbols buffered while acquiring.
    fn flush_prelock(&mut self, now: Instant) {
        if self.prelock_buffer.is_empty() {
            return;
        }
        debug!(
            buffered = self.prelock_buffer.len(),
            "replaying symbols buffered before lock"
        );
        let buffered = std::mem::take(&mut self.prelock_buffer);
        for symbol in buffered {
            let _ = self.ingest_symbol(symbol, now);
        }
    }

    fn ingest_symbol(&mut self, symbol: SymbolFrame, now: Instant) -> Status {
        let Some(metadata) = self.metadata.clone() else {
            self.metrics.record_rejection(RejectionKind::NotLocked);
            return self.make_status(false, false);
        };

        if !self.sequences_seen.insert(symbol.sequence) {
            return self.make_status(false, true);
        }

        if let Err(err) = symbol.validate_against(&metadata) {
            let kind = match err {
                TightbeamError::IndexOutOfRange { .. } => RejectionKind::IndexOutOfRange,
                _ => RejectionKind::Malformed,
            };
            debug!(%err, sequence = symbol.sequence, "rejecting symbol");
            self.metrics.record_rejection(kind);
            return self.make_status(false, false);
        }
        self.unique_fingerprints.insert(symbol.indices.clone());

        let decoder = self.decoder.as_mut().expect("decoder exists with metadata");
        match decoder.ingest(&symbol.indices, &symbol.payload, &mut self.metrics) {
            Ok(SymbolOutcome::Accepted) => {
                self.tracker.note_activity(now);
                self.make_status(true, false)
            }
            Ok(SymbolOutcome::Redundant | SymbolOutcome::Duplicate) => {
                self.make_status(false, true)
            }
            Ok(SymbolOutcome::Corrupt) => self.make_status(false, false),
            Err(err) => {
                let kind = match err {
                    TightbeamError::IndexOutOfRange { .. } => RejectionKind::IndexOutOfRange,
                    _ => RejectionKind::Malformed,
                };
                debug!(%err, sequence = symbol.sequence, "decoder rejected symbol");
                self.metrics.record_rejection(kind);
                self.make_status(false, false)
            }
        }
    }

    fn make_status(&self, newly_added: bool, redundant: bool) -> Status {
        let decoder = self.decoder.as_ref();
        let recovered_text = decoder
            .and_then(|d| d.recovered())
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok());
        Status {
            newly_added,
            redundant,
            symbols_observed: self.sequences_seen.len() as u64,
            unique_symbols: self.unique_fingerprints.len() as u64,
            coverage: decoder.map_or(0.0, FountainDecoder::coverage),
            decode_complete: decoder.is_some_and(FountainDecoder::is_complete),
            integrity_failed: decoder.is_some_and(FountainDecoder::integrity_failed),
            recovered_text,
            metrics: self.metrics.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(seed: u64) -> BroadcastOptions {
        BroadcastOptions {
            block_size: 16,
            seed: Some(seed),
            ..BroadcastOptions::default()
        }
    }

    // -----------------------------------------------------------------------
    // Sender
    // -----------------------------------------------------------------------

    #[test]
    fn prepare_broadcast_is_deterministic() {
        let payload = b"determinism matters for replay";
        let a = prepare_broadcast(payload, &options(5)).unwrap();
        let b = prepare_broadcast(payload, &options(5)).unwrap();
        assert_eq!(a.frames, b.frames);
        assert_eq!(a.metadata, b.metadata);
    }

    #[test]
    fn prepare_broadcast_counts_and_defaults() {
        let payload = vec![7_u8; 16 * 8]; // k = 8
        let package = prepare_broadcast(&payload, &options(1)).unwrap();
        assert_eq!(package.metadata.k, 8);
        assert_eq!(package.systematic_count, 8);
        assert_eq!(package.redundant_count, 6); // ceil(0.75 * 8)
        assert_eq!(package.metadata.orig_len, 128);
        // Preamble + meta + symbols + re-inserted syncs.
        let symbol_frames = package
            .frames
            .iter()
            .filter(|f| matches!(f, Frame::Symbol(_)))
            .count();
        assert_eq!(symbol_frames, 14);
    }

    #[test]
    fn prepare_broadcast_rejects_zero_block_size() {
        let result = prepare_broadcast(
            b"x",
            &BroadcastOptions {
                block_size: 0,
                ..BroadcastOptions::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_payload_package_has_no_symbols() {
        let package = prepare_broadcast(b"", &options(3)).unwrap();
        assert_eq!(package.metadata.k, 0);
        assert_eq!(package.systematic_count, 0);
        assert_eq!(package.redundant_count, 0);
        assert!(package
            .frames
            .iter()
            .all(|f| !matches!(f, Frame::Symbol(_))));
    }

    // -----------------------------------------------------------------------
    // Receiver contract
    // -----------------------------------------------------------------------

    #[test]
    fn reset_rejects_invalid_metadata() {
        let mut session = ReceiverSession::new(SyncConfig::default());
        let bad = BroadcastMetadata {
            block_size: 0,
            k: 1,
            orig_len: 1,
            integrity_check: IntegrityAlgorithm::Sha256.digest(b"x"),
        };
        assert!(session.reset(bad).is_err());
        assert!(session.metadata().is_none());
    }

    #[test]
    fn direct_metadata_then_symbols_recovers() {
        let payload = b"The quick brown fox.";
        let package = prepare_broadcast(payload, &options(11)).unwrap();
        let mut session =
            ReceiverSession::with_metadata(SyncConfig::default(), package.metadata.clone())
                .unwrap();

        let mut last = session.status();
        for frame in &package.frames {
            if let Frame::Symbol(s) = frame {
                last = session.add_symbol(s.sequence, &s.indices, &s.payload).unwrap();
                if last.decode_complete {
                    break;
                }
            }
        }
        assert!(last.decode_complete);
        assert_eq!(session.recovered_payload(), Some(&payload[..]));
        assert_eq!(last.recovered_text.as_deref(), Some("The quick brown fox."));
    }

    #[test]
    fn repeat_sequence_reports_redundant() {
        let payload = vec![1_u8; 64];
        let package = prepare_broadcast(&payload, &options(2)).unwrap();
        let mut session =
            ReceiverSession::with_metadata(SyncConfig::default(), package.metadata.clone())
                .unwrap();
        let symbol = package
            .frames
            .iter()
            .find_map(|f| match f {
                Frame::Symbol(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();

        let first = session
            .add_symbol(symbol.sequence, &symbol.indices, &symbol.payload)
            .unwrap();
        assert!(first.newly_added);
        let second = session
            .add_symbol(symbol.sequence, &symbol.indices, &symbol.payload)
            .unwrap();
        assert!(!second.newly_added);
        assert!(second.redundant);
        assert_eq!(second.symbols_observed, 1);
    }

    #[test]
    fn symbol_before_any_metadata_counts_not_locked() {
        let mut session = ReceiverSession::new(SyncConfig::default());
        let status = session.add_symbol(0, &[0], &[0_u8; 16]).unwrap();
        assert!(!status.newly_added);
        assert_eq!(status.metrics.rejected.get("not_locked"), Some(&1));
    }

    #[test]
    fn out_of_range_index_is_counted_not_fatal() {
        let payload = vec![9_u8; 32];
        let package = prepare_broadcast(&payload, &options(4)).unwrap();
        let mut session =
            ReceiverSession::with_metadata(SyncConfig::default(), package.metadata.clone())
                .unwrap();
        let status = session.add_symbol(0, &[99], &vec![0_u8; 16]).unwrap();
        assert!(!status.newly_added);
        assert_eq!(status.metrics.rejected.get("index_out_of_range"), Some(&1));

        // Session keeps working afterwards.
        let mut complete = false;
        for frame in &package.frames {
            if let Frame::Symbol(s) = frame {
                complete = session
                    .add_symbol(s.sequence, &s.indices, &s.payload)
                    .unwrap()
                    .decode_complete;
            }
        }
        assert!(complete);
    }

    #[test]
    fn empty_payload_completes_on_reset() {
        let package = prepare_broadcast(b"", &options(8)).unwrap();
        let session =
            ReceiverSession::with_metadata(SyncConfig::default(), package.metadata).unwrap();
        let status = session.status();
        assert!(status.decode_complete);
        assert_eq!(status.recovered_text.as_deref(), Some(""));
        assert!((status.coverage - 1.0).abs() < f64::EPSILON);
    }

    // -----------------------------------------------------------------------
    // Full frame pipeline
    // -----------------------------------------------------------------------

    #[test]
    fn stream_ingestion_locks_and_recovers() {
        let payload = b"stream me over the air gap";
        let package = prepare_broadcast(payload, &options(21)).unwrap();
        let mut session = ReceiverSession::new(SyncConfig::default());
        let now = Instant::now();

        for wire in package.wire_frames() {
            session.ingest_frame(&wire, now);
        }
        let status = session.status();
        assert!(status.decode_complete);
        assert_eq!(session.recovered_payload(), Some(&payload[..]));
        assert_eq!(session.sync_state(), SyncState::Locked);
    }

    #[test]
    fn sync_with_matching_metadata_never_resets_decoder() {
        let payload = vec![3_u8; 16 * 4];
        let package = prepare_broadcast(&payload, &options(31)).unwrap();
        let mut session = ReceiverSession::new(SyncConfig::default());
        let now = Instant::now();

        for wire in package.wire_frames() {
            session.ingest_frame(&wire, now);
        }
        assert!(session.status().decode_complete);

        // A late sync re-insert with identical metadata must not reset.
        let sync_wire = package
            .frames
            .iter()
            .find(|f| matches!(f, Frame::Sync(_)))
            .map(frame::encode)
            .unwrap();
        let status = session.ingest_frame(&sync_wire, now);
        assert!(status.decode_complete);
    }

    #[test]
    fn hex_entry_point_matches_byte_entry_point() {
        let payload = vec![5_u8; 48];
        let package = prepare_broadcast(&payload, &options(6)).unwrap();
        let mut session =
            ReceiverSession::with_metadata(SyncConfig::default(), package.metadata.clone())
                .unwrap();
        let symbol = package
            .frames
            .iter()
            .find_map(|f| match f {
                Frame::Symbol(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();

        let status = session
            .add_symbol_hex(symbol.sequence, &symbol.indices, &hex::encode(&symbol.payload))
            .unwrap();
        assert!(status.newly_added);

        let bad = session.add_symbol_hex(99, &[0], "not hex").unwrap();
        assert!(!bad.newly_added);
        assert_eq!(bad.metrics.rejected.get("malformed"), Some(&1));
    }

    #[test]
    fn status_serialises_to_json() {
        let payload = vec![2_u8; 32];
        let package = prepare_broadcast(&payload, &options(12)).unwrap();
        let session =
            ReceiverSession::with_metadata(SyncConfig::default(), package.metadata).unwrap();
        let json = serde_json::to_value(session.status()).unwrap();
        assert_eq!(json["newly_added"], false);
        assert_eq!(json["decode_complete"], false);
        assert_eq!(json["coverage"], 0.0);
        assert!(json["metrics"]["rejected"].is_object());
    }

    #[test]
    fn malformed_frames_are_counted_and_ignored() {
        let mut session = ReceiverSession::new(SyncConfig::default());
        let now = Instant::now();
        session.ingest_frame("garbage", now);
        session.ingest_frame("S:1|0|zz", now);
        let status = session.ingest_frame("M:{", now);
        assert_eq!(status.metrics.rejected.get("malformed"), Some(&3));
    }
}
