//! Sync acquisition protocol.
//!
//! The link is one-way, so a receiver has to acquire session lock purely from
//! what it sees. The sender front-loads a preamble of sync frames, follows
//! with a single metadata frame, and re-inserts a sync every few symbols so a
//! camera joining mid-stream still finds one quickly. The receiver confirms
//! metadata after `confirmation_required` distinct sync sequences, and a
//! watchdog drops it back to acquisition if the stream goes quiet.
//!
//! State machine: IDLE → ACQUIRING → LOCKED, with LOCKED → ACQUIRING on
//! watchdog expiry. Resync never discards decoder state; only an explicit
//! session reset does.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::encoder::EncodedSymbol;
use crate::frame::{BroadcastMetadata, Frame, SymbolFrame, SyncFrame};

/// Default sync preamble length.
pub const DEFAULT_PREAMBLE_COUNT: u32 = 4;

/// Default symbol count between sync re-inserts.
pub const DEFAULT_SYNC_INTERVAL: u32 = 16;

/// Default distinct sync sequences required before lock.
///
/// Two, not the preamble length: a receiver fighting glare often catches only
/// fragments of the preamble, and two distinct syncs already pin the metadata.
pub const DEFAULT_CONFIRMATION_REQUIRED: u32 = 2;

/// Default watchdog inactivity interval before a resync.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(4500);

/// Sync interleaving parameters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Sync frames at the head of the playback list.
    pub preamble_count: u32,
    /// Symbols between re-inserted sync frames.
    pub interval: u32,
    /// Distinct sync sequences a receiver must see before locking.
    pub confirmation_required: u32,
    /// Inactivity interval after which a locked receiver re-acquires.
    pub watchdog_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            preamble_count: DEFAULT_PREAMBLE_COUNT,
            interval: DEFAULT_SYNC_INTERVAL,
            confirmation_required: DEFAULT_CONFIRMATION_REQUIRED,
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
        }
    }
}

/// Build the full sender playback list: preamble, metadata, interleaved stream.
///
/// Every frame gets a fresh monotone `sequence`. All sync frames embed the
/// same metadata; re-inserted syncs reuse the preamble ordinal cycle.
#[must_use]
pub fn interleave_playback(
    metadata: &BroadcastMetadata,
    symbols: &[EncodedSymbol],
    config: &SyncConfig,
) -> Vec<Frame> {
    let mut frames = Vec::with_capacity(
        symbols.len() + config.preamble_count as usize + symbols.len() / config.interval.max(1) as usize + 1,
    );
    let mut sequence: u64 = 0;
    let mut sync_count: u32 = 0;

    let push_sync = |frames: &mut Vec<Frame>, sequence: &mut u64, sync_count: &mut u32| {
        let ordinal = (*sync_count % config.preamble_count.max(1)) + 1;
        frames.push(Frame::Sync(SyncFrame {
            sequence: *sequence,
            ordinal,
            total: config.preamble_count,
            metadata: metadata.clone(),
            confirmation_required: config.confirmation_required,
        }));
        *sequence += 1;
        *sync_count += 1;
    };

    for _ in 0..config.preamble_count {
        push_sync(&mut frames, &mut sequence, &mut sync_count);
    }

    frames.push(Frame::Meta(metadata.clone()));
    sequence += 1;

    let mut since_last_sync = 0_u32;
    for symbol in symbols {
        frames.push(Frame::Symbol(SymbolFrame {
            sequence,
            indices: symbol.indices.clone(),
            payload: symbol.payload.clone(),
        }));
        sequence += 1;
        since_last_sync += 1;
        if config.interval > 0 && since_last_sync >= config.interval {
            push_sync(&mut frames, &mut sequence, &mut sync_count);
            since_last_sync = 0;
        }
    }

    debug!(
        total_frames = frames.len(),
        symbols = symbols.len(),
        syncs = sync_count,
        "interleaved playback list"
    );
    frames
}

/// Receiver sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync frame observed yet.
    Idle,
    /// At least one sync seen; metadata pending confirmation.
    Acquiring,
    /// Metadata confirmed; symbol ingestion active.
    Locked,
}

/// Outcome of feeding one sync frame into the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Observation recorded; still short of confirmation.
    Acquiring,
    /// Confirmation threshold reached; metadata is now authoritative.
    Locked(BroadcastMetadata),
    /// Already locked; observation refreshed the watchdog only.
    AlreadyLocked,
}

/// Receiver-side sync acquisition tracker.
///
/// Owns no decoder state; the session layer decides what a lock transition
/// means for the decoder. Time never comes from a clock here — callers pass
/// `Instant`s in, which keeps the protocol replayable in tests.
#[derive(Debug)]
pub struct SyncTracker {
    state: SyncState,
    observed_syncs: HashSet<u64>,
    pending_metadata: Option<BroadcastMetadata>,
    confirmation_required: u32,
    watchdog_timeout: Duration,
    last_activity: Option<Instant>,
    resyncs: u64,
}

impl SyncTracker {
    /// Create an idle tracker with the given watchdog interval.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            state: SyncState::Idle,
            observed_syncs: HashSet::new(),
            pending_metadata: None,
            confirmation_required: config.confirmation_required.max(1),
            watchdog_timeout: config.watchdog_timeout,
            last_activity: None,
            resyncs: 0,
        }
    }

    /// Current acquisition state.
    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    /// Metadata carried by observed syncs, confirmed or not.
    #[must_use]
    pub fn pending_metadata(&self) -> Option<&BroadcastMetadata> {
        self.pending_metadata.as_ref()
    }

    /// Distinct sync sequences observed since the last (re)acquisition.
    #[must_use]
    pub fn observed_count(&self) -> usize {
        self.observed_syncs.len()
    }

    /// Watchdog-driven resyncs so far.
    #[must_use]
    pub const fn resync_count(&self) -> u64 {
        self.resyncs
    }

    /// Feed one sync frame observation.
    pub fn observe_sync(&mut self, sync: &SyncFrame, now: Instant) -> SyncEvent {
        self.check_watchdog(now);

        if self.state == SyncState::Idle {
            info!(sequence = sync.sequence, "first sync observed, acquiring");
            self.state = SyncState::Acquiring;
        }

        self.observed_syncs.insert(sync.sequence);
        self.confirmation_required = sync.confirmation_required.max(1);
        self.pending_metadata = Some(sync.metadata.clone());
        self.last_activity = Some(now);

        match self.state {
            SyncState::Locked => SyncEvent::AlreadyLocked,
            _ if self.observed_syncs.len() >= self.confirmation_required as usize => {
                self.state = SyncState::Locked;
                info!(
                    observed = self.observed_syncs.len(),
                    required = self.confirmation_required,
                    "sync lock engaged"
                );
                SyncEvent::Locked(sync.metadata.clone())
            }
            _ => SyncEvent::Acquiring,
        }
    }

    /// Record an accepted symbol, feeding the watchdog.
    pub fn note_activity(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Drop back to ACQUIRING if the stream has been quiet too long.
    ///
    /// Returns `true` when a resync transition happened. The observed-sync
    /// set is cleared; nothing else is.
    pub fn check_watchdog(&mut self, now: Instant) -> bool {
        if self.state != SyncState::Locked {
            return false;
        }
        let Some(last) = self.last_activity else {
            return false;
        };
        if now.saturating_duration_since(last) < self.watchdog_timeout {
            return false;
        }
        warn!(
            idle_ms = now.saturating_duration_since(last).as_millis() as u64,
            "watchdog expired, re-acquiring sync"
        );
        self.state = SyncState::Acquiring;
        self.observed_syncs.clear();
        self.last_activity = Some(now);
        self.resyncs += 1;
        true
    }

    /// Forget everything; used by session reset.
    pub fn reset(&mut self) {
        self.state = SyncState::Idle;
        self.observed_syncs.clear();
        self.pending_metadata = None;
        self.last_activity = None;
    }
}
