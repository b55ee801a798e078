//! Rateless erasure-coding core for the Tightbeam optical link.
//!
//! A sender partitions a payload into fixed-size source blocks, fountain-codes
//! them into an LT-style symbol stream (systematic first, then redundant
//! XOR combinations), and interleaves sync frames so a camera that joins
//! mid-stream can acquire lock without a handshake. The receiver parses frame
//! strings back out of QR decodes, tracks sync state, and feeds symbols into a
//! peeling decoder with a Gaussian-elimination fallback until the payload is
//! recovered and its integrity digest verifies.
//!
//! The crate is a synchronous state machine: no I/O, no clocks (timestamps
//! are passed in), no internal concurrency. The capture pipeline, QR codecs,
//! and UI live elsewhere and speak to this crate through
//! [`session::ReceiverSession`] and [`session::prepare_broadcast`].

pub mod block;
pub mod channel;
pub mod decoder;
pub mod degree;
pub mod encoder;
pub mod frame;
pub mod integrity;
pub mod metrics;
pub mod session;
pub mod sync;

pub use decoder::{FountainDecoder, SymbolOutcome};
pub use encoder::{EncodedSymbol, FountainEncoder};
pub use frame::{BroadcastMetadata, Frame, SymbolFrame, SyncFrame};
pub use integrity::IntegrityAlgorithm;
pub use metrics::{LinkMetrics, MetricsSummary, RejectionKind};
pub use session::{
    prepare_broadcast, BroadcastOptions, BroadcastPackage, ReceiverSession, Status,
};
pub use sync::{SyncConfig, SyncState, SyncTracker};
