use thiserror::Error;

/// Primary error type for Tightbeam operations.
///
/// Structured variants for the conditions the protocol core can surface;
/// convenience constructors for the common cases. Parse-level failures are
/// deliberately coarse (`MalformedFrame` with a detail string) because the
/// capture pipeline treats every rejected frame the same way: count it and
/// keep watching the stream.
#[derive(Error, Debug)]
pub enum TightbeamError {
    // === Metadata ===
    /// Broadcast metadata is internally inconsistent or unusable.
    #[error("invalid metadata: {detail}")]
    InvalidMetadata { detail: String },

    // === Frame ingestion ===
    /// A frame string could not be parsed into any frame kind.
    #[error("malformed frame: {detail}")]
    MalformedFrame { detail: String },

    /// A symbol referenced a source block outside `[0, k)`.
    #[error("symbol index {index} out of range (k = {k})")]
    IndexOutOfRange { index: u32, k: u32 },

    /// A symbol arrived before sync lock with no metadata installed.
    #[error("symbol received before sync lock; no metadata installed")]
    NotLocked,

    // === Decode ===
    /// The recovered payload does not match the session integrity digest.
    #[error("integrity check failed: expected {expected}, computed {actual}")]
    IntegrityFailure { expected: String, actual: String },

    /// A value fell outside its permitted range.
    #[error("{what} out of range: {value}")]
    OutOfRange { what: String, value: String },

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl TightbeamError {
    /// Create an invalid-metadata error.
    pub fn invalid_metadata(detail: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            detail: detail.into(),
        }
    }

    /// Create a malformed-frame error.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedFrame {
            detail: detail.into(),
        }
    }

    /// Create an out-of-range error.
    pub fn out_of_range(what: impl Into<String>, value: impl ToString) -> Self {
        Self::OutOfRange {
            what: what.into(),
            value: value.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is local to a single frame.
    ///
    /// Frame-local errors increment a rejection counter and leave the session
    /// running; everything else is surfaced to the caller.
    pub const fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame { .. } | Self::IndexOutOfRange { .. } | Self::NotLocked
        )
    }
}

/// Result type alias using `TightbeamError`.
pub type Result<T> = std::result::Result<T, TightbeamError>;
