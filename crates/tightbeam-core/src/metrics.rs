//! Per-session link metrics.
//!
//! A session owns one `LinkMetrics` recorder; nothing here is shared or
//! atomic. The recorder tracks the symbol degree histogram, decode attempts
//! with durations and outcomes, and a per-kind rejection counter. `summary()`
//! flattens everything into a serialisable snapshot that rides along on every
//! receiver `Status`.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Why a frame or symbol was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RejectionKind {
    /// Frame string failed to parse or violated the wire grammar.
    Malformed,
    /// Symbol referenced a block index `>= k`.
    IndexOutOfRange,
    /// Symbol arrived with no metadata installed.
    NotLocked,
    /// Symbol reduced to nothing new (zero payload after normalisation).
    Redundant,
    /// Normalised index set already present in the buffer.
    Duplicate,
    /// Symbol reduced to empty indices with a non-zero payload.
    Corrupt,
    /// Recovered payload failed the integrity digest.
    IntegrityFailure,
}

impl RejectionKind {
    /// Stable string key used in summaries and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::IndexOutOfRange => "index_out_of_range",
            Self::NotLocked => "not_locked",
            Self::Redundant => "redundant",
            Self::Duplicate => "duplicate",
            Self::Corrupt => "corrupt",
            Self::IntegrityFailure => "integrity_failure",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics recorder for one encode/decode session.
#[derive(Debug, Clone, Default)]
pub struct LinkMetrics {
    degree_hist: BTreeMap<u32, u64>,
    decode_attempts: u64,
    decode_successes: u64,
    decode_failures: u64,
    decode_durations: Vec<Duration>,
    symbols_used: Vec<u32>,
    symbols_available: Vec<u32>,
    rejections: BTreeMap<RejectionKind, u64>,
}

impl LinkMetrics {
    /// Fresh, empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the degree of an emitted or accepted symbol.
    pub fn record_degree(&mut self, degree: u32) {
        if degree == 0 {
            return;
        }
        *self.degree_hist.entry(degree).or_insert(0) += 1;
    }

    /// Record one decode attempt with its duration and outcome.
    pub fn record_decode(
        &mut self,
        duration: Duration,
        success: bool,
        symbols_used: u32,
        symbols_available: u32,
    ) {
        self.decode_attempts += 1;
        self.decode_durations.push(duration);
        self.symbols_used.push(symbols_used);
        self.symbols_available.push(symbols_available);
        if success {
            self.decode_successes += 1;
        } else {
            self.decode_failures += 1;
        }
    }

    /// Record a rejected frame or symbol.
    pub fn record_rejection(&mut self, kind: RejectionKind) {
        *self.rejections.entry(kind).or_insert(0) += 1;
    }

    /// Rejection count for one kind.
    #[must_use]
    pub fn rejection_count(&self, kind: RejectionKind) -> u64 {
        self.rejections.get(&kind).copied().unwrap_or(0)
    }

    /// Total decode attempts so far.
    #[must_use]
    pub const fn decode_attempts(&self) -> u64 {
        self.decode_attempts
    }

    /// Fold another recorder into this one.
    pub fn merge(&mut self, other: &LinkMetrics) {
        for (&degree, &count) in &other.degree_hist {
            *self.degree_hist.entry(degree).or_insert(0) += count;
        }
        self.decode_attempts += other.decode_attempts;
        self.decode_successes += other.decode_successes;
        self.decode_failures += other.decode_failures;
        self.decode_durations.extend(&other.decode_durations);
        self.symbols_used.extend(&other.symbols_used);
        self.symbols_available.extend(&other.symbols_available);
        for (&kind, &count) in &other.rejections {
            *self.rejections.entry(kind).or_insert(0) += count;
        }
    }

    /// Flatten into a serialisable snapshot.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let total_symbols: u64 = self.degree_hist.values().sum();
        let average_degree = if total_symbols == 0 {
            0.0
        } else {
            let weighted: u64 = self
                .degree_hist
                .iter()
                .map(|(&d, &n)| u64::from(d) * n)
                .sum();
            weighted as f64 / total_symbols as f64
        };
        let average_decode_duration_us = if self.decode_durations.is_empty() {
            0.0
        } else {
            let total: u128 = self.decode_durations.iter().map(Duration::as_micros).sum();
            total as f64 / self.decode_durations.len() as f64
        };
        let decode_success_rate = if self.decode_attempts == 0 {
            0.0
        } else {
            self.decode_successes as f64 / self.decode_attempts as f64
        };
        let average_symbols_used = if self.symbols_used.is_empty() {
            0.0
        } else {
            let total: u64 = self.symbols_used.iter().map(|&n| u64::from(n)).sum();
            total as f64 / self.symbols_used.len() as f64
        };

        MetricsSummary {
            total_symbols,
            degree_hist: self.degree_hist.clone(),
            average_degree,
            decode_attempts: self.decode_attempts,
            decode_success_rate,
            average_decode_duration_us,
            average_symbols_used,
            rejected: self
                .rejections
                .iter()
                .map(|(&kind, &count)| (kind.as_str().to_owned(), count))
                .collect(),
        }
    }
}

/// Point-in-time metrics snapshot, embedded in every receiver `Status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_symbols: u64,
    pub degree_hist: BTreeMap<u32, u64>,
    pub average_degree: f64,
    pub decode_attempts: u64,
    pub decode_success_rate: f64,
    pub average_decode_duration_us: f64,
    pub average_symbols_used: f64,
    pub rejected: BTreeMap<String, u64>,
}
