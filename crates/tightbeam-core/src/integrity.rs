//! Payload integrity digests.
//!
//! A session's `integrity_check` field is the hex digest of the original
//! payload: SHA-256 by default, CRC-32 for bandwidth-constrained variants.
//! The algorithm is recoverable from the digest length alone (64 vs 8 hex
//! characters), so a receiver can verify a recovered payload without any
//! out-of-band negotiation.

use sha2::{Digest, Sha256};
use tightbeam_error::{Result, TightbeamError};

/// Hex length of a SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// Hex length of a CRC-32 digest.
const CRC32_HEX_LEN: usize = 8;

/// Integrity digest algorithm for a broadcast session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityAlgorithm {
    /// SHA-256, 64 hex characters. The default.
    #[default]
    Sha256,
    /// CRC-32 (IEEE), 8 hex characters. Low-overhead variant.
    Crc32,
}

impl IntegrityAlgorithm {
    /// Compute the lower-case hex digest of `payload` under this algorithm.
    #[must_use]
    pub fn digest(self, payload: &[u8]) -> String {
        match self {
            Self::Sha256 => hex::encode(Sha256::digest(payload)),
            Self::Crc32 => format!("{:08x}", crc32fast::hash(payload)),
        }
    }

    /// Infer the algorithm from a digest's hex length.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMetadata` if the string is not a hex digest of a
    /// recognised length.
    pub fn infer(digest: &str) -> Result<Self> {
        if !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TightbeamError::invalid_metadata(format!(
                "integrity_check is not hex: {digest:?}"
            )));
        }
        match digest.len() {
            SHA256_HEX_LEN => Ok(Self::Sha256),
            CRC32_HEX_LEN => Ok(Self::Crc32),
            other => Err(TightbeamError::invalid_metadata(format!(
                "integrity_check has unrecognised digest length {other}"
            ))),
        }
    }
}

/// Verify `payload` against a session integrity digest.
///
/// # Errors
///
/// Returns `InvalidMetadata` for an unusable digest, `IntegrityFailure` when
/// the recomputed digest does not match.
pub fn verify(digest: &str, payload: &[u8]) -> Result<()> {
    let algorithm = IntegrityAlgorithm::infer(digest)?;
    let actual = algorithm.digest(payload);
    if actual.eq_ignore_ascii_case(digest) {
        Ok(())
    } else {
        Err(TightbeamError::IntegrityFailure {
            expected: digest.to_ascii_lowercase(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_digest_of_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            IntegrityAlgorithm::Sha256.digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn crc32_digest_of_known_vector() {
        // CRC-32("123456789") = 0xcbf43926
        assert_eq!(IntegrityAlgorithm::Crc32.digest(b"123456789"), "cbf43926");
    }

    #[test]
    fn infer_by_length() {
        let sha = IntegrityAlgorithm::Sha256.digest(b"x");
        let crc = IntegrityAlgorithm::Crc32.digest(b"x");
        assert_eq!(IntegrityAlgorithm::infer(&sha).unwrap(), IntegrityAlgorithm::Sha256);
        assert_eq!(IntegrityAlgorithm::infer(&crc).unwrap(), IntegrityAlgorithm::Crc32);
    }

    #[test]
    fn infer_rejects_non_hex_and_odd_lengths() {
        assert!(IntegrityAlgorithm::infer("zzzzzzzz").is_err());
        assert!(IntegrityAlgorithm::infer("abcd").is_err());
        assert!(IntegrityAlgorithm::infer("").is_err());
    }

    #[test]
    fn verify_round_trip() {
        let payload = b"the payload";
        let digest = IntegrityAlgorithm::Sha256.digest(payload);
        assert!(verify(&digest, payload).is_ok());
    }

    #[test]
    fn verify_accepts_uppercase_digest() {
        let payload = b"case test";
        let digest = IntegrityAlgorithm::Crc32.digest(payload).to_uppercase();
        assert!(verify(&digest, payload).is_ok());
    }

    #[test]
    fn verify_mismatch_is_integrity_failure() {
        let digest = IntegrityAlgorithm::Sha256.digest(b"original");
        let result = verify(&digest, b"tampered");
        assert!(matches!(
            result,
            Err(TightbeamError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn verify_empty_payload() {
        let digest = IntegrityAlgorithm::Sha256.digest(b"");
        assert!(verify(&digest, b"").is_ok());
    }
}
