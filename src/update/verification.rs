//! Integrity checks for downloaded package archives.

use crate::core::{UpdateError, UpdateState};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// SHA-256 digests of archive bytes.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Lowercase hex SHA-256 of `bytes`.
    #[must_use]
    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Compare `bytes` against an expected digest.
    ///
    /// The expected value may carry a `sha256:` prefix and may be upper case.
    ///
    /// # Errors
    ///
    /// A mismatch is a validation error in the fetch step.
    pub fn verify(bytes: &[u8], expected: &str) -> Result<String, UpdateError> {
        let actual = Self::sha256_hex(bytes);
        let expected = normalize(expected);
        debug!(%expected, %actual, "Verifying archive checksum");

        if actual != expected {
            return Err(UpdateError::validation(
                UpdateState::Fetching,
                format!("checksum mismatch: expected {expected}, got {actual}"),
            ));
        }

        info!("Checksum verification successful");
        Ok(actual)
    }
}

fn normalize(digest: &str) -> String {
    let trimmed = digest.trim();
    trimmed.strip_prefix("sha256:").unwrap_or(trimmed).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            ChecksumVerifier::sha256_hex(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_verify_accepts_prefix_and_case() {
        let upper = "sha256:532EAABD9574880DBF76B9B8CC00832C20A6EC113D682299550D7A6E0F345E25";
        let digest = ChecksumVerifier::verify(b"Test", upper).unwrap();
        assert_eq!(digest, "532eaabd9574880dbf76b9b8cc00832c20a6ec113d682299550d7a6e0f345e25");
    }

    #[test]
    fn test_verify_mismatch_is_validation_error() {
        let err = ChecksumVerifier::verify(b"Test", &"0".repeat(64)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.step(), UpdateState::Fetching);
        assert!(err.to_string().contains("checksum mismatch"));
    }
}
