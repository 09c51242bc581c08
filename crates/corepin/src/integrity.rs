//! Artifact integrity checks
//!
//! References may embed a digest as `+<algorithm>.<hex>`; the downloaded
//! artifact must hash to it before it is installed.

use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during integrity checks
#[derive(Debug, Error, PartialEq)]
pub enum IntegrityError {
    /// Artifact does not hash to the pinned digest
    #[error("Mismatch hashes. Expected {expected}, got {actual} ({algorithm})")]
    IntegrityMismatch {
        algorithm: Algorithm,
        expected: String,
        actual: String,
    },

    /// Strict mode and no digest pinned
    #[error("Missing integrity hash for {0}; set it in packageManager or disable COREPIN_INTEGRITY_STRICT")]
    MissingIntegrity(String),

    /// Digest suffix is malformed or names an unknown algorithm
    #[error("Invalid integrity suffix '{0}'")]
    InvalidIntegrity(String),
}

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha224 => "sha224",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Hex length of a digest
    fn hex_len(self) -> usize {
        match self {
            Algorithm::Sha1 => 40,
            Algorithm::Sha224 => 56,
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    /// Hex-encoded digest of `bytes`
    pub fn digest_hex(self, bytes: &[u8]) -> String {
        match self {
            Algorithm::Sha1 => hex::encode(Sha1::digest(bytes)),
            Algorithm::Sha224 => hex::encode(Sha224::digest(bytes)),
            Algorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            Algorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
            Algorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(Algorithm::Sha1),
            "sha224" => Ok(Algorithm::Sha224),
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(IntegrityError::InvalidIntegrity(other.to_string())),
        }
    }
}

/// A pinned digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integrity {
    pub algorithm: Algorithm,
    pub digest: String,
}

impl Integrity {
    /// Parse an `<algorithm>.<hex>` suffix
    pub fn parse(suffix: &str) -> Result<Self, IntegrityError> {
        let invalid = || IntegrityError::InvalidIntegrity(suffix.to_string());

        let (algorithm, digest) = suffix.split_once('.').ok_or_else(invalid)?;
        let algorithm: Algorithm = algorithm.parse().map_err(|_| invalid())?;
        let digest = digest.to_ascii_lowercase();

        if digest.len() != algorithm.hex_len() || hex::decode(&digest).is_err() {
            return Err(invalid());
        }

        Ok(Integrity { algorithm, digest })
    }

    /// Parse a subresource-integrity string (`sha512-<base64>`)
    ///
    /// This is the form npm registries publish in `dist.integrity`.
    pub fn from_sri(sri: &str) -> Result<Self, IntegrityError> {
        let invalid = || IntegrityError::InvalidIntegrity(sri.to_string());

        let (algorithm, digest) = sri.split_once('-').ok_or_else(invalid)?;
        let algorithm: Algorithm = algorithm.parse().map_err(|_| invalid())?;
        let digest = base64::engine::general_purpose::STANDARD
            .decode(digest)
            .map_err(|_| invalid())?;

        if digest.len() * 2 != algorithm.hex_len() {
            return Err(invalid());
        }

        Ok(Integrity {
            algorithm,
            digest: hex::encode(digest),
        })
    }

    /// Check `bytes` against the pinned digest
    pub fn verify(&self, bytes: &[u8]) -> Result<(), IntegrityError> {
        let actual = self.algorithm.digest_hex(bytes);
        if actual != self.digest {
            return Err(IntegrityError::IntegrityMismatch {
                algorithm: self.algorithm,
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.algorithm, self.digest)
    }
}

/// Verify an artifact against an optional reference suffix
///
/// Returns the `sha512.<hex>` digest recorded for every install.
pub fn check(
    reference: &str,
    suffix: Option<&str>,
    strict: bool,
    bytes: &[u8],
) -> Result<Integrity, IntegrityError> {
    match suffix {
        Some(suffix) => Integrity::parse(suffix)?.verify(bytes)?,
        None if strict => return Err(IntegrityError::MissingIntegrity(reference.to_string())),
        None => {}
    }

    Ok(Integrity {
        algorithm: Algorithm::Sha512,
        digest: Algorithm::Sha512.digest_hex(bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    #[test]
    fn test_parse() {
        let integrity = Integrity::parse(&format!("sha1.{}", HELLO_SHA1.to_uppercase())).unwrap();
        assert_eq!(integrity.algorithm, Algorithm::Sha1);
        assert_eq!(integrity.digest, HELLO_SHA1);
        assert_eq!(integrity.to_string(), format!("sha1.{}", HELLO_SHA1));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(Integrity::parse("sha1"), Err(IntegrityError::InvalidIntegrity(_))));
        assert!(matches!(Integrity::parse("md5.abcd"), Err(IntegrityError::InvalidIntegrity(_))));
        assert!(matches!(Integrity::parse("sha1.abcd"), Err(IntegrityError::InvalidIntegrity(_))));
        assert!(matches!(
            Integrity::parse(&format!("sha1.{}", "zz".repeat(20))),
            Err(IntegrityError::InvalidIntegrity(_))
        ));
    }

    #[test]
    fn test_from_sri() {
        let integrity = Integrity::from_sri("sha1-qvTGHdzF6KLavt4PO0gs2a6pQ00=").unwrap();
        assert_eq!(integrity.algorithm, Algorithm::Sha1);
        assert_eq!(integrity.digest, HELLO_SHA1);

        assert!(Integrity::from_sri("sha512-qvTGHdzF6KLavt4PO0gs2a6pQ00=").is_err());
        assert!(Integrity::from_sri("sha1.qvTGHdzF6KLavt4PO0gs2a6pQ00=").is_err());
        assert!(Integrity::from_sri("sha1-%%%").is_err());
    }

    #[test]
    fn test_verify() {
        let integrity = Integrity::parse(&format!("sha1.{}", HELLO_SHA1)).unwrap();
        assert!(integrity.verify(b"hello").is_ok());

        let err = integrity.verify(b"hello!").unwrap_err();
        assert!(err.to_string().starts_with("Mismatch hashes"));
    }

    #[test]
    fn test_check_strict_requires_digest() {
        assert_eq!(
            check("1.0.0", None, true, b"hello"),
            Err(IntegrityError::MissingIntegrity("1.0.0".to_string()))
        );

        let recorded = check("1.0.0", None, false, b"hello").unwrap();
        assert_eq!(recorded.algorithm, Algorithm::Sha512);
        assert_eq!(recorded.digest.len(), 128);
    }

    #[test]
    fn test_sha256_digest() {
        assert_eq!(
            Algorithm::Sha256.digest_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
