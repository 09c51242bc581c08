//! npm registry signature checks
//!
//! npm signs `<package>@<version>:<dist.integrity>` with ECDSA P-256 over
//! SHA-256. An artifact without a pinned digest is only trusted when one of
//! its registry signatures verifies against a known key and its bytes hash to
//! the signed integrity.

use crate::integrity::{Integrity, IntegrityError};
use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while checking registry signatures
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The key set could not be read
    #[error("Invalid signing keys: {0}")]
    InvalidKeys(String),

    /// None of the published signatures was made by a known key
    #[error("Cannot find a signing key for {package} (signed by: {keyids})")]
    NoMatchingKey { package: String, keyids: String },

    /// The signature does not verify
    #[error("Signature does not match for {0}")]
    SignatureMismatch(String),

    /// The registry published no usable integrity for the version
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// One public key; `key` is a base64 DER SubjectPublicKeyInfo
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PublicKey {
    pub keyid: String,
    pub key: String,
}

/// Keys trusted for npm registry artifacts
///
/// Accepts both `{"npm": [...]}` and the registry's own `{"keys": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KeySet {
    #[serde(alias = "keys", default)]
    pub npm: Vec<PublicKey>,
}

impl KeySet {
    pub fn parse(json: &str) -> Result<Self, SignatureError> {
        serde_json::from_str(json).map_err(|e| SignatureError::InvalidKeys(e.to_string()))
    }
}

/// A registry signature
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistrySignature {
    pub keyid: String,
    pub sig: String,
}

/// The `dist` block of a published version
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub integrity: Option<String>,

    #[serde(default)]
    pub signatures: Vec<RegistrySignature>,
}

/// Check the registry signature of `package@version`
///
/// Returns the signed integrity, which the downloaded bytes must match.
pub fn verify(
    keys: &KeySet,
    package: &str,
    version: &str,
    dist: &Dist,
) -> Result<Integrity, SignatureError> {
    let spec = format!("{}@{}", package, version);
    let sri = dist
        .integrity
        .as_deref()
        .ok_or_else(|| IntegrityError::MissingIntegrity(spec.clone()))?;

    let (key, signature) = keys
        .npm
        .iter()
        .find_map(|key| {
            dist.signatures
                .iter()
                .find(|sig| sig.keyid == key.keyid)
                .map(|sig| (key, sig))
        })
        .ok_or_else(|| SignatureError::NoMatchingKey {
            package: spec.clone(),
            keyids: dist
                .signatures
                .iter()
                .map(|sig| sig.keyid.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })?;

    let engine = base64::engine::general_purpose::STANDARD;
    let der = engine
        .decode(&key.key)
        .map_err(|e| SignatureError::InvalidKeys(format!("{}: {}", key.keyid, e)))?;
    let verifying_key = VerifyingKey::from_public_key_der(&der)
        .map_err(|e| SignatureError::InvalidKeys(format!("{}: {}", key.keyid, e)))?;

    let mismatch = || SignatureError::SignatureMismatch(spec.clone());
    let sig = engine.decode(&signature.sig).map_err(|_| mismatch())?;
    let sig = Signature::from_der(&sig).map_err(|_| mismatch())?;

    let message = format!("{}:{}", spec, sri);
    verifying_key
        .verify(message.as_bytes(), &sig)
        .map_err(|_| mismatch())?;

    Ok(Integrity::from_sri(sri)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;
    use p256::pkcs8::EncodePublicKey;

    const INTEGRITY: &str = "sha1-qvTGHdzF6KLavt4PO0gs2a6pQ00=";

    fn signer() -> SigningKey {
        SigningKey::from_slice(&[7u8; 32]).unwrap()
    }

    fn keys(keyid: &str) -> KeySet {
        let der = signer().verifying_key().to_public_key_der().unwrap();
        KeySet {
            npm: vec![PublicKey {
                keyid: keyid.to_string(),
                key: base64::engine::general_purpose::STANDARD.encode(der.as_bytes()),
            }],
        }
    }

    fn dist(message: &str, keyid: &str) -> Dist {
        let sig: Signature = signer().sign(message.as_bytes());
        Dist {
            integrity: Some(INTEGRITY.to_string()),
            signatures: vec![RegistrySignature {
                keyid: keyid.to_string(),
                sig: base64::engine::general_purpose::STANDARD.encode(sig.to_der().as_bytes()),
            }],
        }
    }

    #[test]
    fn test_valid_signature() {
        let dist = dist(&format!("pnpm@9.1.0:{}", INTEGRITY), "SHA256:test");
        let integrity = verify(&keys("SHA256:test"), "pnpm", "9.1.0", &dist).unwrap();
        assert!(integrity.verify(b"hello").is_ok());
    }

    #[test]
    fn test_signature_over_other_version_fails() {
        let dist = dist(&format!("pnpm@9.0.0:{}", INTEGRITY), "SHA256:test");
        assert!(matches!(
            verify(&keys("SHA256:test"), "pnpm", "9.1.0", &dist),
            Err(SignatureError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_unknown_key() {
        let dist = dist(&format!("pnpm@9.1.0:{}", INTEGRITY), "SHA256:other");
        let err = verify(&keys("SHA256:test"), "pnpm", "9.1.0", &dist).unwrap_err();
        assert!(matches!(err, SignatureError::NoMatchingKey { .. }));
        assert!(err.to_string().contains("SHA256:other"));
    }

    #[test]
    fn test_key_set_formats() {
        let npm = KeySet::parse(r#"{"npm": [{"keyid": "a", "key": "b"}]}"#).unwrap();
        let registry = KeySet::parse(
            r#"{"keys": [{"expires": null, "keyid": "a", "keytype": "ecdsa-sha2-nistp256", "key": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(npm, registry);
        assert!(KeySet::parse("[").is_err());
    }
}
