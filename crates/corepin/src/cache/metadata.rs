//! Install metadata
//!
//! Every install directory carries a `.corepin` JSON file recording where the
//! artifact came from, its digest and the binaries it exposes.

use crate::config::BinSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Metadata file name inside an install directory
pub const METADATA_FILE: &str = ".corepin";

/// Errors that can occur during metadata operations
#[derive(Debug, Error)]
pub enum MetadataError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Metadata for one installed package manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstallMetadata {
    /// Package manager name
    pub name: String,

    /// Reference the install was made for
    pub reference: String,

    /// Download URL
    pub url: String,

    /// `sha512.<hex>` digest of the downloaded artifact
    pub hash: String,

    pub bin: BinSpec,

    /// Unix timestamp of the install
    pub installed_at: u64,
}

impl InstallMetadata {
    pub fn new(name: String, reference: String, url: String, hash: String, bin: BinSpec) -> Self {
        Self {
            name,
            reference,
            url,
            hash,
            bin,
            installed_at: Self::current_timestamp(),
        }
    }

    /// Load metadata from an install directory
    pub fn load(dir: &Path) -> Result<Self, MetadataError> {
        let contents = fs::read_to_string(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save metadata into an install directory
    pub fn save(&self, dir: &Path) -> Result<(), MetadataError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    fn current_timestamp() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let metadata = InstallMetadata::new(
            "pnpm".to_string(),
            "9.1.0".to_string(),
            "https://registry.npmjs.org/pnpm/-/pnpm-9.1.0.tgz".to_string(),
            "sha512.abc".to_string(),
            BinSpec::Map(BTreeMap::from([(
                "pnpm".to_string(),
                "./bin/pnpm.cjs".to_string(),
            )])),
        );

        metadata.save(temp.path()).unwrap();
        assert!(temp.path().join(METADATA_FILE).is_file());
        assert_eq!(InstallMetadata::load(temp.path()).unwrap(), metadata);
        assert!(metadata.installed_at > 0);
    }

    #[test]
    fn test_load_missing() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            InstallMetadata::load(temp.path()),
            Err(MetadataError::IoError(_))
        ));
    }
}
