//! Last-known-good version record
//!
//! `<root>/lastKnownGood.json` maps each package manager to the reference used
//! when a project does not pin one. The file is opened once per operation and
//! rewritten through the same handle.

use crate::config::Config;
use crate::descriptor::PackageManagerId;
use crate::registry::RegistryClient;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Record file name under the install root
pub const LAST_KNOWN_GOOD_FILE: &str = "lastKnownGood.json";

/// Errors that can occur while reading or writing the record
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error
    #[error("IO error on {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// No definition for the package manager
    #[error("No definition for package manager '{0}'")]
    MissingDefinition(PackageManagerId),
}

/// Handle on the record file
#[derive(Debug, Clone)]
pub struct LastKnownGood {
    path: PathBuf,
}

impl LastKnownGood {
    /// Record stored under `install_root`
    pub fn new(install_root: &Path) -> Self {
        Self {
            path: install_root.join(LAST_KNOWN_GOOD_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reference to use when nothing pins one
    ///
    /// A recorded entry wins. Without one, the newest stable release is
    /// fetched and recorded, unless the network is off or latest lookups are
    /// disabled. A failed lookup falls back to the built-in default.
    pub fn get_default_version(
        &self,
        id: PackageManagerId,
        config: &Config,
        client: &RegistryClient<'_>,
    ) -> Result<String, StoreError> {
        let mut file = self.open()?;
        let mut document = self.read_document(&mut file);

        if let Some(Value::String(reference)) = document.get(id.as_str()) {
            debug!(package_manager = %id, %reference, "using last known good");
            return Ok(reference.clone());
        }

        let definition = config
            .definition(id)
            .ok_or(StoreError::MissingDefinition(id))?;

        let settings = client.settings();
        if !settings.network_enabled || !settings.default_to_latest {
            debug!(package_manager = %id, default = %definition.default, "using built-in default");
            return Ok(definition.default.clone());
        }

        match client.fetch_latest_stable(&definition.fetch_latest_from) {
            Ok(latest) => {
                info!(package_manager = %id, %latest, "recording latest release");
                document.insert(id.as_str().to_string(), Value::String(latest.clone()));
                self.write_document(&mut file, &document)?;
                Ok(latest)
            }
            Err(e) => {
                warn!(package_manager = %id, error = %e, "latest lookup failed, using built-in default");
                Ok(definition.default.clone())
            }
        }
    }

    /// Record `reference` as the last known good one for `name`
    pub fn activate(&self, name: &str, reference: &str) -> Result<(), StoreError> {
        let mut file = self.open()?;
        let mut document = self.read_document(&mut file);

        if document.get(name).and_then(Value::as_str) == Some(reference) {
            return Ok(());
        }

        debug!(name, reference, "activating");
        document.insert(name.to_string(), Value::String(reference.to_string()));
        self.write_document(&mut file, &document)
    }

    fn open(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| self.io_error(e))
    }

    /// Parsed record; unreadable or malformed content counts as empty
    fn read_document(&self, file: &mut File) -> Map<String, Value> {
        let mut content = String::new();
        if let Err(e) = file.read_to_string(&mut content) {
            warn!(path = %self.path.display(), error = %e, "unreadable record, ignoring");
            return Map::new();
        }
        if content.trim().is_empty() {
            return Map::new();
        }

        match serde_json::from_str(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "malformed record, ignoring");
                Map::new()
            }
        }
    }

    fn write_document(&self, file: &mut File, document: &Map<String, Value>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(document)?;
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.set_len(0))
            .and_then(|_| file.write_all(json.as_bytes()))
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| self.io_error(e))
    }

    fn io_error(&self, error: std::io::Error) -> StoreError {
        StoreError::IoError {
            path: self.path.clone(),
            error,
        }
    }
}
