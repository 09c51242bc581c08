//! Package manager install cache
//!
//! Installs live at `<root>/<name>/<reference>/`. Each one is staged in a
//! temporary directory next to its final location and moved into place with a
//! single rename, so readers never observe a half-written install.
//!
//! Directory structure:
//! ```text
//! <root>/
//! ├── yarn/
//! │   └── 1.22.22/
//! │       ├── .corepin
//! │       └── bin/yarn.js
//! ├── corepin-<pid>-<random>/
//! └── lastKnownGood.json
//! ```

mod archive;
mod metadata;

pub use archive::{extract_tarball, is_tarball, url_basename};
pub use metadata::{InstallMetadata, MetadataError, METADATA_FILE};

use crate::config::{BinSpec, PackageManagerSpec};
use crate::descriptor::Locator;
use crate::integrity::{self, Integrity, IntegrityError};
use crate::registry::{
    is_under, FetchRequest, RegistryClient, RegistryError, RegistrySpec, DEFAULT_NPM_REGISTRY,
};
use crate::semver::{Range, Version};
use crate::settings::{IntegrityKeys, Settings};
use crate::signature::{self, KeySet, SignatureError};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during installs
#[derive(Debug, Error)]
pub enum InstallError {
    /// IO error (file operations)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Download failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Artifact failed verification
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Registry signature missing or invalid
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Archive extraction error
    #[error("Failed to extract archive: {0}")]
    ExtractionError(String),

    /// Metadata error
    #[error("Metadata error: {0}")]
    MetadataError(#[from] MetadataError),

    /// Installed package has no usable `package.json`
    #[error("Invalid package at {0}: {1}")]
    InvalidPackage(PathBuf, String),
}

/// An installed package manager
#[derive(Debug, Clone, PartialEq)]
pub struct InstallInfo {
    /// Install directory
    pub location: PathBuf,

    /// Binaries exposed by the install
    pub bin: BinSpec,

    /// Download URL the install came from
    pub url: String,

    /// `sha512.<hex>` digest of the artifact, when recorded
    pub hash: Option<String>,
}

/// Installs package managers into the cache
///
/// Concurrent installs of the same path within one process share a lock, so
/// the artifact is downloaded once. Other processes race on the final rename.
#[derive(Debug, Default)]
pub struct InstallManager {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl InstallManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Final location of an install
    pub fn install_path(root: &Path, locator: &Locator) -> PathBuf {
        root.join(&locator.name).join(reference_dir(locator))
    }

    /// Best installed reference for `range`, without touching the network
    ///
    /// An exact version only matches a directory of the same name, so a pinned
    /// digest never picks up an install made without it.
    pub fn find_installed_version(
        root: &Path,
        name: &str,
        range: &str,
    ) -> Result<Option<String>, InstallError> {
        let dir = root.join(name);

        if Version::is_valid(range) {
            return Ok(dir.join(range).is_dir().then(|| range.to_string()));
        }

        let Ok(range) = Range::parse(range) else {
            return Ok(None);
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut best: Option<(Version, String)> = None;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(reference) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(version) = Version::parse(&reference) else {
                continue;
            };
            if !range.matches_release(&version) {
                continue;
            }
            if best.as_ref().map_or(true, |(b, _)| version > *b) {
                best = Some((version, reference));
            }
        }

        Ok(best.map(|(_, reference)| reference))
    }

    /// Install `locator`, reusing an existing install when present
    pub fn install_version(
        &self,
        client: &RegistryClient<'_>,
        locator: &Locator,
        spec: &PackageManagerSpec,
    ) -> Result<InstallInfo, InstallError> {
        let settings = client.settings();
        let path = Self::install_path(&settings.install_root, locator);

        if let Some(info) = load_install(&path, spec)? {
            debug!(%locator, path = %path.display(), "already installed");
            return Ok(info);
        }

        let lock = self.lock_for(&path);
        let result = {
            let _guard = lock.lock();

            // Another thread may have finished while we waited
            match load_install(&path, spec) {
                Ok(Some(info)) => {
                    debug!(%locator, path = %path.display(), "installed concurrently");
                    Ok(info)
                }
                Ok(None) => self.download(client, settings, locator, spec, &path),
                Err(e) => Err(e),
            }
        };
        self.release(&path, lock);
        result
    }

    fn download(
        &self,
        client: &RegistryClient<'_>,
        settings: &Settings,
        locator: &Locator,
        spec: &PackageManagerSpec,
        path: &Path,
    ) -> Result<InstallInfo, InstallError> {
        let url = download_url(settings, spec, locator);
        info!(%locator, %url, "installing package manager");

        let auth = client.is_npm_url(&url).then(|| client.npm_auth()).flatten();
        let bytes = client.fetch(&FetchRequest::get(&url).auth(auth))?;

        let hash = integrity::check(
            &locator.to_string(),
            locator.integrity(),
            settings.strict_integrity,
            &bytes,
        )?;
        if let Some(signed) = signed_integrity(client, spec, locator, &url)? {
            signed.verify(&bytes)?;
            debug!(%locator, "registry signature verified");
        }

        let root = &settings.install_root;
        fs::create_dir_all(root)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("corepin-{}-", std::process::id()))
            .tempdir_in(root)?;

        archive::unpack(&bytes, staging.path(), &url)?;

        let bin = if locator.is_url {
            package_bins(staging.path(), &locator.name, &url)?
        } else {
            spec.bin.clone()
        };

        let metadata = InstallMetadata::new(
            locator.name.clone(),
            locator.reference.clone(),
            url.clone(),
            hash.to_string(),
            bin.clone(),
        );
        metadata.save(staging.path())?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // After a successful rename the staging path is gone and dropping
        // the TempDir does nothing.
        match fs::rename(staging.path(), path) {
            Ok(()) => {
                debug!(path = %path.display(), "install committed");
                Ok(InstallInfo {
                    location: path.to_path_buf(),
                    bin,
                    url,
                    hash: Some(hash.to_string()),
                })
            }
            Err(e) if lost_race(&e, path) => {
                debug!(path = %path.display(), error = %e, "another process installed first");
                drop(staging);
                load_install(path, spec)?.ok_or(InstallError::IoError(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Drop the path's lock entry once no other caller holds it
    fn release(&self, path: &Path, lock: Arc<Mutex<()>>) {
        // Clones are only made and dropped under the map lock
        let mut locks = self.locks.lock();
        drop(lock);
        if locks.get(path).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(path);
        }
    }
}

/// Integrity the npm registry signed for an artifact without a pinned digest
///
/// Only plain versions downloaded from the configured npm registry are
/// checked; pinned digests and custom URLs are trusted as they are.
fn signed_integrity(
    client: &RegistryClient<'_>,
    spec: &PackageManagerSpec,
    locator: &Locator,
    url: &str,
) -> Result<Option<Integrity>, InstallError> {
    let Some(RegistrySpec::Npm { package }) = &spec.registry else {
        return Ok(None);
    };
    if locator.is_url || locator.integrity().is_some() || !client.is_npm_url(url) {
        return Ok(None);
    }

    let keys = match &client.settings().integrity_keys {
        IntegrityKeys::Disabled => return Ok(None),
        IntegrityKeys::Inline(json) => KeySet::parse(json)?,
        IntegrityKeys::Registry => client.fetch_signing_keys()?,
    };
    let version = locator.version();
    let dist = client.fetch_dist(package, version)?;
    Ok(Some(signature::verify(&keys, package, version, &dist)?))
}

/// Read an existing install, if there is one
fn load_install(path: &Path, spec: &PackageManagerSpec) -> Result<Option<InstallInfo>, InstallError> {
    if !path.is_dir() {
        return Ok(None);
    }

    match InstallMetadata::load(path) {
        Ok(metadata) => Ok(Some(InstallInfo {
            location: path.to_path_buf(),
            bin: metadata.bin,
            url: metadata.url,
            hash: Some(metadata.hash),
        })),
        // Installs made by other tools carry no metadata
        Err(MetadataError::IoError(e)) if e.kind() == ErrorKind::NotFound => Ok(Some(InstallInfo {
            location: path.to_path_buf(),
            bin: spec.bin.clone(),
            url: spec.url.clone(),
            hash: None,
        })),
        Err(e) => Err(e.into()),
    }
}

/// Whether a rename failed because someone else committed the same install
fn lost_race(error: &std::io::Error, path: &Path) -> bool {
    match error.kind() {
        ErrorKind::AlreadyExists | ErrorKind::DirectoryNotEmpty => true,
        ErrorKind::PermissionDenied => path.is_dir(),
        _ => false,
    }
}

/// Download URL for a locator, honoring the npm registry override
fn download_url(settings: &Settings, spec: &PackageManagerSpec, locator: &Locator) -> String {
    let url = spec.download_url(locator.version());
    match settings.npm_registry.as_deref() {
        Some(registry) if is_under(&url, DEFAULT_NPM_REGISTRY) => format!(
            "{}{}",
            registry.trim_end_matches('/'),
            &url[DEFAULT_NPM_REGISTRY.len()..]
        ),
        _ => url,
    }
}

/// Single path segment for a reference; URLs are percent-encoded
fn reference_dir(locator: &Locator) -> String {
    if locator.is_url {
        url::form_urlencoded::byte_serialize(locator.reference.as_bytes()).collect()
    } else {
        locator.reference.clone()
    }
}

#[derive(Debug, Deserialize)]
struct PackageBins {
    name: Option<String>,
    bin: Option<serde_json::Value>,
}

/// Binaries of a URL install, read from its `package.json`
///
/// A single-file artifact exposes itself under the package manager's name.
fn package_bins(dir: &Path, name: &str, url: &str) -> Result<BinSpec, InstallError> {
    let manifest = dir.join("package.json");
    if !manifest.is_file() {
        return Ok(if dir.join(url_basename(url)).is_file() {
            BinSpec::List(vec![name.to_string()])
        } else {
            BinSpec::Map(BTreeMap::new())
        });
    }

    let invalid = |reason: String| InstallError::InvalidPackage(dir.to_path_buf(), reason);
    let content = fs::read_to_string(&manifest)?;
    let package: PackageBins = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

    let bins = match package.bin {
        Some(serde_json::Value::String(path)) => {
            BTreeMap::from([(package.name.unwrap_or_else(|| name.to_string()), path)])
        }
        Some(serde_json::Value::Object(map)) => map
            .into_iter()
            .filter_map(|(bin, path)| path.as_str().map(|p| (bin, p.to_string())))
            .collect(),
        Some(_) => return Err(invalid("'bin' must be a string or an object".to_string())),
        None => BTreeMap::new(),
    };

    Ok(BinSpec::Map(bins))
}
