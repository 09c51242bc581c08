//! Project spec lookup
//!
//! Finds the nearest `package.json` above a directory and reads which
//! package manager it pins, along with the project's env overlay file.

use crate::descriptor::Descriptor;
use crate::settings::ENV_PREFIX;
use crate::spec::{parse_spec, SpecError, SpecOptions};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Manifest file name
pub const MANIFEST_NAME: &str = "package.json";

/// Folder holding vendored dependencies; never a project root
pub const VENDOR_DIR: &str = "node_modules";

/// Errors that can occur while reading project files
#[derive(Debug, Error)]
pub enum ProjectError {
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Manifest is not valid JSON
    #[error("Failed to parse {path}: {error}")]
    ParseError {
        path: PathBuf,
        error: serde_json::Error,
    },

    /// `packageManager` has the wrong type
    #[error("Invalid package manager specification in {0}; expected a string")]
    InvalidField(PathBuf),

    /// Spec string is malformed
    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// What the nearest manifest says
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectSpec {
    /// No manifest above the start directory
    NoProject,

    /// A manifest exists but pins nothing
    NoSpec { manifest: PathBuf },

    /// The manifest pins a package manager
    Found {
        manifest: PathBuf,
        descriptor: Descriptor,
    },
}

/// Lookup result: the spec plus the overlay variables found next to it
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectLookup {
    pub spec: ProjectSpec,
    pub overlay: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PackageJson {
    #[serde(rename = "packageManager")]
    package_manager: Option<serde_json::Value>,

    #[serde(rename = "devEngines")]
    dev_engines: Option<DevEngines>,
}

#[derive(Debug, Deserialize)]
struct DevEngines {
    #[serde(rename = "packageManager")]
    package_manager: Option<DevEngineEntries>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DevEngineEntries {
    One(DevEngine),
    Many(Vec<DevEngine>),
}

#[derive(Debug, Deserialize)]
struct DevEngine {
    name: String,
    version: Option<String>,
}

/// Find the package manager pinned by the project containing `start_dir`
///
/// `node_modules` and every directory inside it are skipped. `env_file` names the
/// overlay file read from the manifest's directory.
pub fn find_project_spec(
    start_dir: &Path,
    env_file: Option<&str>,
    options: SpecOptions,
) -> Result<ProjectLookup, ProjectError> {
    let Some(manifest) = find_manifest(start_dir) else {
        debug!(start = %start_dir.display(), "no project manifest found");
        return Ok(ProjectLookup {
            spec: ProjectSpec::NoProject,
            overlay: HashMap::new(),
        });
    };

    let overlay = match (env_file, manifest.parent()) {
        (Some(name), Some(dir)) => read_env_file(&dir.join(name))?,
        _ => HashMap::new(),
    };

    let content = fs::read_to_string(&manifest)?;
    let package: PackageJson =
        serde_json::from_str(&content).map_err(|error| ProjectError::ParseError {
            path: manifest.clone(),
            error,
        })?;

    let source = format!("{}#packageManager", manifest.display());
    let descriptor = match package.package_manager {
        Some(serde_json::Value::String(raw)) => Some(parse_spec(
            &raw,
            &source,
            SpecOptions {
                enforce_exact_version: true,
                ..options
            },
        )?),
        Some(_) => return Err(ProjectError::InvalidField(manifest)),
        None => dev_engine_descriptor(package.dev_engines, &manifest, options)?,
    };

    let spec = match descriptor {
        Some(descriptor) => {
            debug!(manifest = %manifest.display(), %descriptor, "found project spec");
            ProjectSpec::Found {
                manifest,
                descriptor,
            }
        }
        None => ProjectSpec::NoSpec { manifest },
    };

    Ok(ProjectLookup { spec, overlay })
}

fn dev_engine_descriptor(
    dev_engines: Option<DevEngines>,
    manifest: &Path,
    options: SpecOptions,
) -> Result<Option<Descriptor>, ProjectError> {
    let entry = match dev_engines.and_then(|d| d.package_manager) {
        Some(DevEngineEntries::One(entry)) => entry,
        Some(DevEngineEntries::Many(entries)) => match entries.into_iter().next() {
            Some(entry) => entry,
            None => return Ok(None),
        },
        None => return Ok(None),
    };

    let raw = format!("{}@{}", entry.name, entry.version.as_deref().unwrap_or("*"));
    let source = format!("{}#devEngines.packageManager", manifest.display());
    Ok(Some(parse_spec(
        &raw,
        &source,
        SpecOptions {
            enforce_exact_version: false,
            ..options
        },
    )?))
}

/// Nearest `package.json` at or above `start_dir`, ignoring vendored folders
pub fn find_manifest(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .filter(|dir| !is_vendored(dir))
        .map(|dir| dir.join(MANIFEST_NAME))
        .find(|manifest| manifest.is_file())
}

fn is_vendored(dir: &Path) -> bool {
    dir.components()
        .any(|c| matches!(c, Component::Normal(name) if name == VENDOR_DIR))
}

/// Read `COREPIN_*` variables from an env file; a missing file is empty
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ProjectError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_env_file(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Parse `KEY=VALUE` lines, keeping only broker variables
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if !key.starts_with(ENV_PREFIX) {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    // Unquoted values may carry a trailing comment
    match value.find(" #") {
        Some(i) => value[..i].trim_end(),
        None => value,
    }
}
