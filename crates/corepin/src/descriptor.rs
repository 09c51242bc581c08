//! Descriptor and locator value types
//!
//! A [`Descriptor`] is what a project asks for (`yarn@^1.22.0`), a
//! [`Locator`] is what resolution settled on (`yarn@1.22.19`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The package managers the broker knows how to install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerId {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManagerId {
    /// All supported package managers
    pub const ALL: [PackageManagerId; 3] = [
        PackageManagerId::Npm,
        PackageManagerId::Yarn,
        PackageManagerId::Pnpm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PackageManagerId::Npm => "npm",
            PackageManagerId::Yarn => "yarn",
            PackageManagerId::Pnpm => "pnpm",
        }
    }

    /// Check whether `name` is one of the statically known package managers
    pub fn is_known(name: &str) -> bool {
        name.parse::<PackageManagerId>().is_ok()
    }
}

impl fmt::Display for PackageManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageManagerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(PackageManagerId::Npm),
            "yarn" => Ok(PackageManagerId::Yarn),
            "pnpm" => Ok(PackageManagerId::Pnpm),
            other => Err(other.to_string()),
        }
    }
}

/// Name plus requested range, tag or URL
///
/// `name` is a plain string because URL descriptors may name a custom
/// package manager; every other descriptor carries a known name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    range: String,
}

impl Descriptor {
    pub(crate) fn new(name: impl Into<String>, range: impl Into<String>) -> Self {
        Descriptor {
            name: name.into(),
            range: range.into(),
        }
    }

    /// Descriptor for a known package manager
    pub fn for_id(id: PackageManagerId, range: impl Into<String>) -> Self {
        Descriptor::new(id.as_str(), range)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> &str {
        &self.range
    }

    /// The known package manager this descriptor names, if any
    pub fn id(&self) -> Option<PackageManagerId> {
        self.name.parse().ok()
    }

    pub fn is_url(&self) -> bool {
        is_url(&self.range)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.range)
    }
}

/// Name plus concrete, installable reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub name: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_url: bool,
}

impl Locator {
    pub(crate) fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Locator {
            name: name.into(),
            reference: reference.into(),
            is_url: false,
        }
    }

    pub(crate) fn url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Locator {
            name: name.into(),
            reference: url.into(),
            is_url: true,
        }
    }

    pub fn id(&self) -> Option<PackageManagerId> {
        self.name.parse().ok()
    }

    /// The reference without any `+algorithm.digest` suffix
    pub fn version(&self) -> &str {
        if self.is_url {
            return &self.reference;
        }
        match self.reference.split_once('+') {
            Some((version, _)) => version,
            None => &self.reference,
        }
    }

    /// The `+algorithm.digest` suffix, if present
    pub fn integrity(&self) -> Option<&str> {
        if self.is_url {
            return None;
        }
        self.reference.split_once('+').map(|(_, build)| build)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.reference)
    }
}

/// Whether a range string is an absolute URL
pub fn is_url(range: &str) -> bool {
    url::Url::parse(range)
        .map(|u| u.has_host() || u.scheme() == "file")
        .unwrap_or(false)
}
