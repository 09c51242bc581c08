//! Static package manager definitions
//!
//! The table ships embedded in the binary (`config.toml`) and maps every
//! supported package manager to its default version and an ordered list of
//! range-to-spec entries.

use crate::descriptor::{Locator, PackageManagerId};
use crate::registry::RegistrySpec;
use crate::semver::{self, Range};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const BUILTIN_CONFIG: &str = include_str!("../config.toml");

/// Errors that can occur while loading definitions
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse TOML
    #[error("Failed to parse package manager definitions: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid package manager definitions: {0}")]
    ValidationError(String),
}

/// Binary names exposed by a package manager
///
/// A map points each binary at a file inside the extracted archive; a list
/// means one downloaded script answers to every listed name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BinSpec {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

impl BinSpec {
    /// Check whether the spec exposes `name`
    pub fn provides(&self, name: &str) -> bool {
        match self {
            BinSpec::Map(map) => map.contains_key(name),
            BinSpec::List(names) => names.iter().any(|n| n == name),
        }
    }

    /// All binary names
    pub fn names(&self) -> Vec<&str> {
        match self {
            BinSpec::Map(map) => map.keys().map(String::as_str).collect(),
            BinSpec::List(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// How to download one range of a package manager's versions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageManagerSpec {
    /// Download URL template; `{}` is replaced with the version
    pub url: String,

    pub bin: BinSpec,

    /// Where versions and tags are listed; absent for custom URL installs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySpec>,
}

impl PackageManagerSpec {
    /// Substitute `version` into the URL template
    pub fn download_url(&self, version: &str) -> String {
        self.url.replace("{}", version)
    }
}

/// One `range -> spec` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangeEntry {
    pub range: String,

    #[serde(flatten)]
    pub spec: PackageManagerSpec,
}

/// Definition of one package manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Definition {
    /// Version used when nothing else decides
    pub default: String,

    /// Registry consulted for the latest stable release
    pub fetch_latest_from: RegistrySpec,

    /// Ordered oldest scheme first
    pub ranges: Vec<RangeEntry>,
}

impl Definition {
    /// The newest entry, whose registry answers tag lookups
    pub fn newest(&self) -> Option<&RangeEntry> {
        self.ranges.last()
    }

    /// First entry whose range covers `reference`
    pub fn spec_for(&self, reference: &str) -> Option<&PackageManagerSpec> {
        self.ranges
            .iter()
            .find(|entry| {
                Range::parse(&entry.range)
                    .map(|range| semver::satisfies(reference, &range, true))
                    .unwrap_or(false)
            })
            .map(|entry| &entry.spec)
    }
}

/// The full definitions table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Config {
    definitions: BTreeMap<String, Definition>,
}

impl Config {
    /// The definitions embedded in the binary
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::parse(BUILTIN_CONFIG)
    }

    /// Parse definitions from a TOML document
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load definitions from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ValidationError(format!("{}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, definition) in &self.definitions {
            if !PackageManagerId::is_known(name) {
                return Err(ConfigError::ValidationError(format!(
                    "unknown package manager '{}'",
                    name
                )));
            }
            if definition.ranges.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "'{}' has no ranges",
                    name
                )));
            }
            for entry in &definition.ranges {
                Range::parse(&entry.range).map_err(|e| {
                    ConfigError::ValidationError(format!("'{}' range {}: {}", name, entry.range, e))
                })?;
                if !entry.spec.url.contains("{}") {
                    return Err(ConfigError::ValidationError(format!(
                        "'{}' url {} has no version placeholder",
                        name, entry.spec.url
                    )));
                }
            }
        }
        Ok(())
    }

    /// Definition for a package manager
    pub fn definition(&self, id: PackageManagerId) -> Option<&Definition> {
        self.definitions.get(id.as_str())
    }

    /// Package manager that ships `binary` (`npx` → npm, `yarnpkg` → yarn)
    pub fn package_manager_for_binary(&self, binary: &str) -> Option<PackageManagerId> {
        PackageManagerId::ALL.into_iter().find(|id| {
            self.definition(*id)
                .map(|def| def.ranges.iter().any(|entry| entry.spec.bin.provides(binary)))
                .unwrap_or(false)
        })
    }

    /// Download spec for a resolved locator
    ///
    /// URL locators carry their own download location; their binaries are
    /// discovered after extraction.
    pub fn spec_for_locator(&self, locator: &Locator) -> Option<PackageManagerSpec> {
        if locator.is_url {
            return Some(PackageManagerSpec {
                url: locator.reference.clone(),
                bin: BinSpec::Map(BTreeMap::new()),
                registry: None,
            });
        }
        self.definition(locator.id()?)?
            .spec_for(&locator.reference)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_config_loads() {
        let config = Config::builtin().unwrap();
        for id in PackageManagerId::ALL {
            let def = config.definition(id).unwrap();
            assert!(!def.ranges.is_empty());
            assert!(crate::semver::Version::is_valid(&def.default));
        }
    }

    #[test]
    fn test_binary_lookup() {
        let config = Config::builtin().unwrap();
        assert_eq!(config.package_manager_for_binary("npx"), Some(PackageManagerId::Npm));
        assert_eq!(config.package_manager_for_binary("yarnpkg"), Some(PackageManagerId::Yarn));
        assert_eq!(config.package_manager_for_binary("pnpx"), Some(PackageManagerId::Pnpm));
        assert_eq!(config.package_manager_for_binary("bun"), None);
    }

    #[test]
    fn test_spec_for_picks_first_matching_range() {
        let config = Config::builtin().unwrap();
        let yarn = config.definition(PackageManagerId::Yarn).unwrap();

        let classic = yarn.spec_for("1.22.4+sha1.abc").unwrap();
        assert!(classic.url.contains("registry.yarnpkg.com"));
        assert!(matches!(classic.bin, BinSpec::Map(_)));

        let berry = yarn.spec_for("4.0.0-rc.1").unwrap();
        assert!(matches!(berry.bin, BinSpec::List(_)));
        assert_eq!(
            berry.download_url("4.0.0-rc.1"),
            "https://repo.yarnpkg.com/4.0.0-rc.1/packages/yarnpkg-cli/bin/yarn.js"
        );
    }

    #[test]
    fn test_rejects_unknown_manager() {
        let toml = r#"
[bun]
default = "1.0.0"
fetch_latest_from = { type = "npm", package = "bun" }

[[bun.ranges]]
range = "*"
url = "https://example.com/bun-{}.tgz"
bin = ["bun"]
registry = { type = "npm", package = "bun" }
"#;
        assert!(matches!(Config::parse(toml), Err(ConfigError::ValidationError(_))));
    }
}
