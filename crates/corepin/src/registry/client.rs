//! Registry clients
//!
//! One closed enum variant per registry kind; every operation matches on it
//! exhaustively.

use super::api::{json_path, Packument, NPM_ABBREVIATED_ACCEPT};
use super::transport::{Auth, FetchRequest, Transport};
use crate::semver::Version;
use crate::settings::Settings;
use crate::signature::{Dist, KeySet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Default npm registry
pub const DEFAULT_NPM_REGISTRY: &str = "https://registry.npmjs.org";

/// Errors that can occur during registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Network access is disabled by configuration
    #[error("Network access disabled by the environment; can't reach {0}")]
    NetworkDisabled(String),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// git invocation failed
    #[error("Git error: {0}")]
    Git(String),

    /// The registry answered with something unusable
    #[error("Invalid registry response from {source_url}: {reason}")]
    InvalidResponse { source_url: String, reason: String },
}

/// JSON paths inside a URL registry document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrlFields {
    /// Path to a `{tag: version}` object
    pub tags: String,

    /// Path to an array of version strings
    pub versions: String,
}

/// Where a package manager's versions are listed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistrySpec {
    /// npm-compatible registry
    Npm { package: String },

    /// Tags of a git remote; `pattern` marks the version with `{}`
    Git { repository: String, pattern: String },

    /// Any JSON document listing tags and versions
    Url { url: String, fields: UrlFields },
}

/// Registry operations over a transport
pub struct RegistryClient<'a> {
    transport: &'a dyn Transport,
    settings: &'a Settings,
}

impl<'a> RegistryClient<'a> {
    pub fn new(transport: &'a dyn Transport, settings: &'a Settings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &'a Settings {
        self.settings
    }

    /// Every version the registry publishes
    pub fn fetch_available_versions(&self, spec: &RegistrySpec) -> Result<Vec<String>, RegistryError> {
        let versions = match spec {
            RegistrySpec::Npm { package } => self.fetch_packument(package)?.version_list(),
            RegistrySpec::Git {
                repository,
                pattern,
            } => self.fetch_git_versions(repository, pattern)?,
            RegistrySpec::Url { url, fields } => {
                let doc = self.fetch_json(url)?;
                let list = json_path(&doc, &fields.versions)
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| RegistryError::InvalidResponse {
                        source_url: url.clone(),
                        reason: format!("'{}' is not an array", fields.versions),
                    })?;
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            }
        };
        debug!(count = versions.len(), "fetched available versions");
        Ok(versions)
    }

    /// Tag → version mapping
    pub fn fetch_available_tags(
        &self,
        spec: &RegistrySpec,
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        match spec {
            RegistrySpec::Npm { package } => {
                Ok(self.fetch_packument(package)?.dist_tags.into_iter().collect())
            }
            RegistrySpec::Git {
                repository,
                pattern,
            } => {
                // Git remotes have no tag aliases; expose the newest stable
                // release as `latest`.
                let versions = self.fetch_git_versions(repository, pattern)?;
                Ok(max_stable(&versions)
                    .map(|latest| BTreeMap::from([("latest".to_string(), latest)]))
                    .unwrap_or_default())
            }
            RegistrySpec::Url { url, fields } => {
                let doc = self.fetch_json(url)?;
                let tags = json_path(&doc, &fields.tags)
                    .and_then(|v| v.as_object())
                    .ok_or_else(|| RegistryError::InvalidResponse {
                        source_url: url.clone(),
                        reason: format!("'{}' is not an object", fields.tags),
                    })?;
                Ok(tags
                    .iter()
                    .filter_map(|(tag, v)| v.as_str().map(|v| (tag.clone(), v.to_string())))
                    .collect())
            }
        }
    }

    /// Newest stable version
    pub fn fetch_latest_stable(&self, spec: &RegistrySpec) -> Result<String, RegistryError> {
        match spec {
            RegistrySpec::Npm { package } => {
                let packument = self.fetch_packument(package)?;
                packument
                    .dist_tags
                    .get("latest")
                    .cloned()
                    .ok_or_else(|| RegistryError::InvalidResponse {
                        source_url: self.npm_url(package),
                        reason: "no 'latest' dist-tag".to_string(),
                    })
            }
            RegistrySpec::Git { repository, .. } | RegistrySpec::Url { url: repository, .. } => {
                let versions = self.fetch_available_versions(spec)?;
                max_stable(&versions).ok_or_else(|| RegistryError::InvalidResponse {
                    source_url: repository.clone(),
                    reason: "no stable version published".to_string(),
                })
            }
        }
    }

    /// npm registry base URL, honoring a configured override
    pub fn npm_registry(&self) -> &str {
        self.settings
            .npm_registry
            .as_deref()
            .unwrap_or(DEFAULT_NPM_REGISTRY)
            .trim_end_matches('/')
    }

    /// Whether `url` points into the configured npm registry
    pub fn is_npm_url(&self, url: &str) -> bool {
        is_under(url, self.npm_registry())
    }

    /// `dist` block of one published version
    pub fn fetch_dist(&self, package: &str, version: &str) -> Result<Dist, RegistryError> {
        let packument = self.fetch_packument(package)?;
        let dist = packument
            .versions
            .get(version)
            .and_then(|manifest| manifest.get("dist"))
            .ok_or_else(|| RegistryError::InvalidResponse {
                source_url: self.npm_url(package),
                reason: format!("no dist for version {}", version),
            })?;
        Ok(serde_json::from_value(dist.clone())?)
    }

    /// Signing keys published by the npm registry
    pub fn fetch_signing_keys(&self) -> Result<KeySet, RegistryError> {
        let url = format!("{}/-/npm/v1/keys", self.npm_registry());
        let request = FetchRequest::get(url)
            .accept("application/json")
            .auth(self.npm_auth());
        let body = self.fetch(&request)?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn npm_url(&self, package: &str) -> String {
        format!("{}/{}", self.npm_registry(), encode_package_name(package))
    }

    fn fetch_packument(&self, package: &str) -> Result<Packument, RegistryError> {
        let request = FetchRequest::get(self.npm_url(package))
            .accept(NPM_ABBREVIATED_ACCEPT)
            .auth(self.npm_auth());
        let body = self.fetch(&request)?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn fetch_json(&self, url: &str) -> Result<serde_json::Value, RegistryError> {
        let body = self.fetch(&FetchRequest::get(url).accept("application/json"))?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn fetch_git_versions(&self, repository: &str, pattern: &str) -> Result<Vec<String>, RegistryError> {
        if !self.settings.network_enabled {
            return Err(RegistryError::NetworkDisabled(repository.to_string()));
        }
        let matcher = tag_matcher(pattern)?;
        let refs = self.transport.list_remote_tags(repository)?;

        let mut seen = HashSet::new();
        Ok(refs
            .iter()
            .filter_map(|r| matcher.captures(r))
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .filter(|v| Version::is_valid(v))
            .filter(|v| seen.insert(v.clone()))
            .collect())
    }

    /// Fetch through the transport, refusing when the network is disabled
    pub fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, RegistryError> {
        if !self.settings.network_enabled {
            return Err(RegistryError::NetworkDisabled(request.url.clone()));
        }
        self.transport.fetch(request)
    }

    /// Credentials for requests to the npm registry
    pub fn npm_auth(&self) -> Option<Auth> {
        self.settings.npm_auth.clone()
    }
}

/// Whether `url` lives under `base`
///
/// Scheme, host and port must match exactly, and the path must continue
/// `base`'s path at a segment boundary.
pub fn is_under(url: &str, base: &str) -> bool {
    let (Ok(url), Ok(base)) = (url::Url::parse(url), url::Url::parse(base)) else {
        return false;
    };
    if url.scheme() != base.scheme()
        || url.host_str() != base.host_str()
        || url.port_or_known_default() != base.port_or_known_default()
    {
        return false;
    }

    let prefix = base.path().trim_end_matches('/');
    match url.path().strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Regex matching `refs/tags/<pattern>` with `{}` capturing the version
fn tag_matcher(pattern: &str) -> Result<Regex, RegistryError> {
    let (prefix, suffix) = pattern
        .split_once("{}")
        .ok_or_else(|| RegistryError::Git(format!("tag pattern '{}' has no {{}}", pattern)))?;
    let expr = format!(
        "^refs/tags/{}(.+){}$",
        regex::escape(prefix),
        regex::escape(suffix)
    );
    Regex::new(&expr).map_err(|e| RegistryError::Git(e.to_string()))
}

/// Highest non-prerelease version in a listing
fn max_stable(versions: &[String]) -> Option<String> {
    versions
        .iter()
        .filter_map(|raw| Version::parse(raw).ok().map(|v| (v, raw)))
        .filter(|(v, _)| !v.is_prerelease())
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| raw.clone())
}

/// Encode a package name for URL path
///
/// Handles scoped packages (@org/name) by encoding the /
fn encode_package_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replacen('/', "%2F", 1)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_package_name() {
        assert_eq!(encode_package_name("yarn"), "yarn");
        assert_eq!(encode_package_name("@yarnpkg/cli-dist"), "@yarnpkg%2Fcli-dist");
    }

    #[test]
    fn test_is_under() {
        let base = "https://registry.npmjs.org";
        assert!(is_under("https://registry.npmjs.org/pnpm/-/pnpm-9.1.0.tgz", base));
        assert!(is_under("https://registry.npmjs.org:443/pnpm", base));
        assert!(!is_under("https://registry.npmjs.org.evil.com/pnpm", base));
        assert!(!is_under("http://registry.npmjs.org/pnpm", base));
        assert!(!is_under("https://registry.npmjs.org:8443/pnpm", base));
        assert!(!is_under("not a url", base));

        let scoped = "https://npm.internal/registry";
        assert!(is_under("https://npm.internal/registry/pnpm", scoped));
        assert!(is_under("https://npm.internal/registry", scoped));
        assert!(!is_under("https://npm.internal/registry-mirror/pnpm", scoped));
    }

    #[test]
    fn test_tag_matcher() {
        let matcher = tag_matcher("v{}").unwrap();
        let caps = matcher.captures("refs/tags/v1.2.3").unwrap();
        assert_eq!(&caps[1], "1.2.3");
        assert!(matcher.captures("refs/tags/1.2.3").is_none());

        let suffixed = tag_matcher("release-{}.final").unwrap();
        assert_eq!(&suffixed.captures("refs/tags/release-2.0.0.final").unwrap()[1], "2.0.0");
        assert!(tag_matcher("v").is_err());
    }

    #[test]
    fn test_max_stable_skips_prereleases() {
        let versions = vec![
            "1.0.0".to_string(),
            "2.0.0-rc.1".to_string(),
            "1.5.0".to_string(),
            "garbage".to_string(),
        ];
        assert_eq!(max_stable(&versions), Some("1.5.0".to_string()));
    }

    #[test]
    fn test_registry_spec_deserializes_tagged() {
        let spec: RegistrySpec = toml::from_str(
            r#"
type = "git"
repository = "https://github.com/example/pm.git"
pattern = "v{}"
"#,
        )
        .unwrap();
        assert!(matches!(spec, RegistrySpec::Git { .. }));
    }
}
