//! Version resolution
//!
//! Turns a descriptor (`yarn@^1.22.0`, `pnpm@latest`) into a concrete locator,
//! preferring installed versions and otherwise asking every registry that
//! publishes the package manager.

use crate::cache::{InstallError, InstallManager};
use crate::config::{Config, Definition};
use crate::descriptor::{Descriptor, Locator};
use crate::registry::{RegistryClient, RegistryError, RegistrySpec};
use crate::semver::{self, Range, SemverError, Version};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A tag was given where only versions are accepted
    #[error("Packages managers can't be referenced via tags in this context ({0})")]
    TagsNotAllowed(String),

    /// The registry has no such tag
    #[error("Tag '{tag}' not found for {name}")]
    TagNotFound { name: String, tag: String },

    /// Name outside the supported set
    #[error("Unsupported package manager specification ({0})")]
    UnsupportedPackageManager(String),

    /// Range failed to parse
    #[error("Invalid range for {descriptor}: {error}")]
    InvalidRange {
        descriptor: String,
        error: SemverError,
    },

    /// Registry lookup failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Install cache could not be read
    #[error(transparent)]
    Install(#[from] InstallError),
}

/// Resolution options
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Accept tags such as `latest` or `stable`
    pub allow_tags: bool,

    /// Answer from installed versions when one matches
    pub use_cache: bool,
}

/// Descriptor resolver
pub struct Resolver<'a> {
    config: &'a Config,
    client: &'a RegistryClient<'a>,
}

impl<'a> Resolver<'a> {
    pub fn new(config: &'a Config, client: &'a RegistryClient<'a>) -> Self {
        Self { config, client }
    }

    /// Resolve a descriptor; `Ok(None)` when no published version matches
    pub fn resolve(
        &self,
        descriptor: &Descriptor,
        options: ResolveOptions,
    ) -> Result<Option<Locator>, ResolveError> {
        if descriptor.is_url() {
            return Ok(Some(Locator::url(descriptor.name(), descriptor.range())));
        }

        let unsupported = || ResolveError::UnsupportedPackageManager(descriptor.to_string());
        let id = descriptor.id().ok_or_else(unsupported)?;
        let definition = self.config.definition(id).ok_or_else(unsupported)?;
        let name = descriptor.name();

        let mut range = descriptor.range().to_string();
        if !Version::is_valid(&range) && !Range::is_valid(&range) {
            if !options.allow_tags {
                return Err(ResolveError::TagsNotAllowed(descriptor.to_string()));
            }
            range = self.resolve_tag(definition, name, &range)?;
        }

        if options.use_cache {
            let root = &self.client.settings().install_root;
            if let Some(reference) = InstallManager::find_installed_version(root, name, &range)? {
                debug!(%descriptor, %reference, "resolved from install cache");
                return Ok(Some(Locator::new(name, reference)));
            }
        }

        if Version::is_valid(&range) {
            return Ok(Some(Locator::new(name, range)));
        }

        let parsed = Range::parse(&range).map_err(|error| ResolveError::InvalidRange {
            descriptor: descriptor.to_string(),
            error,
        })?;

        let reference = self.fetch_best_match(definition, &parsed)?;
        debug!(%descriptor, reference = ?reference, "resolved from registries");
        Ok(reference.map(|reference| Locator::new(name, reference)))
    }

    /// Look a tag up in the newest range entry's registry
    fn resolve_tag(&self, definition: &Definition, name: &str, tag: &str) -> Result<String, ResolveError> {
        let not_found = || ResolveError::TagNotFound {
            name: name.to_string(),
            tag: tag.to_string(),
        };

        let registry = definition
            .newest()
            .and_then(|entry| entry.spec.registry.as_ref())
            .ok_or_else(not_found)?;

        let tags = self.client.fetch_available_tags(registry)?;
        let version = tags.get(tag).cloned().ok_or_else(not_found)?;
        debug!(name, tag, %version, "resolved tag");
        Ok(version)
    }

    /// Highest version across every registry that matches `range`
    ///
    /// The download entry is picked later from the winning version, so a
    /// registry's listing is not narrowed to the entry that names it.
    fn fetch_best_match(&self, definition: &Definition, range: &Range) -> Result<Option<String>, ResolveError> {
        let mut registries: Vec<&RegistrySpec> = Vec::new();
        for registry in definition.ranges.iter().filter_map(|entry| entry.spec.registry.as_ref()) {
            if !registries.contains(&registry) {
                registries.push(registry);
            }
        }

        let per_registry: Vec<Result<Vec<String>, RegistryError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = registries
                .iter()
                .map(|registry| scope.spawn(move || self.candidates(registry, range)))
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        let mut seen = HashSet::new();
        let mut best: Option<(Version, String)> = None;
        for candidates in per_registry {
            for raw in candidates? {
                if !seen.insert(raw.clone()) {
                    continue;
                }
                let Ok(version) = Version::parse(&raw) else {
                    continue;
                };
                if best.as_ref().map_or(true, |(b, _)| version > *b) {
                    best = Some((version, raw));
                }
            }
        }

        Ok(best.map(|(_, raw)| raw))
    }

    /// Versions from one registry that `range` reaches, prereleases included
    fn candidates(&self, registry: &RegistrySpec, range: &Range) -> Result<Vec<String>, RegistryError> {
        let versions = self.client.fetch_available_versions(registry)?;
        Ok(versions
            .into_iter()
            .filter(|v| semver::satisfies_release(v, range))
            .collect())
    }
}
