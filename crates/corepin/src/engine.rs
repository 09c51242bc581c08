//! Broker flow for one invocation
//!
//! binary name → project spec → descriptor → locator → install → launch

use crate::cache::{InstallError, InstallInfo, InstallManager};
use crate::config::{Config, ConfigError};
use crate::descriptor::{Descriptor, Locator, PackageManagerId};
use crate::last_known_good::{LastKnownGood, StoreError};
use crate::launcher::{LaunchError, Launcher};
use crate::project::{find_project_spec, ProjectError, ProjectSpec};
use crate::registry::{RegistryClient, RegistryError, Transport};
use crate::resolver::{ResolveError, ResolveOptions, Resolver};
use crate::settings::Settings;
use crate::spec::{SpecError, SpecOptions};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Every failure the broker can report
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Unsupported binary '{0}'; expected one of the npm, yarn or pnpm binaries")]
    UnsupportedBinary(String),

    #[error(
        "This project is configured to use {expected} because {manifest} has a \"packageManager\" field; set COREPIN_ENABLE_STRICT=0 to run {binary} anyway"
    )]
    ProjectMismatch {
        expected: String,
        binary: String,
        manifest: PathBuf,
    },

    #[error("No version matching {0} was found")]
    NoMatchingVersion(String),

    #[error("No download definition covers {0}")]
    UnsupportedVersion(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl BrokerError {
    /// Whether the user can fix this by changing their input or environment
    pub fn is_usage(&self) -> bool {
        match self {
            BrokerError::UnsupportedBinary(_)
            | BrokerError::ProjectMismatch { .. }
            | BrokerError::NoMatchingVersion(_)
            | BrokerError::UnsupportedVersion(_)
            | BrokerError::Spec(_) => true,
            BrokerError::Project(e) => !matches!(e, ProjectError::IoError(_)),
            BrokerError::Resolve(e) => matches!(
                e,
                ResolveError::TagsNotAllowed(_)
                    | ResolveError::TagNotFound { .. }
                    | ResolveError::UnsupportedPackageManager(_)
                    | ResolveError::InvalidRange { .. }
                    | ResolveError::Registry(RegistryError::NetworkDisabled(_))
            ),
            BrokerError::Registry(e) => matches!(e, RegistryError::NetworkDisabled(_)),
            BrokerError::Install(e) => matches!(
                e,
                InstallError::Integrity(_)
                    | InstallError::Signature(_)
                    | InstallError::Registry(RegistryError::NetworkDisabled(_))
            ),
            BrokerError::Config(_)
            | BrokerError::Store(_)
            | BrokerError::Launch(_) => false,
        }
    }
}

/// What an invocation settled on
#[derive(Debug, Clone)]
pub struct Prepared {
    pub settings: Settings,
    pub locator: Locator,
    pub install: InstallInfo,

    /// Overlay variables the real environment does not already set
    pub env: Vec<(String, String)>,
}

/// Resolves, installs and launches package managers
///
/// One broker can serve many concurrent invocations; installs of the same
/// version are deduplicated.
pub struct Broker<T: Transport> {
    transport: T,
    config: Config,
    installer: InstallManager,
    env: Vec<(String, String)>,
}

impl<T: Transport> Broker<T> {
    /// Broker over `transport` with `env` as the real environment
    pub fn new<I, K, V>(transport: T, config: Config, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();

        Self {
            transport,
            config,
            installer: InstallManager::new(),
            env,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `bin_name` with `args` for the project around `cwd`
    pub fn run(&self, bin_name: &str, args: &[OsString], cwd: &Path) -> Result<i32, BrokerError> {
        let prepared = self.prepare(bin_name, cwd)?;
        let code = Launcher::new(&prepared.settings)
            .with_env(&prepared.env)
            .run_version(&prepared.locator, &prepared.install, bin_name, args)?;
        Ok(code)
    }

    /// Everything up to the launch: pick, resolve, install and record
    ///
    /// Binaries of the well-known package managers work anywhere. Any other
    /// name only runs inside a project pinning a URL for a package manager
    /// of that name.
    pub fn prepare(&self, bin_name: &str, cwd: &Path) -> Result<Prepared, BrokerError> {
        let id = self.config.package_manager_for_binary(bin_name);

        let base = Settings::from_vars(self.env.clone());
        let lookup = find_project_spec(
            cwd,
            base.env_file.as_deref(),
            SpecOptions {
                enforce_exact_version: true,
                unsafe_custom_urls: base.unsafe_custom_urls,
            },
        )?;
        let settings = Settings::with_overlay(self.env.clone(), &lookup.overlay);

        let client = RegistryClient::new(&self.transport, &settings);
        let store = LastKnownGood::new(&settings.install_root);

        let (descriptor, from_default) = match (id, lookup.spec) {
            (Some(id), ProjectSpec::Found { descriptor, .. }) if descriptor.name() == id.as_str() => {
                (descriptor, false)
            }
            (None, ProjectSpec::Found { descriptor, .. })
                if descriptor.is_url() && descriptor.name() == bin_name =>
            {
                (descriptor, false)
            }
            (None, _) => return Err(BrokerError::UnsupportedBinary(bin_name.to_string())),
            (
                Some(_),
                ProjectSpec::Found {
                    descriptor,
                    manifest,
                },
            ) if settings.strict_project => {
                return Err(BrokerError::ProjectMismatch {
                    expected: descriptor.to_string(),
                    binary: bin_name.to_string(),
                    manifest,
                });
            }
            (Some(id), _) => (self.default_descriptor(id, &store, &client)?, true),
        };
        debug!(%descriptor, from_default, "selected descriptor");

        let locator = Resolver::new(&self.config, &client)
            .resolve(
                &descriptor,
                ResolveOptions {
                    allow_tags: true,
                    use_cache: true,
                },
            )?
            .ok_or_else(|| BrokerError::NoMatchingVersion(descriptor.to_string()))?;

        let spec = self
            .config
            .spec_for_locator(&locator)
            .ok_or_else(|| BrokerError::UnsupportedVersion(locator.to_string()))?;

        let install = self.installer.install_version(&client, &locator, &spec)?;

        if from_default {
            if let Err(e) = store.activate(&locator.name, &locator.reference) {
                warn!(%locator, error = %e, "failed to record last known good version");
            }
        }

        let mut env: Vec<(String, String)> = lookup
            .overlay
            .into_iter()
            .filter(|(k, _)| !self.env.iter().any(|(real, _)| real == k))
            .collect();
        env.sort();

        Ok(Prepared {
            settings,
            locator,
            install,
            env,
        })
    }

    fn default_descriptor(
        &self,
        id: PackageManagerId,
        store: &LastKnownGood,
        client: &RegistryClient<'_>,
    ) -> Result<Descriptor, BrokerError> {
        let reference = store.get_default_version(id, &self.config, client)?;
        Ok(Descriptor::for_id(id, reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FetchRequest;

    struct Offline;

    impl Transport for Offline {
        fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, RegistryError> {
            Err(RegistryError::NetworkDisabled(request.url.clone()))
        }

        fn list_remote_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
            Err(RegistryError::NetworkDisabled(repository.to_string()))
        }
    }

    #[test]
    fn test_unsupported_binary_is_usage_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let broker = Broker::new(
            Offline,
            Config::builtin().unwrap(),
            [("COREPIN_HOME", temp.path().to_str().unwrap())],
        );

        let err = broker.prepare("bun", temp.path()).unwrap_err();
        assert!(matches!(err, BrokerError::UnsupportedBinary(_)));
        assert!(err.is_usage());
    }

    #[test]
    fn test_project_mismatch() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"packageManager": "pnpm@9.1.0"}"#,
        )
        .unwrap();
        let broker = Broker::new(
            Offline,
            Config::builtin().unwrap(),
            [("COREPIN_HOME", temp.path().join("home").to_str().unwrap())],
        );

        let err = broker.prepare("yarn", temp.path()).unwrap_err();
        assert!(matches!(err, BrokerError::ProjectMismatch { .. }));
        assert!(err.to_string().contains("pnpm@9.1.0"));
    }
}
