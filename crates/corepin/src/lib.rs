//! corepin: package manager version broker
//!
//! Runs the npm, yarn or pnpm version a project pins, installing it on first
//! use. This crate provides:
//! - `name@range` spec parsing and npm-style semver ranges
//! - Project lookup (`package.json#packageManager`)
//! - Resolution against npm, git and URL registries
//! - Atomic, verified installs into a shared cache
//! - The final process handoff

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod integrity;
pub mod last_known_good;
pub mod launcher;
pub mod project;
pub mod registry;
pub mod resolver;
pub mod semver;
pub mod settings;
pub mod signature;
pub mod spec;

pub use cache::{InstallError, InstallInfo, InstallManager, InstallMetadata};
pub use config::{BinSpec, Config, ConfigError, Definition, PackageManagerSpec, RangeEntry};
pub use descriptor::{Descriptor, Locator, PackageManagerId};
pub use engine::{Broker, BrokerError, Prepared};
pub use integrity::{Algorithm, Integrity, IntegrityError};
pub use last_known_good::{LastKnownGood, StoreError};
pub use launcher::{resolve_bin_path, LaunchError, Launcher};
pub use project::{find_project_spec, ProjectError, ProjectLookup, ProjectSpec};
pub use registry::{
    FetchRequest, HttpTransport, RegistryClient, RegistryError, RegistrySpec, Transport,
};
pub use resolver::{ResolveError, ResolveOptions, Resolver};
pub use semver::{Range, SemverError, Version};
pub use settings::{IntegrityKeys, Settings};
pub use signature::{Dist, KeySet, SignatureError};
pub use spec::{parse_spec, SpecError, SpecOptions};
