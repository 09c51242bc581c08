//! Runtime settings
//!
//! Built once per invocation from `COREPIN_*` environment variables (plus the
//! project's env overlay file) and passed explicitly to every operation.

use crate::registry::Auth;
use std::collections::HashMap;
use std::path::PathBuf;

/// Prefix of every variable the broker reads
pub const ENV_PREFIX: &str = "COREPIN_";

/// Variable exposing the broker's own install directory to launched tools
pub const ROOT_ENV: &str = "COREPIN_ROOT";

/// Default name of the per-project overlay file
pub const DEFAULT_ENV_FILE: &str = ".corepin.env";

/// Where npm registry signing keys come from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IntegrityKeys {
    /// Fetch `<registry>/-/npm/v1/keys` on first use
    #[default]
    Registry,

    /// Skip signature checks
    Disabled,

    /// Inline JSON key set
    Inline(String),
}

/// Explicit configuration for one broker invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Cache root holding installs and the last-known-good record
    pub install_root: PathBuf,

    /// `COREPIN_ENABLE_NETWORK=0` refuses every remote request
    pub network_enabled: bool,

    /// Require an embedded digest on every installed reference
    pub strict_integrity: bool,

    /// Allow URL ranges for the well-known package managers
    pub unsafe_custom_urls: bool,

    /// Fail when the project pins a different package manager
    pub strict_project: bool,

    /// Resolve the latest release when no project spec or record exists
    pub default_to_latest: bool,

    /// npm registry override
    pub npm_registry: Option<String>,

    /// npm registry credentials
    pub npm_auth: Option<Auth>,

    /// Interpreter used to run package manager entry points
    pub interpreter: String,

    /// Spawn a child process instead of replacing the current one
    pub force_spawn: bool,

    /// Overlay file name; `None` disables overlays
    pub env_file: Option<String>,

    /// Keys checked against npm registry signatures
    pub integrity_keys: IntegrityKeys,
}

impl Settings {
    /// Settings from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Settings from explicit variables
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        let get = |key: &str| vars.get(key).map(String::as_str).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| match get(key) {
            Some("0") | Some("false") => false,
            Some(_) => true,
            None => default,
        };

        let npm_auth = match (
            get("COREPIN_NPM_TOKEN"),
            get("COREPIN_NPM_USERNAME"),
            get("COREPIN_NPM_PASSWORD"),
        ) {
            (Some(token), _, _) => Some(Auth::Bearer(token.to_string())),
            (None, Some(username), Some(password)) => Some(Auth::Basic {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => None,
        };

        let env_file = match get("COREPIN_ENV_FILE") {
            Some("0") => None,
            Some(name) => Some(name.to_string()),
            None => Some(DEFAULT_ENV_FILE.to_string()),
        };

        // An empty value disables checks, so read it unfiltered
        let integrity_keys = match vars.get("COREPIN_INTEGRITY_KEYS").map(String::as_str) {
            None => IntegrityKeys::Registry,
            Some("") | Some("0") => IntegrityKeys::Disabled,
            Some(json) => IntegrityKeys::Inline(json.to_string()),
        };

        Settings {
            install_root: get("COREPIN_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(default_install_root),
            network_enabled: flag("COREPIN_ENABLE_NETWORK", true),
            strict_integrity: flag("COREPIN_INTEGRITY_STRICT", false),
            unsafe_custom_urls: flag("COREPIN_ENABLE_UNSAFE_CUSTOM_URLS", false),
            strict_project: flag("COREPIN_ENABLE_STRICT", true),
            default_to_latest: flag("COREPIN_DEFAULT_TO_LATEST", true),
            npm_registry: get("COREPIN_NPM_REGISTRY").map(str::to_string),
            npm_auth,
            interpreter: get("COREPIN_NODE").unwrap_or("node").to_string(),
            force_spawn: flag("COREPIN_SPAWN", false),
            env_file,
            integrity_keys,
        }
    }

    /// Rebuild settings with an overlay merged under the real environment
    ///
    /// Variables already present in `real` win over the overlay.
    pub fn with_overlay<I>(real: I, overlay: &HashMap<String, String>) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut merged: HashMap<String, String> = overlay
            .iter()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        merged.extend(real);
        Self::from_vars(merged)
    }

    /// Settings rooted at `install_root` with defaults everywhere else
    pub fn with_install_root(install_root: impl Into<PathBuf>) -> Self {
        let mut settings = Self::from_vars(std::iter::empty::<(String, String)>());
        settings.install_root = install_root.into();
        settings
    }
}

/// `<user cache dir>/corepin`, falling back to `~/.cache/corepin`
fn default_install_root() -> PathBuf {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("corepin")
}
