//! Package manager spec parsing (`name@range`)

use crate::descriptor::{is_url, Descriptor, PackageManagerId};
use crate::semver::{Range, Version};
use thiserror::Error;

/// Errors that can occur while parsing a spec string
#[derive(Debug, Error, PartialEq)]
pub enum SpecError {
    /// Malformed spec
    #[error("Invalid package manager specification in {source_label} ({raw}); {reason}")]
    InvalidSpec {
        raw: String,
        source_label: String,
        reason: String,
    },

    /// Name outside the supported set
    #[error("Unsupported package manager specification ({0})")]
    UnsupportedPackageManager(String),

    /// URL range for a well-known package manager without opt-in
    #[error(
        "Illegal use of URL for known package manager ({0}). Set COREPIN_ENABLE_UNSAFE_CUSTOM_URLS=1 to allow it"
    )]
    UnsafeCustomUrl(String),
}

/// Parsing options
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecOptions {
    /// Require an exact version (manifest pins)
    pub enforce_exact_version: bool,

    /// Allow URL ranges for known package managers
    pub unsafe_custom_urls: bool,
}

/// Parse `raw` into a descriptor
///
/// `source` names where the string came from and only feeds error messages.
pub fn parse_spec(raw: &str, source: &str, options: SpecOptions) -> Result<Descriptor, SpecError> {
    let raw = raw.trim();
    let invalid = |reason: &str| SpecError::InvalidSpec {
        raw: raw.to_string(),
        source_label: source.to_string(),
        reason: reason.to_string(),
    };

    let at = raw
        .rfind('@')
        .filter(|&i| i > 0 && i + 1 < raw.len());

    let Some(at) = at else {
        if options.enforce_exact_version {
            return Err(invalid("expected a semver version"));
        }
        if raw.is_empty() {
            return Err(invalid("expected a package manager name"));
        }
        return check_name(Descriptor::new(raw, "*"));
    };

    let (name, range) = (&raw[..at], &raw[at + 1..]);

    if is_url(range) {
        if PackageManagerId::is_known(name) && !options.unsafe_custom_urls {
            return Err(SpecError::UnsafeCustomUrl(raw.to_string()));
        }
        return Ok(Descriptor::new(name, range));
    }

    if options.enforce_exact_version && !Version::is_valid(range) {
        return Err(invalid("expected a semver version"));
    }
    if !Version::is_valid(range) && !Range::is_valid(range) && !is_tag(range) {
        return Err(invalid("expected a semver range or a tag"));
    }

    check_name(Descriptor::new(name, range))
}

fn check_name(descriptor: Descriptor) -> Result<Descriptor, SpecError> {
    if descriptor.id().is_none() {
        return Err(SpecError::UnsupportedPackageManager(descriptor.to_string()));
    }
    Ok(descriptor)
}

/// Tags are plain words (`latest`, `stable`, `canary-2`)
fn is_tag(range: &str) -> bool {
    !range.is_empty()
        && range
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact() -> SpecOptions {
        SpecOptions {
            enforce_exact_version: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_exact() {
        let d = parse_spec("yarn@1.22.4", "package.json", exact()).unwrap();
        assert_eq!(d.name(), "yarn");
        assert_eq!(d.range(), "1.22.4");
    }

    #[test]
    fn test_parse_with_integrity() {
        let d = parse_spec("pnpm@9.1.0+sha512.deadbeef", "package.json", exact()).unwrap();
        assert_eq!(d.range(), "9.1.0+sha512.deadbeef");
    }

    #[test]
    fn test_splits_on_last_at() {
        // Leading @ is never a separator
        let err = parse_spec("@scope/pm@1.0.0", "cli", SpecOptions::default()).unwrap_err();
        assert_eq!(
            err,
            SpecError::UnsupportedPackageManager("@scope/pm@1.0.0".to_string())
        );
    }

    #[test]
    fn test_bare_name() {
        let d = parse_spec("pnpm", "cli", SpecOptions::default()).unwrap();
        assert_eq!(d.range(), "*");

        // A trailing @ is not a separator, so the whole string is the name
        assert_eq!(
            parse_spec("pnpm@", "cli", SpecOptions::default()),
            Err(SpecError::UnsupportedPackageManager("pnpm@@*".to_string()))
        );
    }

    #[test]
    fn test_bare_name_rejected_when_exact() {
        let err = parse_spec("yarn", "package.json", exact()).unwrap_err();
        assert!(matches!(err, SpecError::InvalidSpec { .. }));
    }

    #[test]
    fn test_ranges_and_tags() {
        assert_eq!(
            parse_spec("yarn@^1.22.0", "cli", SpecOptions::default()).unwrap().range(),
            "^1.22.0"
        );
        assert_eq!(
            parse_spec("yarn@stable", "cli", SpecOptions::default()).unwrap().range(),
            "stable"
        );
        assert!(matches!(
            parse_spec("yarn@^1.22.0", "package.json", exact()),
            Err(SpecError::InvalidSpec { .. })
        ));
        assert!(matches!(
            parse_spec("yarn@stable", "package.json", exact()),
            Err(SpecError::InvalidSpec { .. })
        ));
        assert!(matches!(
            parse_spec("yarn@>= bogus <", "cli", SpecOptions::default()),
            Err(SpecError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_unsupported_name() {
        assert_eq!(
            parse_spec("bun@1.0.0", "cli", SpecOptions::default()),
            Err(SpecError::UnsupportedPackageManager("bun@1.0.0".to_string()))
        );
    }

    #[test]
    fn test_url_ranges() {
        let url = "https://example.com/yarn-4.0.0.tgz";

        assert_eq!(
            parse_spec(&format!("yarn@{}", url), "cli", SpecOptions::default()),
            Err(SpecError::UnsafeCustomUrl(format!("yarn@{}", url)))
        );

        let unsafe_ok = SpecOptions {
            unsafe_custom_urls: true,
            ..Default::default()
        };
        let d = parse_spec(&format!("yarn@{}", url), "cli", unsafe_ok).unwrap();
        assert!(d.is_url());

        // Custom package managers may always come from a URL
        let custom = parse_spec(&format!("mypm@{}", url), "cli", exact()).unwrap();
        assert_eq!(custom.name(), "mypm");
        assert_eq!(custom.range(), url);
    }
}
