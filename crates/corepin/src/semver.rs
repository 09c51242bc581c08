//! Semantic versioning parser and npm-style range matching
//!
//! Provides version parsing, precedence ordering and the range grammar used by
//! package manager declarations (`^1.2.3`, `>=6.0.0 <9`, `1.22.x`, `1 - 2`,
//! `a || b`).

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during semver parsing
#[derive(Debug, Error, PartialEq)]
pub enum SemverError {
    /// Invalid version format
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    /// Invalid range format
    #[error("Invalid range format: {0}")]
    InvalidRange(String),

    /// Invalid pre-release tag
    #[error("Invalid pre-release tag: {0}")]
    InvalidPrerelease(String),
}

/// Semantic version (MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD])
///
/// Equality and ordering ignore build metadata, as semver precedence does.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Vec<Identifier>,
    pub build: Option<String>,
}

/// A single dot-separated pre-release identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Numeric(u64),
    AlphaNumeric(String),
}

impl Identifier {
    fn parse(s: &str) -> Result<Self, SemverError> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(SemverError::InvalidPrerelease(s.to_string()));
        }
        if s.chars().all(|c| c.is_ascii_digit()) {
            let n = s
                .parse()
                .map_err(|_| SemverError::InvalidPrerelease(s.to_string()))?;
            return Ok(Identifier::Numeric(n));
        }
        Ok(Identifier::AlphaNumeric(s.to_string()))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            (Identifier::Numeric(_), Identifier::AlphaNumeric(_)) => Ordering::Less,
            (Identifier::AlphaNumeric(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::AlphaNumeric(a), Identifier::AlphaNumeric(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{}", n),
            Identifier::AlphaNumeric(s) => write!(f, "{}", s),
        }
    }
}

impl Version {
    /// Parse a version string
    ///
    /// A leading `v` or `=` is tolerated, matching what registries publish.
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let s = s.trim();
        let s = s.strip_prefix('=').unwrap_or(s);
        let s = s.strip_prefix('v').unwrap_or(s);

        // Split by + to separate build metadata
        let (version_part, build) = match s.split_once('+') {
            Some((v, b)) => {
                if b.is_empty()
                    || !b
                        .split('.')
                        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
                {
                    return Err(SemverError::InvalidVersion(format!(
                        "Invalid build metadata in '{}'",
                        s
                    )));
                }
                (v, Some(b.to_string()))
            }
            None => (s, None),
        };

        // Split by - to separate prerelease
        let (core_version, prerelease) = match version_part.split_once('-') {
            Some((v, p)) => {
                let ids = p
                    .split('.')
                    .map(Identifier::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                (v, ids)
            }
            None => (version_part, Vec::new()),
        };

        let parts: Vec<&str> = core_version.split('.').collect();
        if parts.len() != 3 {
            return Err(SemverError::InvalidVersion(format!(
                "Expected MAJOR.MINOR.PATCH, got '{}'",
                s
            )));
        }

        let number = |part: &str, what: &str| -> Result<u64, SemverError> {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(SemverError::InvalidVersion(format!(
                    "Invalid {} version: {}",
                    what, part
                )));
            }
            part.parse()
                .map_err(|_| SemverError::InvalidVersion(format!("Invalid {} version: {}", what, part)))
        };

        Ok(Version {
            major: number(parts[0], "major")?,
            minor: number(parts[1], "minor")?,
            patch: number(parts[2], "patch")?,
            prerelease,
            build,
        })
    }

    /// Create a new version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            prerelease: Vec::new(),
            build: None,
        }
    }

    /// Lowest possible pre-release of a version tuple (`X.Y.Z-0`)
    fn floor(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            prerelease: vec![Identifier::Numeric(0)],
            ..Version::new(major, minor, patch)
        }
    }

    /// Check if this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    /// Whether two versions share MAJOR.MINOR.PATCH
    pub fn same_tuple(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor && self.patch == other.patch
    }

    /// The bare `MAJOR.MINOR.PATCH` tuple
    pub fn release(&self) -> Version {
        Version::new(self.major, self.minor, self.patch)
    }

    /// Check whether a string is a valid exact version
    pub fn is_valid(s: &str) -> bool {
        Version::parse(s).is_ok()
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            let pre: Vec<String> = self.prerelease.iter().map(|id| id.to_string()).collect();
            write!(f, "-{}", pre.join("."))?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.major.cmp(&other.major) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match self.minor.cmp(&other.minor) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match self.patch.cmp(&other.patch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Versions with prerelease are less than without
        match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
            (true, true) => Ordering::Equal,
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, false) => self.prerelease.cmp(&other.prerelease),
        }
    }
}

/// Comparison operator of a primitive comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Primitive comparator (`>=1.2.3`)
#[derive(Debug, Clone, PartialEq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Comparator { op, version }
    }

    fn matches(&self, version: &Version) -> bool {
        let ord = version.cmp(&self.version);
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Op::Eq => "",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        };
        write!(f, "{}{}", op, self.version)
    }
}

/// Version range: a union (`||`) of comparator sets
///
/// An empty comparator set matches every version. A set containing
/// `None` (from `<0.0.0-0` style impossible bounds) matches nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    sets: Vec<Option<Vec<Comparator>>>,
    raw: String,
}

/// Partially specified version (`1`, `1.2`, `1.x`, `*`)
#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    prerelease: Vec<Identifier>,
}

impl Partial {
    fn parse(s: &str) -> Result<Self, SemverError> {
        let s = s.strip_prefix('v').unwrap_or(s);
        let s = match s.split_once('+') {
            Some((v, _)) => v,
            None => s,
        };
        let (core, prerelease) = match s.split_once('-') {
            Some((v, p)) => (
                v,
                p.split('.')
                    .map(Identifier::parse)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => (s, Vec::new()),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(SemverError::InvalidRange(s.to_string()));
        }

        let mut numbers = [None, None, None];
        let mut wildcard_seen = false;
        for (i, part) in parts.iter().enumerate() {
            if matches!(*part, "x" | "X" | "*") {
                wildcard_seen = true;
                continue;
            }
            if wildcard_seen || part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(SemverError::InvalidRange(s.to_string()));
            }
            numbers[i] = Some(
                part.parse()
                    .map_err(|_| SemverError::InvalidRange(s.to_string()))?,
            );
        }

        if !prerelease.is_empty() && numbers[2].is_none() {
            return Err(SemverError::InvalidRange(s.to_string()));
        }

        Ok(Partial {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            prerelease,
        })
    }

    fn is_any(&self) -> bool {
        self.major.is_none()
    }

    fn to_version(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            prerelease: self.prerelease.clone(),
            build: None,
        }
    }

    /// Exclusive upper bound of an x-range (`1.2` → `<1.3.0-0`)
    fn upper(&self) -> Result<Option<Version>, SemverError> {
        Ok(match (self.major, self.minor, self.patch) {
            (Some(major), None, _) => Some(Version::floor(bump(major)?, 0, 0)),
            (Some(major), Some(minor), None) => Some(Version::floor(major, bump(minor)?, 0)),
            _ => None,
        })
    }
}

/// Next number for an exclusive bound
fn bump(n: u64) -> Result<u64, SemverError> {
    n.checked_add(1)
        .ok_or_else(|| SemverError::InvalidRange(format!("{} has no successor", n)))
}

impl Range {
    /// Parse an npm-style range string
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let raw = s.trim();
        let mut sets = Vec::new();
        for part in raw.split("||") {
            sets.push(Self::parse_set(part.trim())?);
        }
        Ok(Range {
            sets,
            raw: raw.to_string(),
        })
    }

    /// Check whether a string is a valid range (exact versions included)
    pub fn is_valid(s: &str) -> bool {
        Range::parse(s).is_ok()
    }

    fn parse_set(s: &str) -> Result<Option<Vec<Comparator>>, SemverError> {
        if s.is_empty() {
            return Ok(Some(Vec::new()));
        }

        // Hyphen range: `A - B`
        if let Some((lo, hi)) = s.split_once(" - ") {
            let lo = Partial::parse(lo.trim())?;
            let hi = Partial::parse(hi.trim())?;
            let mut out = Vec::new();
            if !lo.is_any() {
                out.push(Comparator::new(Op::Ge, lo.to_version()));
            }
            if !hi.is_any() {
                match hi.upper()? {
                    Some(upper) => out.push(Comparator::new(Op::Lt, upper)),
                    None => out.push(Comparator::new(Op::Le, hi.to_version())),
                }
            }
            return Ok(Some(out));
        }

        let mut tokens: Vec<String> = Vec::new();
        let mut pending_op: Option<String> = None;
        for word in s.split_whitespace() {
            if matches!(word, ">" | ">=" | "<" | "<=" | "=" | "^" | "~" | "~>") {
                pending_op = Some(word.to_string());
                continue;
            }
            match pending_op.take() {
                Some(op) => tokens.push(format!("{}{}", op, word)),
                None => tokens.push(word.to_string()),
            }
        }
        if let Some(op) = pending_op {
            return Err(SemverError::InvalidRange(format!("dangling operator '{}'", op)));
        }

        let mut out = Vec::new();
        for token in &tokens {
            match Self::desugar(token)? {
                Some(comparators) => out.extend(comparators),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    /// Expand one token into primitive comparators; `None` means unsatisfiable.
    fn desugar(token: &str) -> Result<Option<Vec<Comparator>>, SemverError> {
        let (op, rest) = ["~>", ">=", "<=", ">", "<", "=", "^", "~"]
            .iter()
            .find_map(|op| token.strip_prefix(op).map(|rest| (*op, rest)))
            .unwrap_or(("", token));
        let p = Partial::parse(rest)?;

        let comparators = match op {
            "^" => {
                if p.is_any() {
                    vec![]
                } else {
                    let lower = Comparator::new(Op::Ge, p.to_version());
                    let upper = match (p.major, p.minor, p.patch) {
                        (Some(0), Some(0), Some(patch)) => Version::floor(0, 0, bump(patch)?),
                        (Some(0), Some(minor), _) => Version::floor(0, bump(minor)?, 0),
                        (Some(major), _, _) => Version::floor(bump(major)?, 0, 0),
                        _ => unreachable!(),
                    };
                    vec![lower, Comparator::new(Op::Lt, upper)]
                }
            }
            "~" | "~>" => {
                if p.is_any() {
                    vec![]
                } else {
                    let lower = Comparator::new(Op::Ge, p.to_version());
                    let upper = match (p.major, p.minor) {
                        (Some(major), Some(minor)) => Version::floor(major, bump(minor)?, 0),
                        (Some(major), None) => Version::floor(bump(major)?, 0, 0),
                        _ => unreachable!(),
                    };
                    vec![lower, Comparator::new(Op::Lt, upper)]
                }
            }
            ">" => {
                if p.is_any() {
                    return Ok(None);
                }
                match (p.major, p.minor, p.patch) {
                    (Some(major), None, _) => {
                        vec![Comparator::new(Op::Ge, Version::new(bump(major)?, 0, 0))]
                    }
                    (Some(major), Some(minor), None) => {
                        vec![Comparator::new(Op::Ge, Version::new(major, bump(minor)?, 0))]
                    }
                    _ => vec![Comparator::new(Op::Gt, p.to_version())],
                }
            }
            ">=" => {
                if p.is_any() {
                    vec![]
                } else {
                    vec![Comparator::new(Op::Ge, p.to_version())]
                }
            }
            "<" => {
                if p.is_any() {
                    return Ok(None);
                }
                match p.patch {
                    Some(_) => vec![Comparator::new(Op::Lt, p.to_version())],
                    None => vec![Comparator::new(
                        Op::Lt,
                        Version::floor(p.major.unwrap_or(0), p.minor.unwrap_or(0), 0),
                    )],
                }
            }
            "<=" => {
                if p.is_any() {
                    vec![]
                } else {
                    match p.upper()? {
                        Some(upper) => vec![Comparator::new(Op::Lt, upper)],
                        None => vec![Comparator::new(Op::Le, p.to_version())],
                    }
                }
            }
            _ => {
                if p.is_any() {
                    vec![]
                } else {
                    match p.upper()? {
                        Some(upper) => vec![
                            Comparator::new(Op::Ge, p.to_version()),
                            Comparator::new(Op::Lt, upper),
                        ],
                        None => vec![Comparator::new(Op::Eq, p.to_version())],
                    }
                }
            }
        };
        Ok(Some(comparators))
    }

    /// Check if a version satisfies this range
    ///
    /// With `include_prerelease` unset, a prerelease only matches when some
    /// comparator of the same set names a prerelease of the same tuple.
    pub fn matches(&self, version: &Version, include_prerelease: bool) -> bool {
        self.sets.iter().any(|set| match set {
            None => false,
            Some(comparators) => {
                if !comparators.iter().all(|c| c.matches(version)) {
                    return false;
                }
                if !version.is_prerelease() || include_prerelease {
                    return true;
                }
                comparators
                    .iter()
                    .any(|c| c.version.is_prerelease() && c.version.same_tuple(version) && !is_floor(&c.version))
            }
        })
    }

    /// Check a version by its release tuple alone
    ///
    /// Prerelease tags are dropped from the version and from every bound, so
    /// `4.1.0-rc.1` is reachable from `^4.0.0` while `5.0.0-rc.1` is not.
    pub fn matches_release(&self, version: &Version) -> bool {
        let release = version.release();
        self.sets.iter().any(|set| match set {
            None => false,
            Some(comparators) => comparators
                .iter()
                .all(|c| Comparator::new(c.op, c.version.release()).matches(&release)),
        })
    }

    /// Highest version satisfying the range
    pub fn max_satisfying<'a, I>(&self, versions: I, include_prerelease: bool) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions
            .into_iter()
            .filter(|v| self.matches(v, include_prerelease))
            .max()
    }
}

/// Synthetic `X.Y.Z-0` bounds never opt a range into prereleases.
fn is_floor(version: &Version) -> bool {
    version.prerelease.len() == 1 && version.prerelease[0] == Identifier::Numeric(0)
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Parse a version string only if it satisfies `range`
///
/// Convenience for filtering raw registry listings.
pub fn satisfies(version: &str, range: &Range, include_prerelease: bool) -> bool {
    Version::parse(version)
        .map(|v| range.matches(&v, include_prerelease))
        .unwrap_or(false)
}

/// Like [`satisfies`], but prereleases count as their release tuple
pub fn satisfies_release(version: &str, range: &Range) -> bool {
    Version::parse(version)
        .map(|v| range.matches_release(&v))
        .unwrap_or(false)
}
