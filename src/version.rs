//! Semantic versions and version constraints
//!
//! Modules declare their own version as `MAJOR.MINOR.PATCH` with an optional
//! `-PRERELEASE` suffix, and constrain their dependencies with a
//! comma-separated conjunction of clauses such as `">= 1.0.0, ~> 1.2"`.
//! A constraint matches a version only if every clause matches.
//!
//! The `~>` ("compatible release") operator pins the minor series: `~> 1.2`
//! and `~> 1.2.3` both reject `1.3.0`.
//!
//! # Examples
//!
//! ```
//! use modkit::{SemanticVersion, VersionConstraint};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let version = SemanticVersion::parse("1.2.5")?;
//! let constraint = VersionConstraint::parse(">= 1.0.0, ~> 1.2")?;
//! assert!(constraint.matches(&version));
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// An immutable semantic version: `MAJOR.MINOR.PATCH` plus an optional
/// pre-release tag. A tagged version orders below the release with the
/// same numeric triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticVersion {
    major: u64,
    minor: u64,
    patch: u64,
    pre_release: Option<String>,
}

impl SemanticVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    /// Parse a version string of the form `MAJOR.MINOR.PATCH[-PRERELEASE]`.
    ///
    /// Any other shape fails with [`Error::Parse`] carrying the offending
    /// string.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (triple, pre_release) = match trimmed.split_once('-') {
            Some((triple, pre)) if !pre.is_empty() => (triple, Some(pre.to_string())),
            Some(_) => return Err(Error::Parse(format!("empty pre-release tag in '{}'", input))),
            None => (trimmed, None),
        };

        let parts: Vec<&str> = triple.split('.').collect();
        if parts.len() != 3 {
            return Err(Error::Parse(format!(
                "expected MAJOR.MINOR.PATCH, got '{}'",
                input
            )));
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::Parse(format!(
                    "non-numeric version component '{}' in '{}'",
                    part, input
                )));
            }
            *slot = part
                .parse()
                .map_err(|_| Error::Parse(format!("version component out of range in '{}'", input)))?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre_release,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn pre_release(&self) -> Option<&str> {
        self.pre_release.as_deref()
    }

    /// True iff `self` orders strictly above `other`.
    pub fn is_update_for(&self, other: &SemanticVersion) -> bool {
        self > other
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            .then_with(|| compare_pre_release(
                self.pre_release.as_deref(),
                other.pre_release.as_deref(),
            ))
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SemanticVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Standard semver precedence for pre-release tags: absence orders above
/// presence, dot-separated identifiers compare left to right, numeric
/// identifiers compare numerically and below alphanumeric ones.
fn compare_pre_release(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let mut left = a.split('.');
            let mut right = b.split('.');
            loop {
                match (left.next(), right.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some(l), Some(r)) => {
                        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                            (Ok(l), Ok(r)) => l.cmp(&r),
                            (Ok(_), Err(_)) => Ordering::Less,
                            (Err(_), Ok(_)) => Ordering::Greater,
                            (Err(_), Err(_)) => l.cmp(r),
                        };
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintOp {
    /// `=` (also the default when a clause carries no operator)
    Exact,
    /// `>=`
    AtLeast,
    /// `<=`
    AtMost,
    /// `~>` compatible release
    Compatible,
}

#[derive(Debug, Clone)]
struct ConstraintClause {
    op: ConstraintOp,
    major: u64,
    minor: u64,
    /// `~>` accepts a two-component form (`~> 1.2`); `None` means the patch
    /// level was omitted.
    patch: Option<u64>,
    pre_release: Option<String>,
}

impl ConstraintClause {
    fn parse(clause: &str) -> Result<Self> {
        let parts: Vec<&str> = clause.split_whitespace().collect();
        let (op, version) = match parts.as_slice() {
            [version] => (ConstraintOp::Exact, *version),
            [op, version] => {
                let op = match *op {
                    "=" => ConstraintOp::Exact,
                    ">=" => ConstraintOp::AtLeast,
                    "<=" => ConstraintOp::AtMost,
                    "~>" => ConstraintOp::Compatible,
                    other => {
                        return Err(Error::Parse(format!(
                            "unknown version range operator: {}",
                            other
                        )))
                    }
                };
                (op, *version)
            }
            _ => {
                return Err(Error::Parse(format!(
                    "the constraint '{}' has an illegal number of parts",
                    clause
                )))
            }
        };

        if op == ConstraintOp::Compatible {
            // Two or three numeric components, no pre-release tag.
            let parts: Vec<&str> = version.split('.').collect();
            if parts.len() < 2 || parts.len() > 3 {
                return Err(Error::Parse(format!(
                    "'~>' expects X.Y or X.Y.Z, got '{}'",
                    version
                )));
            }
            let mut numbers = Vec::with_capacity(parts.len());
            for part in &parts {
                if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                    return Err(Error::Parse(format!(
                        "non-numeric version component '{}' in '{}'",
                        part, version
                    )));
                }
                numbers.push(part.parse().map_err(|_| {
                    Error::Parse(format!("version component out of range in '{}'", version))
                })?);
            }
            return Ok(Self {
                op,
                major: numbers[0],
                minor: numbers[1],
                patch: numbers.get(2).copied(),
                pre_release: None,
            });
        }

        let version = SemanticVersion::parse(version)?;
        Ok(Self {
            op,
            major: version.major,
            minor: version.minor,
            patch: Some(version.patch),
            pre_release: version.pre_release,
        })
    }

    fn boundary(&self) -> SemanticVersion {
        SemanticVersion {
            major: self.major,
            minor: self.minor,
            patch: self.patch.unwrap_or(0),
            pre_release: self.pre_release.clone(),
        }
    }

    fn matches(&self, version: &SemanticVersion) -> bool {
        let boundary = self.boundary();
        match self.op {
            ConstraintOp::Exact => *version == boundary,
            ConstraintOp::AtLeast => *version >= boundary,
            ConstraintOp::AtMost => *version <= boundary,
            ConstraintOp::Compatible => {
                let upper = match self.minor.checked_add(1) {
                    Some(minor) => SemanticVersion::new(self.major, minor, 0),
                    None => SemanticVersion::new(self.major.saturating_add(1), 0, 0),
                };
                *version >= boundary && *version < upper
            }
        }
    }
}

/// A conjunction of constraint clauses, parsed once from its textual form.
///
/// The string `">= 1.0.0, <= 2.0.0"` matches any version in that inclusive
/// range; every clause must hold for the constraint to match.
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    raw: String,
    clauses: Vec<ConstraintClause>,
}

impl VersionConstraint {
    pub fn parse(input: &str) -> Result<Self> {
        let mut clauses = Vec::new();
        for clause in input.split(',') {
            clauses.push(ConstraintClause::parse(clause)?);
        }
        Ok(Self {
            raw: input.to_string(),
            clauses,
        })
    }

    /// True iff every clause matches; false as soon as one fails.
    pub fn matches(&self, version: &SemanticVersion) -> bool {
        for clause in &self.clauses {
            if !clause.matches(version) {
                return false;
            }
        }
        true
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for VersionConstraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
