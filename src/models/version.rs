//! Mod versions and the version predicates used by dependency and
//! incompatibility declarations.

use crate::models::error::SError;
use semver::{BuildMetadata, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Parses a mod version. Accepts strict semver as well as the dotted
/// numeric forms managed assemblies use (`1`, `1.2`, `1.2.3`, `1.2.3.4`);
/// missing components are zero and a fourth component is kept as build
/// metadata.
pub fn parse_version(input: &str) -> Result<Version, SError> {
    let trimmed = input.trim();
    if let Ok(v) = Version::parse(trimmed) {
        return Ok(v);
    }

    let parts = trimmed
        .split('.')
        .map(|p| p.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| SError::InvalidVersion(input.to_string()))?;

    let (major, minor, patch, revision) = match parts.as_slice() {
        [a] => (*a, 0, 0, None),
        [a, b] => (*a, *b, 0, None),
        [a, b, c] => (*a, *b, *c, None),
        [a, b, c, d] => (*a, *b, *c, Some(*d)),
        _ => return Err(SError::InvalidVersion(input.to_string())),
    };

    let mut version = Version::new(major, minor, patch);
    if let Some(revision) = revision.filter(|r| *r != 0) {
        version.build = BuildMetadata::new(&revision.to_string())
            .map_err(|_| SError::InvalidVersion(input.to_string()))?;
    }
    Ok(version)
}

/// `[major, minor, patch, revision]`, revision taken from numeric build metadata.
fn components(version: &Version) -> [u64; 4] {
    let revision = version.build.as_str().parse().unwrap_or(0);
    [version.major, version.minor, version.patch, revision]
}

pub fn serialize_version<S: Serializer>(version: &Version, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(version)
}

pub fn deserialize_version<'de, D: Deserializer<'de>>(d: D) -> Result<Version, D::Error> {
    let raw = String::deserialize(d)?;
    parse_version(&raw).map_err(serde::de::Error::custom)
}

/// A dotted version where any component may be `*`. Everything from the
/// first wildcard on matches any value; omitted trailing components are 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionPattern {
    components: Vec<Option<u64>>,
}

impl VersionPattern {
    pub fn parse(input: &str) -> Result<Self, SError> {
        let input = input.trim();
        if input == "*" {
            return Ok(Self { components: vec![None] });
        }

        let components = input
            .split('.')
            .map(|p| match p {
                "*" | "x" | "X" => Ok(None),
                n => n.parse::<u64>().map(Some),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SError::InvalidVersion(input.to_string()))?;

        if components.is_empty() || components.len() > 4 {
            return Err(SError::InvalidVersion(input.to_string()));
        }
        Ok(Self { components })
    }

    /// Compares `version` against this pattern, component by component.
    pub fn compare(&self, version: &Version) -> Ordering {
        let actual = components(version);
        for (index, value) in actual.iter().enumerate() {
            let expected = match self.components.get(index) {
                Some(None) => return Ordering::Equal,
                Some(Some(n)) => *n,
                None => 0,
            };
            match value.cmp(&expected) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for VersionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .components
            .iter()
            .map(|c| c.map_or_else(|| "*".to_string(), |n| n.to_string()))
            .collect();
        f.write_str(&parts.join("."))
    }
}

/// One version predicate of a mod reference.
///
/// Textual forms: `1.2.3` or `=1.2.*` (exact), `<1.2` / `<=1.2` (less than),
/// `>1.0` / `>=1.0` (greater than), `[1.0,2.0)` (range, brackets inclusive,
/// parentheses exclusive).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionRequirement {
    Exact(VersionPattern),
    LessThan {
        bound: VersionPattern,
        inclusive: bool,
    },
    GreaterThan {
        bound: VersionPattern,
        inclusive: bool,
    },
    Range {
        min: VersionPattern,
        min_inclusive: bool,
        max: VersionPattern,
        max_inclusive: bool,
    },
}

impl VersionRequirement {
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionRequirement::Exact(pattern) => pattern.compare(version) == Ordering::Equal,
            VersionRequirement::LessThan { bound, inclusive } => {
                below(bound.compare(version), *inclusive)
            }
            VersionRequirement::GreaterThan { bound, inclusive } => {
                above(bound.compare(version), *inclusive)
            }
            VersionRequirement::Range {
                min,
                min_inclusive,
                max,
                max_inclusive,
            } => {
                above(min.compare(version), *min_inclusive)
                    && below(max.compare(version), *max_inclusive)
            }
        }
    }

    pub fn parse(input: &str) -> Result<Self, SError> {
        let s = input.trim();
        let invalid = || SError::InvalidVersion(input.to_string());

        if let Some(open) = s.chars().next().filter(|c| *c == '[' || *c == '(') {
            let close = s.chars().last().filter(|c| *c == ']' || *c == ')').ok_or_else(invalid)?;
            let body = &s[1..s.len() - 1];
            let (min, max) = body.split_once(',').ok_or_else(invalid)?;
            return Ok(VersionRequirement::Range {
                min: VersionPattern::parse(min)?,
                min_inclusive: open == '[',
                max: VersionPattern::parse(max)?,
                max_inclusive: close == ']',
            });
        }

        let requirement = if let Some(rest) = s.strip_prefix("<=") {
            VersionRequirement::LessThan { bound: VersionPattern::parse(rest)?, inclusive: true }
        } else if let Some(rest) = s.strip_prefix('<') {
            VersionRequirement::LessThan { bound: VersionPattern::parse(rest)?, inclusive: false }
        } else if let Some(rest) = s.strip_prefix(">=") {
            VersionRequirement::GreaterThan { bound: VersionPattern::parse(rest)?, inclusive: true }
        } else if let Some(rest) = s.strip_prefix('>') {
            VersionRequirement::GreaterThan { bound: VersionPattern::parse(rest)?, inclusive: false }
        } else {
            VersionRequirement::Exact(VersionPattern::parse(s.strip_prefix('=').unwrap_or(s))?)
        };
        Ok(requirement)
    }
}

// `cmp` is version-vs-bound.
fn below(cmp: Ordering, inclusive: bool) -> bool {
    cmp == Ordering::Less || (inclusive && cmp == Ordering::Equal)
}

fn above(cmp: Ordering, inclusive: bool) -> bool {
    cmp == Ordering::Greater || (inclusive && cmp == Ordering::Equal)
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRequirement::Exact(p) => write!(f, "{p}"),
            VersionRequirement::LessThan { bound, inclusive } => {
                write!(f, "<{}{bound}", if *inclusive { "=" } else { "" })
            }
            VersionRequirement::GreaterThan { bound, inclusive } => {
                write!(f, ">{}{bound}", if *inclusive { "=" } else { "" })
            }
            VersionRequirement::Range { min, min_inclusive, max, max_inclusive } => write!(
                f,
                "{}{min},{max}{}",
                if *min_inclusive { '[' } else { '(' },
                if *max_inclusive { ']' } else { ')' }
            ),
        }
    }
}

impl TryFrom<String> for VersionRequirement {
    type Error = SError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionRequirement> for String {
    fn from(value: VersionRequirement) -> Self {
        value.to_string()
    }
}
