//! Protocol versions and version negotiation.
//!
//! Every peer advertises the list of protocol generations it can still
//! speak. A list holds at most one entry per major version, sorted by
//! major, so negotiation only has to look at the majors both sides share
//! and pick the greatest one.

use std::fmt;
use std::str::FromStr;

use crate::error::FormatError;

/// A single protocol version.
///
/// Majors break compatibility, minors are additive. Two versions with the
/// same major can always talk using the lower of the two minors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RpcVersion {
    major: u64,
    minor: u64,
}

impl RpcVersion {
    /// Creates a version. Fails if `major` is 0.
    pub fn new(major: u64, minor: u64) -> Result<Self, FormatError> {
        if major == 0 {
            return Err(FormatError::ZeroMajor {
                version: format!("{major}.{minor}"),
            });
        }
        Ok(Self { major, minor })
    }

    /// Returns the major version.
    pub fn major(&self) -> u64 {
        self.major
    }

    /// Returns the minor version.
    pub fn minor(&self) -> u64 {
        self.minor
    }

    /// Parses `major.minor`.
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        let invalid = |reason| FormatError::InvalidVersion {
            input: input.to_string(),
            reason,
        };

        let mut parts = input.split('.');
        let (Some(major), Some(minor), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected exactly two dot-separated numbers"));
        };

        let major: u64 = parse_number(major).ok_or_else(|| invalid("major is not a number"))?;
        let minor: u64 = parse_number(minor).ok_or_else(|| invalid("minor is not a number"))?;

        Self::new(major, minor)
    }

    /// Returns the version both sides can use, if any.
    ///
    /// Versions with different majors are incompatible. Otherwise the one
    /// with the lower minor wins.
    pub fn is_compatible_with(&self, other: &RpcVersion) -> Option<RpcVersion> {
        if self.major != other.major {
            return None;
        }
        if self.minor <= other.minor {
            Some(*self)
        } else {
            Some(*other)
        }
    }
}

// `u64::from_str` accepts a leading '+', the wire format does not.
fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for RpcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for RpcVersion {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The set of protocol versions one peer supports.
///
/// Always non-empty, with strictly ascending majors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpcVersionList {
    versions: Vec<RpcVersion>,
}

impl RpcVersionList {
    /// Creates a list, validating it.
    pub fn new(versions: Vec<RpcVersion>) -> Result<Self, FormatError> {
        validate(&versions)?;
        Ok(Self { versions })
    }

    /// The versions spoken by this build.
    pub fn current() -> Self {
        Self {
            versions: vec![RpcVersion { major: 1, minor: 0 }],
        }
    }

    /// Parses a comma-separated list such as `1.2,2.0`.
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        if input.is_empty() {
            return Err(FormatError::EmptyVersionList);
        }
        let versions = input
            .split(',')
            .map(RpcVersion::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(versions)
    }

    /// Checks the list invariants again.
    ///
    /// A constructed list is always valid; this exists for callers that
    /// want to assert it explicitly.
    pub fn validate(&self) -> Result<(), FormatError> {
        validate(&self.versions)
    }

    /// Returns the versions in ascending major order.
    pub fn versions(&self) -> &[RpcVersion] {
        &self.versions
    }

    /// Returns the newest version this list can share with `other`.
    ///
    /// Among all majors present in both lists the greatest one wins; the
    /// result is that pair's compatible version. Returns `None` when no
    /// major overlaps.
    pub fn is_compatible_with(&self, other: &RpcVersionList) -> Option<RpcVersion> {
        let mut best: Option<RpcVersion> = None;
        let (mut i, mut j) = (0, 0);
        while i < self.versions.len() && j < other.versions.len() {
            let (a, b) = (&self.versions[i], &other.versions[j]);
            match a.major.cmp(&b.major) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    best = a.is_compatible_with(b);
                    i += 1;
                    j += 1;
                }
            }
        }
        best
    }
}

fn validate(versions: &[RpcVersion]) -> Result<(), FormatError> {
    if versions.is_empty() {
        return Err(FormatError::EmptyVersionList);
    }

    let mut previous: Option<u64> = None;
    for version in versions {
        if version.major == 0 {
            return Err(FormatError::ZeroMajor {
                version: version.to_string(),
            });
        }
        if let Some(previous) = previous {
            if version.major == previous {
                return Err(FormatError::DuplicateMajor {
                    major: version.major,
                });
            }
            if version.major < previous {
                return Err(FormatError::UnsortedMajors {
                    previous,
                    next: version.major,
                });
            }
        }
        previous = Some(version.major);
    }

    Ok(())
}

impl fmt::Display for RpcVersionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, version) in self.versions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{version}")?;
        }
        Ok(())
    }
}

impl FromStr for RpcVersionList {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(major: u64, minor: u64) -> RpcVersion {
        RpcVersion::new(major, minor).unwrap()
    }

    fn list(s: &str) -> RpcVersionList {
        RpcVersionList::parse(s).unwrap()
    }

    #[test]
    fn parse_version() {
        assert_eq!(RpcVersion::parse("1.0").unwrap(), v(1, 0));
        assert_eq!(RpcVersion::parse("12.34").unwrap(), v(12, 34));
        assert_eq!("3.1".parse::<RpcVersion>().unwrap(), v(3, 1));
    }

    #[test]
    fn parse_version_rejects_malformed() {
        for input in ["", "1", "1.", ".1", "1.2.3", "a.b", "1.x", "+1.0", "1. 0", "-1.0"] {
            assert!(
                matches!(
                    RpcVersion::parse(input),
                    Err(FormatError::InvalidVersion { .. })
                ),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn parse_version_rejects_zero_major() {
        assert_eq!(
            RpcVersion::parse("0.5").unwrap_err(),
            FormatError::ZeroMajor {
                version: "0.5".to_string()
            }
        );
        assert!(RpcVersion::new(0, 1).is_err());
    }

    #[test]
    fn version_roundtrip() {
        for version in [v(1, 0), v(2, 7), v(10, 100)] {
            assert_eq!(RpcVersion::parse(&version.to_string()).unwrap(), version);
        }
    }

    #[test]
    fn version_compatibility() {
        assert_eq!(v(1, 2).is_compatible_with(&v(1, 5)), Some(v(1, 2)));
        assert_eq!(v(1, 5).is_compatible_with(&v(1, 2)), Some(v(1, 2)));
        assert_eq!(v(1, 3).is_compatible_with(&v(1, 3)), Some(v(1, 3)));
        assert_eq!(v(1, 0).is_compatible_with(&v(2, 0)), None);
    }

    #[test]
    fn version_compatibility_is_commutative() {
        let versions = [v(1, 0), v(1, 9), v(2, 0), v(2, 4), v(3, 1)];
        for a in &versions {
            for b in &versions {
                assert_eq!(a.is_compatible_with(b), b.is_compatible_with(a));
            }
        }
    }

    #[test]
    fn parse_list() {
        let parsed = list("1.2,2.0,5.9");
        assert_eq!(parsed.versions(), &[v(1, 2), v(2, 0), v(5, 9)]);
        assert_eq!(parsed.to_string(), "1.2,2.0,5.9");
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn list_rejections_are_distinguishable() {
        assert_eq!(
            RpcVersionList::parse("").unwrap_err(),
            FormatError::EmptyVersionList
        );
        assert_eq!(
            RpcVersionList::new(Vec::new()).unwrap_err(),
            FormatError::EmptyVersionList
        );
        assert_eq!(
            RpcVersionList::new(vec![RpcVersion { major: 0, minor: 1 }]).unwrap_err(),
            FormatError::ZeroMajor {
                version: "0.1".to_string()
            }
        );
        assert_eq!(
            RpcVersionList::parse("0.1,1.0").unwrap_err(),
            FormatError::ZeroMajor {
                version: "0.1".to_string()
            }
        );
        assert_eq!(
            RpcVersionList::parse("1.0,1.1").unwrap_err(),
            FormatError::DuplicateMajor { major: 1 }
        );
        assert_eq!(
            RpcVersionList::parse("2.0,1.0").unwrap_err(),
            FormatError::UnsortedMajors {
                previous: 2,
                next: 1
            }
        );
    }

    #[test]
    fn list_rejects_bad_entries() {
        assert!(matches!(
            RpcVersionList::parse("1.0,,2.0"),
            Err(FormatError::InvalidVersion { .. })
        ));
        assert!(matches!(
            RpcVersionList::parse("1.0, 2.0"),
            Err(FormatError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn list_negotiates_highest_shared_major() {
        let a = list("1.0,2.3,3.1");
        let b = list("1.4,2.1,3.7");
        assert_eq!(a.is_compatible_with(&b), Some(v(3, 1)));
        assert_eq!(b.is_compatible_with(&a), Some(v(3, 1)));
    }

    #[test]
    fn list_degrades_to_older_major() {
        let old = list("1.3");
        let new = list("1.5,2.0");
        assert_eq!(old.is_compatible_with(&new), Some(v(1, 3)));

        let gap = list("1.0,3.0");
        let mid = list("2.0,3.2,4.0");
        assert_eq!(gap.is_compatible_with(&mid), Some(v(3, 0)));
    }

    #[test]
    fn list_without_shared_major() {
        assert_eq!(list("1.0,3.0").is_compatible_with(&list("2.0,4.0")), None);
    }

    #[test]
    fn list_compatibility_is_commutative() {
        let lists = [
            list("1.0"),
            list("1.4,2.0"),
            list("2.2,3.0"),
            list("1.1,3.5,4.0"),
            list("5.0"),
        ];
        for a in &lists {
            for b in &lists {
                assert_eq!(a.is_compatible_with(b), b.is_compatible_with(a));
            }
        }
    }

    #[test]
    fn current_is_valid() {
        let current = RpcVersionList::current();
        assert!(current.validate().is_ok());
        assert_eq!(RpcVersionList::parse(&current.to_string()).unwrap(), current);
    }
}
