//! Schema version numbers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// A `major.minor.patch` version of a persisted schema.
///
/// Missing components parse as zero, so `"4"`, `"4.0"` and `"4.0.0"` are
/// equal. Ordering is numeric, component by component.
///
/// # Examples
///
/// ```
/// use modelstore_core::SchemaVersion;
///
/// let v: SchemaVersion = "4.1".parse().unwrap();
/// assert_eq!(v, SchemaVersion::new(4, 1, 0));
/// assert!(v < "4.1.1".parse().unwrap());
/// assert!(SchemaVersion::new(4, 10, 0) > SchemaVersion::new(4, 9, 9));
/// assert_eq!(v.to_string(), "4.1.0");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl SchemaVersion {
    /// Creates a version from its components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for SchemaVersion {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchemaError::InvalidVersion(s.to_string());
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let mut components = [0u64; 3];
        let mut count = 0;
        for part in trimmed.split('.') {
            if count == components.len() || part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            components[count] = part.parse().map_err(|_| invalid())?;
            count += 1;
        }

        Ok(Self::new(components[0], components[1], components[2]))
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(version: SchemaVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_versions() {
        assert_eq!("5".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(5, 0, 0));
        assert_eq!(" 5.2 ".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(5, 2, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "v1.0", "1..2", "1.2.3.4", "1.a", "-1", "1.2."] {
            assert!(bad.parse::<SchemaVersion>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let v = SchemaVersion::new(4, 1, 1);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"4.1.1\"");
        let back: SchemaVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert!(serde_json::from_str::<SchemaVersion>("\"nope\"").is_err());
    }
}
