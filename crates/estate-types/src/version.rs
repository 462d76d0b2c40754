use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque optimistic-concurrency token.
///
/// Versions are assigned by the store layer and only ever compared for
/// equality by callers. The store layer itself issues numeric tokens
/// (`"1"`, `"2"`, ...) but accepts any non-empty token read back from
/// storage, e.g. records restored from a foreign backup.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// Wrap an existing token.
    pub fn new(token: impl Into<String>) -> Result<Self, TypeError> {
        let token = token.into();
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(TypeError::InvalidVersion(token));
        }
        Ok(Self(token))
    }

    /// The version assigned to a newly created entity.
    pub fn initial() -> Self {
        Self("1".into())
    }

    /// The version assigned by the next successful write.
    ///
    /// Numeric tokens advance by one. Foreign, non-numeric tokens and
    /// `u64::MAX` restart the sequence at the initial version, which is
    /// always distinct from the token it replaces.
    pub fn successor(&self) -> Self {
        match self.0.parse::<u64>().ok().and_then(|n| n.checked_add(1)) {
            Some(next) => Self(next.to_string()),
            None => Self::initial(),
        }
    }

    /// The token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Version {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_is_one() {
        assert_eq!(Version::initial().as_str(), "1");
    }

    #[test]
    fn successor_increments_numeric() {
        let v = Version::new("41").unwrap();
        assert_eq!(v.successor().as_str(), "42");
    }

    #[test]
    fn successor_of_foreign_token_restarts() {
        let v = Version::new("uow-7f3a").unwrap();
        let next = v.successor();
        assert_eq!(next, Version::initial());
        assert_ne!(next, v);
    }

    #[test]
    fn successor_of_last_numeric_token_restarts() {
        let v = Version::new(u64::MAX.to_string()).unwrap();
        let next = v.successor();
        assert_eq!(next, Version::initial());
        assert_ne!(next, v);
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(Version::new("").is_err());
        assert!(Version::new("1 2").is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let v = Version::new("17").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"17\"");
        let parsed: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, v);
    }
}
