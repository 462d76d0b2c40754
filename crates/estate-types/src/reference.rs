use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Longest identity string accepted as a reference.
pub const MAX_REFERENCE_LEN: usize = 1024;

/// Stable, opaque identity of one stored entity.
///
/// An `EntityReference` is the key under which a store keeps an entity's
/// serialized state. It is assigned once and never changes. References are
/// compared and ordered by their string form, so any two stores agree on
/// iteration order when they sort by reference.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityReference(String);

impl EntityReference {
    /// Create a reference from its external string form.
    ///
    /// Rejects empty strings, strings longer than [`MAX_REFERENCE_LEN`]
    /// bytes, and strings containing control characters.
    pub fn new(identity: impl Into<String>) -> Result<Self, TypeError> {
        let identity = identity.into();
        if identity.is_empty() {
            return Err(TypeError::InvalidReference {
                value: identity,
                reason: "reference must not be empty".into(),
            });
        }
        if identity.len() > MAX_REFERENCE_LEN {
            return Err(TypeError::InvalidReference {
                reason: format!("longer than {MAX_REFERENCE_LEN} bytes"),
                value: identity,
            });
        }
        if identity.chars().any(char::is_control) {
            return Err(TypeError::InvalidReference {
                value: identity,
                reason: "contains control characters".into(),
            });
        }
        Ok(Self(identity))
    }

    /// Generate a fresh, time-ordered reference (UUID v7).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// The external string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the reference, returning its string form.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityReference({})", self.0)
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityReference {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityReference {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for EntityReference {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityReference> for String {
    fn from(reference: EntityReference) -> Self {
        reference.0
    }
}

impl AsRef<str> for EntityReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
