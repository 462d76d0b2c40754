use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Behavior switches threaded through every store constructor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Log every applied create/update/remove at DEBUG level.
    pub trace_operations: bool,
}

impl StoreOptions {
    pub fn traced() -> Self {
        Self {
            trace_operations: true,
        }
    }
}

/// Durability a remote backend must reach before a write is reported as
/// successful.
///
/// Mirrors document-store "write concern" levels. Backends without
/// replication treat `Majority` like `Journaled`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteConcern {
    /// Fire and forget; data may sit in process buffers.
    #[serde(alias = "unacknowledged", alias = "w0")]
    BestEffort,
    /// Handed to the storage medium (flushed to the OS).
    #[default]
    #[serde(alias = "w1")]
    Acknowledged,
    /// Synced to stable storage.
    Journaled,
    /// Acknowledged by a majority of replicas.
    Majority,
}

impl WriteConcern {
    /// Whether buffered writes must be flushed before returning.
    pub fn requires_flush(&self) -> bool {
        !matches!(self, Self::BestEffort)
    }

    /// Whether written data must be synced to stable storage before
    /// returning.
    pub fn requires_sync(&self) -> bool {
        matches!(self, Self::Journaled | Self::Majority)
    }
}

impl fmt::Display for WriteConcern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BestEffort => "best-effort",
            Self::Acknowledged => "acknowledged",
            Self::Journaled => "journaled",
            Self::Majority => "majority",
        };
        f.write_str(name)
    }
}

impl FromStr for WriteConcern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best-effort" | "unacknowledged" | "w0" => Ok(Self::BestEffort),
            "acknowledged" | "w1" => Ok(Self::Acknowledged),
            "journaled" | "journal" => Ok(Self::Journaled),
            "majority" => Ok(Self::Majority),
            other => Err(format!("unknown write concern: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        assert!(!StoreOptions::default().trace_operations);
        assert!(StoreOptions::traced().trace_operations);
    }

    #[test]
    fn default_concern_is_acknowledged() {
        assert_eq!(WriteConcern::default(), WriteConcern::Acknowledged);
    }

    #[test]
    fn concern_durability_ladder() {
        assert!(!WriteConcern::BestEffort.requires_flush());
        assert!(WriteConcern::Acknowledged.requires_flush());
        assert!(!WriteConcern::Acknowledged.requires_sync());
        assert!(WriteConcern::Journaled.requires_sync());
        assert!(WriteConcern::Majority.requires_sync());
    }

    #[test]
    fn parse_aliases() {
        assert_eq!("W0".parse::<WriteConcern>().unwrap(), WriteConcern::BestEffort);
        assert_eq!("unacknowledged".parse::<WriteConcern>().unwrap(), WriteConcern::BestEffort);
        assert_eq!("w1".parse::<WriteConcern>().unwrap(), WriteConcern::Acknowledged);
        assert_eq!("majority".parse::<WriteConcern>().unwrap(), WriteConcern::Majority);
        assert!("w7".parse::<WriteConcern>().is_err());
    }

    #[test]
    fn display_parses_back() {
        for c in [
            WriteConcern::BestEffort,
            WriteConcern::Acknowledged,
            WriteConcern::Journaled,
            WriteConcern::Majority,
        ] {
            assert_eq!(c.to_string().parse::<WriteConcern>().unwrap(), c);
        }
    }

    #[test]
    fn toml_config() {
        #[derive(Deserialize)]
        struct Doc {
            concern: WriteConcern,
            options: StoreOptions,
        }
        let doc: Doc = toml::from_str(
            r#"
            concern = "unacknowledged"
            [options]
            trace_operations = true
            "#,
        )
        .unwrap();
        assert_eq!(doc.concern, WriteConcern::BestEffort);
        assert!(doc.options.trace_operations);
    }
}
