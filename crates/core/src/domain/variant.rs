use serde::{Deserialize, Serialize};

/// Which step sequence a build assembles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildVariant {
    /// Single instance, snapshotted directly.
    #[default]
    Ephemeral,
    /// Master/builder instance pair working on persistent storage volumes.
    PersistentVolume,
}

impl BuildVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::PersistentVolume => "persistent_volume",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ephemeral" => Some(Self::Ephemeral),
            "persistent_volume" | "pv" => Some(Self::PersistentVolume),
            _ => None,
        }
    }
}

impl std::fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parse() {
        assert_eq!(BuildVariant::parse("ephemeral"), Some(BuildVariant::Ephemeral));
        assert_eq!(BuildVariant::parse("pv"), Some(BuildVariant::PersistentVolume));
        assert_eq!(BuildVariant::parse("bogus"), None);
        assert_eq!(BuildVariant::PersistentVolume.to_string(), "persistent_volume");
    }
}
