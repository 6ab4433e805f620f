//! Shared types used across Switchyard crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a new version reaches production traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Two full environments; traffic flips from the live one to the other.
    #[default]
    BlueGreen,
    /// The orchestration platform replaces instances under surge bounds.
    Rolling,
    /// A small slice of traffic first, then progressive stages.
    Canary,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::BlueGreen => "blue_green",
            Strategy::Rolling => "rolling",
            Strategy::Canary => "canary",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "blue_green" | "bluegreen" => Ok(Strategy::BlueGreen),
            "rolling" => Ok(Strategy::Rolling),
            "canary" => Ok(Strategy::Canary),
            other => Err(format!("unknown deployment strategy: {other}")),
        }
    }
}

/// Severity attached to operator notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Milliseconds since the unix epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_common_spellings() {
        assert_eq!("blue-green".parse::<Strategy>().unwrap(), Strategy::BlueGreen);
        assert_eq!("BlueGreen".parse::<Strategy>().unwrap(), Strategy::BlueGreen);
        assert_eq!("rolling".parse::<Strategy>().unwrap(), Strategy::Rolling);
        assert_eq!("Canary".parse::<Strategy>().unwrap(), Strategy::Canary);
        assert!("shadow".parse::<Strategy>().is_err());
    }

    #[test]
    fn strategy_serializes_snake_case() {
        let json = serde_json::to_string(&Strategy::BlueGreen).unwrap();
        assert_eq!(json, "\"blue_green\"");
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
