//! Trading enums shared across the workspace.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

impl FromStr for Side {
    type Err = CoreError;

    /// Accepts `long`/`buy` and `short`/`sell`, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Self::Long),
            "short" | "sell" => Ok(Self::Short),
            other => Err(CoreError::InvalidSide(other.to_string())),
        }
    }
}

/// Lifecycle state of a queued signal.
///
/// `Promoted` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Queued,
    Promoted,
    Cancelled,
}

impl SignalStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Promoted | Self::Cancelled)
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Promoted => write!(f, "PROMOTED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Lifecycle state of a position as reported by the position manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Active,
    Closing,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_from_str() {
        assert_eq!("long".parse::<Side>().unwrap(), Side::Long);
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Long);
        assert_eq!(" sell ".parse::<Side>().unwrap(), Side::Short);
        assert!("flat".parse::<Side>().is_err());
    }

    #[test]
    fn test_signal_status_terminal() {
        assert!(!SignalStatus::Queued.is_terminal());
        assert!(SignalStatus::Promoted.is_terminal());
        assert!(SignalStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_signal_status_serde() {
        let json = serde_json::to_string(&SignalStatus::Promoted).unwrap();
        assert_eq!(json, "\"PROMOTED\"");
    }
}
