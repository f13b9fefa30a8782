//! Audit severity levels

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Audit record severity
///
/// Maps directly to syslog severity values (RFC 5424), which is also what
/// GELF collectors expect in the `level` field. The pipeline itself never
/// filters on level; ordering is only meaningful to the collector.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// System is unusable (syslog 0)
    Emergency = 0,
    /// Action must be taken immediately (syslog 1)
    Alert = 1,
    /// Critical conditions (syslog 2)
    Critical = 2,
    /// Error conditions (syslog 3)
    Error = 3,
    /// Warning conditions (syslog 4)
    Warning = 4,
    /// Normal but significant condition (syslog 5)
    Notice = 5,
    /// Informational messages (syslog 6)
    #[default]
    Info = 6,
    /// Debug-level messages (syslog 7)
    Debug = 7,
}

impl AuditLevel {
    /// Get the numeric syslog severity value (0-7)
    pub fn as_syslog_severity(&self) -> u8 {
        *self as u8
    }

    /// Level for a numeric syslog severity
    pub fn from_syslog_severity(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Emergency,
            1 => Self::Alert,
            2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Info,
            7 => Self::Debug,
            _ => return None,
        })
    }
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Emergency => write!(f, "EMERGENCY"),
            Self::Alert => write!(f, "ALERT"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARNING"),
            Self::Notice => write!(f, "NOTICE"),
            Self::Info => write!(f, "INFO"),
            Self::Debug => write!(f, "DEBUG"),
        }
    }
}

impl FromStr for AuditLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(value) = trimmed.parse::<u8>() {
            return Self::from_syslog_severity(value)
                .ok_or_else(|| Error::InvalidLevel(s.to_string()));
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "emergency" | "emerg" => Ok(Self::Emergency),
            "alert" => Ok(Self::Alert),
            "critical" | "crit" => Ok(Self::Critical),
            "error" | "err" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "notice" => Ok(Self::Notice),
            "info" | "informational" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            _ => Err(Error::InvalidLevel(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_info() {
        assert_eq!(AuditLevel::default(), AuditLevel::Info);
        assert_eq!(AuditLevel::default().as_syslog_severity(), 6);
    }

    #[test]
    fn test_syslog_values_are_ordered() {
        assert_eq!(AuditLevel::Emergency.as_syslog_severity(), 0);
        assert_eq!(AuditLevel::Debug.as_syslog_severity(), 7);
        assert!(AuditLevel::Emergency < AuditLevel::Warning);
        assert!(AuditLevel::Info < AuditLevel::Debug);
        assert_eq!(AuditLevel::from_syslog_severity(8), None);
    }

    #[test]
    fn test_parse_names_aliases_and_numbers() {
        assert_eq!("WARN".parse::<AuditLevel>().unwrap(), AuditLevel::Warning);
        assert_eq!("crit".parse::<AuditLevel>().unwrap(), AuditLevel::Critical);
        assert_eq!(" info ".parse::<AuditLevel>().unwrap(), AuditLevel::Info);
        assert_eq!("3".parse::<AuditLevel>().unwrap(), AuditLevel::Error);
        assert!(matches!("9".parse::<AuditLevel>(), Err(Error::InvalidLevel(_))));
        assert!(matches!("loud".parse::<AuditLevel>(), Err(Error::InvalidLevel(_))));
    }

    #[test]
    fn test_display_and_serde_names() {
        assert_eq!(AuditLevel::Info.to_string(), "INFO");
        assert_eq!(
            serde_json::to_string(&AuditLevel::Notice).unwrap(),
            "\"notice\""
        );
        let level: AuditLevel = serde_json::from_str("\"alert\"").unwrap();
        assert_eq!(level, AuditLevel::Alert);
    }
}
