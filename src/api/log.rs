use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::api::log_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "WARN")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// ERROR and CRITICAL.
    pub fn is_error(self) -> bool {
        self >= LogLevel::Error
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the log table.
///
/// `experiment` leads so that exported records read as indexed by slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub experiment: Option<String>,
    #[serde(with = "log_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub statistic: Option<String>,
    pub log_level: LogLevel,
    #[serde(default)]
    pub exception_type: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
        assert!(LogLevel::Info < LogLevel::Warning);
    }

    #[test]
    fn parse_log_row() {
        let row = r#"{
            "timestamp": "2022-07-26 04:42:49",
            "experiment": "addon-search-tips-aka-nudges-release-72-74-bug-1603564",
            "metric": "remote_settings_latency",
            "statistic": "bootstrap_mean",
            "log_level": "CRITICAL",
            "exception_type": "CriticalStatisticComputationException",
            "message": "Error statistic bootstrap_mean metric remote_settings_latency: null"
        }"#;
        let record = serde_json::from_str::<LogRecord>(row).unwrap();
        assert_eq!(record.log_level, LogLevel::Critical);
        assert!(record.log_level.is_error());
        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["timestamp"], "2022-07-26T04:42:49.000Z");
    }

    #[test]
    fn warnings_are_not_errors() {
        let row = r#"{"timestamp": "2022-07-26 05:37:27", "experiment": null,
                      "log_level": "WARN", "message": "skip"}"#;
        let record = serde_json::from_str::<LogRecord>(row).unwrap();
        assert_eq!(record.log_level, LogLevel::Warning);
        assert!(!record.log_level.is_error());
    }
}
