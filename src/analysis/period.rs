use serde::{Deserialize, Serialize};
use std::fmt;

/// Granularity of a scheduled computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisPeriod {
    Day,
    Week,
    #[serde(rename = "days28")]
    Days28,
    Overall,
}

impl AnalysisPeriod {
    pub const ALL: [AnalysisPeriod; 4] = [
        AnalysisPeriod::Day,
        AnalysisPeriod::Week,
        AnalysisPeriod::Days28,
        AnalysisPeriod::Overall,
    ];

    /// Length of one time series window; `None` for the single overall window.
    pub fn days(self) -> Option<i64> {
        match self {
            AnalysisPeriod::Day => Some(1),
            AnalysisPeriod::Week => Some(7),
            AnalysisPeriod::Days28 => Some(28),
            AnalysisPeriod::Overall => None,
        }
    }

    pub fn adjective(self) -> &'static str {
        match self {
            AnalysisPeriod::Day => "daily",
            AnalysisPeriod::Week => "weekly",
            AnalysisPeriod::Days28 => "28_day",
            AnalysisPeriod::Overall => "overall",
        }
    }

    pub fn table_suffix(self) -> &'static str {
        match self {
            AnalysisPeriod::Day => "day",
            AnalysisPeriod::Week => "week",
            AnalysisPeriod::Days28 => "days28",
            AnalysisPeriod::Overall => "overall",
        }
    }
}

impl fmt::Display for AnalysisPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.adjective())
    }
}
