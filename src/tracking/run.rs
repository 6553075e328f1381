use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    analysis::period::AnalysisPeriod,
    api::{client::StatisticResult, id::Slug},
    timestamp, RunId,
};

/// What one ready period produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodOutcome {
    pub period: AnalysisPeriod,
    /// 1-based index of the window the metrics were computed for.
    pub window_index: usize,
    pub last_date_data_required: NaiveDate,
    pub metrics_table: String,
    /// Always empty on a dry run.
    pub statistics: Vec<StatisticResult>,
}

/// A record of a single `Analysis::run`.
///
/// Created when the run passes the gate, so its `start_time` is the moment
/// work began.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub run_id: RunId,
    pub experiment: Slug,
    pub dry_run: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub outcomes: Vec<PeriodOutcome>,
}

impl AnalysisRun {
    pub fn start(experiment: Slug, dry_run: bool) -> Self {
        AnalysisRun {
            run_id: RunId::generate(),
            experiment,
            dry_run,
            start_time: timestamp(),
            end_time: None,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: PeriodOutcome) {
        assert!(self.end_time.is_none(), "AnalysisRun is already finished");
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self) {
        self.end_time = Some(timestamp());
    }

    pub fn outcome(&self, period: AnalysisPeriod) -> Option<&PeriodOutcome> {
        self.outcomes.iter().find(|outcome| outcome.period == period)
    }

    pub fn periods(&self) -> Vec<AnalysisPeriod> {
        self.outcomes.iter().map(|outcome| outcome.period).collect()
    }
}
