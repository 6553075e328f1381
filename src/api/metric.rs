//! Metric, statistic and segment definitions known to the analysis.
//!
//! Data sources of mobile applications refer to their tables through the
//! `{dataset}` placeholder, which the query builder replaces with the
//! experiment's dataset.

use serde::{Deserialize, Serialize};

use crate::analysis::period::AnalysisPeriod;
use crate::api::experiment::Platform;

pub const DATASET_PLACEHOLDER: &str = "{dataset}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    pub from_expr: String,
    pub client_id_column: String,
    pub submission_date_column: String,
}

impl DataSource {
    fn new(name: &str, from_expr: &str, client_id_column: &str, submission_date_column: &str) -> Self {
        DataSource {
            name: name.to_string(),
            from_expr: from_expr.to_string(),
            client_id_column: client_id_column.to_string(),
            submission_date_column: submission_date_column.to_string(),
        }
    }

    fn telemetry(name: &str, from_expr: &str) -> Self {
        DataSource::new(name, from_expr, "client_id", "submission_date")
    }

    fn glean(name: &str, table: &str) -> Self {
        DataSource::new(
            name,
            &format!("`mozdata.{}.{}`", DATASET_PLACEHOLDER, table),
            "client_info.client_id",
            "DATE(submission_timestamp)",
        )
    }

    pub fn from_expr_for(&self, dataset: &str) -> String {
        self.from_expr.replace(DATASET_PLACEHOLDER, dataset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub data_source: DataSource,
    pub select_expr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statistic {
    pub name: String,
}

impl From<&str> for Statistic {
    fn from(name: &str) -> Self {
        Statistic {
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub metric: Metric,
    pub statistics: Vec<Statistic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub data_source: DataSource,
    pub select_expr: String,
    /// Days relative to enrollment, inclusive.
    pub window_start: i64,
    pub window_end: i64,
}

fn metric(name: &str, data_source: &DataSource, select_expr: &str, statistics: &[&str]) -> MetricConfig {
    MetricConfig {
        metric: Metric {
            name: name.to_string(),
            data_source: data_source.clone(),
            select_expr: select_expr.to_string(),
        },
        statistics: statistics.iter().map(|&s| Statistic::from(s)).collect(),
    }
}

const CONTINUOUS: &[&str] = &["bootstrap_mean", "deciles"];
const BINARY: &[&str] = &["binomial"];

/// Every metric defined for a platform, with its default statistics.
pub fn standard_metrics(platform: Platform) -> Vec<MetricConfig> {
    match platform {
        Platform::FirefoxDesktop => {
            let clients_daily = DataSource::telemetry(
                "clients_daily",
                "`moz-fx-data-shared-prod.telemetry.clients_daily`",
            );
            let search_clients = DataSource::telemetry(
                "search_clients_engines_sources_daily",
                "`mozdata.search.search_clients_engines_sources_daily`",
            );
            vec![
                metric(
                    "active_hours",
                    &clients_daily,
                    "COALESCE(SUM(active_hours_sum), 0)",
                    CONTINUOUS,
                ),
                metric(
                    "uri_count",
                    &clients_daily,
                    "COALESCE(SUM(scalar_parent_browser_engagement_total_uri_count_sum), 0)",
                    CONTINUOUS,
                ),
                metric(
                    "search_count",
                    &search_clients,
                    "COALESCE(SUM(sap), 0)",
                    CONTINUOUS,
                ),
                metric(
                    "days_of_use",
                    &clients_daily,
                    "COUNT(DISTINCT submission_date)",
                    CONTINUOUS,
                ),
                metric(
                    "retained",
                    &clients_daily,
                    "COALESCE(COUNT(submission_date), 0) > 0",
                    BINARY,
                ),
            ]
        }
        _ => {
            let baseline = DataSource::glean("baseline", "baseline");
            let metrics = DataSource::glean("metrics", "metrics");
            vec![
                metric(
                    "active_hours",
                    &baseline,
                    "COALESCE(SUM(metrics.timespan.glean_baseline_duration.value), 0) / 3600.0",
                    CONTINUOUS,
                ),
                metric(
                    "days_of_use",
                    &baseline,
                    "COUNT(DISTINCT DATE(submission_timestamp))",
                    CONTINUOUS,
                ),
                metric(
                    "search_count",
                    &metrics,
                    "COALESCE(SUM((SELECT SUM(value) FROM UNNEST(metrics.labeled_counter.metrics_search_count))), 0)",
                    CONTINUOUS,
                ),
                metric(
                    "retained",
                    &baseline,
                    "COALESCE(COUNT(document_id), 0) > 0",
                    BINARY,
                ),
            ]
        }
    }
}

pub fn metric_config(platform: Platform, name: &str) -> Option<MetricConfig> {
    standard_metrics(platform)
        .into_iter()
        .find(|config| config.metric.name == name)
}

/// Names of the metrics computed for a period when nothing is configured.
pub fn default_metric_names(platform: Platform, period: AnalysisPeriod) -> Vec<&'static str> {
    match (period, platform) {
        (AnalysisPeriod::Day, _) => Vec::new(),
        (AnalysisPeriod::Days28, _) => vec!["days_of_use", "retained"],
        (_, Platform::FirefoxDesktop) => {
            vec!["active_hours", "uri_count", "search_count", "days_of_use", "retained"]
        }
        (_, _) => vec!["active_hours", "days_of_use", "search_count", "retained"],
    }
}

pub fn segment(platform: Platform, name: &str) -> Option<Segment> {
    if platform.is_mobile() {
        return None;
    }
    let clients_last_seen = DataSource::telemetry(
        "clients_last_seen",
        "`moz-fx-data-shared-prod.telemetry.clients_last_seen`",
    );
    let select_expr = match name {
        "regular_users_v3" => "COALESCE(LOGICAL_OR(is_regular_user_v3), FALSE)",
        "new_or_resurrected_v3" => "COALESCE(LOGICAL_OR(is_new_or_resurrected_v3), FALSE)",
        "weekday_regular_v1" => "COALESCE(LOGICAL_OR(is_weekday_regular_v1), FALSE)",
        "allweek_regular_v1" => "COALESCE(LOGICAL_OR(is_allweek_regular_v1), FALSE)",
        "new_unique_profiles" => "COALESCE(LOGICAL_OR(is_new_profile), FALSE)",
        _ => return None,
    };
    Some(Segment {
        name: name.to_string(),
        data_source: clients_last_seen,
        select_expr: select_expr.to_string(),
        window_start: 0,
        window_end: 0,
    })
}
