//! SQL for the enrollments cohort and the per-client metrics.

use crate::analysis::time_limits::TimeLimits;
use crate::api::{
    experiment::EnrollmentsQueryType,
    metric::{DataSource, Metric, Segment},
};

/// Builds the queries of one experiment against one application dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentQuery {
    pub experiment_slug: String,
    pub dataset: String,
    pub enrollments_query_type: EnrollmentsQueryType,
}

impl ExperimentQuery {
    pub fn new(
        experiment_slug: impl Into<String>,
        dataset: impl Into<String>,
        enrollments_query_type: EnrollmentsQueryType,
    ) -> Self {
        ExperimentQuery {
            experiment_slug: experiment_slug.into(),
            dataset: dataset.into(),
            enrollments_query_type,
        }
    }

    /// One row per enrolled client and branch, with one boolean column per segment.
    pub fn build_enrollments_query(&self, limits: &TimeLimits, segments: &[Segment]) -> String {
        let raw_enrollments = match self.enrollments_query_type {
            EnrollmentsQueryType::Normandy => self.normandy_enrollments(limits),
            EnrollmentsQueryType::GleanEvent => self.glean_enrollments(limits),
        };

        let mut query = String::new();
        query.push_str(&format!("WITH raw_enrollments AS (\n{}\n)\n", raw_enrollments));
        if segments.is_empty() {
            query.push_str("SELECT * FROM raw_enrollments");
            return query;
        }

        query.push_str("SELECT\n    e.*,\n");
        let columns: Vec<String> = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| format!("    seg_{}.{}", i, segment.name))
            .collect();
        query.push_str(&columns.join(",\n"));
        query.push('\n');
        query.push_str("FROM raw_enrollments e");
        for (i, segment) in segments.iter().enumerate() {
            query.push_str(&format!(
                "\nLEFT JOIN (\n{}\n) seg_{} USING (client_id, branch)",
                self.segment_subquery(segment),
                i
            ));
        }
        query
    }

    /// One row per enrolled client, branch and analysis window, with one
    /// column per metric.
    pub fn build_metrics_query(
        &self,
        metrics: &[Metric],
        limits: &TimeLimits,
        enrollments_table: &str,
    ) -> String {
        let windows: Vec<String> = limits
            .analysis_windows
            .iter()
            .map(|w| {
                format!(
                    "    SELECT {} AS analysis_window_start, {} AS analysis_window_end",
                    w.start, w.end
                )
            })
            .collect();

        let mut query = String::new();
        query.push_str(&format!(
            "WITH analysis_windows AS (\n{}\n),\n",
            windows.join("\n    UNION ALL\n")
        ));
        query.push_str(&format!(
            "enrollments AS (\n    SELECT e.*, aw.*\n    FROM `{}` e\n    CROSS JOIN analysis_windows aw\n)\n",
            enrollments_table
        ));

        let groups = group_by_data_source(metrics);
        let mut select = vec!["    e.*".to_string()];
        for (i, (_, group)) in groups.iter().enumerate() {
            for metric in group {
                select.push(format!("    ds_{}.{}", i, metric.name));
            }
        }
        query.push_str(&format!("SELECT\n{}\n", select.join(",\n")));
        query.push_str("FROM enrollments e");
        for (i, (data_source, group)) in groups.iter().enumerate() {
            query.push_str(&format!(
                "\nLEFT JOIN (\n{}\n) ds_{} USING (client_id, branch, analysis_window_start, analysis_window_end)",
                self.metrics_subquery(data_source, group, limits),
                i
            ));
        }
        query
    }

    fn normandy_enrollments(&self, limits: &TimeLimits) -> String {
        format!(
            "    SELECT
        e.client_id,
        `mozfun.map.get_key`(e.event_map_values, 'branch') AS branch,
        MIN(e.submission_date) AS enrollment_date,
        COUNT(e.submission_date) AS num_enrollment_events
    FROM `moz-fx-data-shared-prod.telemetry.events` e
    WHERE
        e.event_category = 'normandy'
        AND e.event_method = 'enroll'
        AND e.submission_date BETWEEN '{first}' AND '{last}'
        AND e.event_string_value = '{slug}'
    GROUP BY e.client_id, branch",
            first = limits.first_enrollment_date,
            last = limits.last_enrollment_date,
            slug = self.experiment_slug,
        )
    }

    fn glean_enrollments(&self, limits: &TimeLimits) -> String {
        format!(
            "    SELECT
        events.client_info.client_id AS client_id,
        `mozfun.map.get_key`(e.extra, 'branch') AS branch,
        DATE(MIN(events.submission_timestamp)) AS enrollment_date,
        COUNT(events.submission_timestamp) AS num_enrollment_events
    FROM `moz-fx-data-shared-prod.{dataset}.events` events,
    UNNEST(events.events) AS e
    WHERE
        e.category = 'nimbus_events'
        AND DATE(events.submission_timestamp) BETWEEN '{first}' AND '{last}'
        AND e.name = 'enrollment'
        AND `mozfun.map.get_key`(e.extra, 'experiment') = '{slug}'
    GROUP BY client_id, branch",
            dataset = self.dataset,
            first = limits.first_enrollment_date,
            last = limits.last_enrollment_date,
            slug = self.experiment_slug,
        )
    }

    fn segment_subquery(&self, segment: &Segment) -> String {
        let ds = &segment.data_source;
        format!(
            "    SELECT
        e.client_id,
        e.branch,
        {select_expr} AS {name}
    FROM raw_enrollments e
    LEFT JOIN {from_expr} ds
        ON ds.{client_id} = e.client_id
        AND {date} BETWEEN DATE_ADD(e.enrollment_date, INTERVAL {start} DAY)
            AND DATE_ADD(e.enrollment_date, INTERVAL {end} DAY)
    GROUP BY e.client_id, e.branch",
            select_expr = segment.select_expr,
            name = segment.name,
            from_expr = ds.from_expr_for(&self.dataset),
            client_id = ds.client_id_column,
            date = qualified(&ds.submission_date_column),
            start = segment.window_start,
            end = segment.window_end,
        )
    }

    fn metrics_subquery(&self, ds: &DataSource, metrics: &[&Metric], limits: &TimeLimits) -> String {
        let columns: Vec<String> = metrics
            .iter()
            .map(|m| format!("        {} AS {}", m.select_expr, m.name))
            .collect();
        let date = qualified(&ds.submission_date_column);
        format!(
            "    SELECT
        e.client_id,
        e.branch,
        e.analysis_window_start,
        e.analysis_window_end,
{columns}
    FROM enrollments e
    LEFT JOIN {from_expr} ds
        ON ds.{client_id} = e.client_id
        AND {date} BETWEEN '{first}' AND '{last}'
        AND {date} BETWEEN DATE_ADD(e.enrollment_date, INTERVAL e.analysis_window_start DAY)
            AND DATE_ADD(e.enrollment_date, INTERVAL e.analysis_window_end DAY)
    GROUP BY e.client_id, e.branch, e.analysis_window_start, e.analysis_window_end",
            columns = columns.join(",\n"),
            from_expr = ds.from_expr_for(&self.dataset),
            client_id = ds.client_id_column,
            date = date,
            first = limits.first_date_data_required,
            last = limits.last_date_data_required,
        )
    }
}

// qualify a bare column with the data source alias; expressions are left alone
fn qualified(column: &str) -> String {
    if column.contains('(') {
        column.replacen('(', "(ds.", 1)
    } else {
        format!("ds.{}", column)
    }
}

fn group_by_data_source(metrics: &[Metric]) -> Vec<(&DataSource, Vec<&Metric>)> {
    let mut groups: Vec<(&DataSource, Vec<&Metric>)> = Vec::new();
    for metric in metrics {
        match groups.iter_mut().find(|(ds, _)| **ds == metric.data_source) {
            Some((_, group)) => group.push(metric),
            None => groups.push((&metric.data_source, vec![metric])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        experiment::Platform,
        metric::{metric_config, segment},
    };
    use chrono::NaiveDate;

    fn limits() -> TimeLimits {
        TimeLimits::for_ts(
            NaiveDate::from_ymd(2019, 12, 1),
            NaiveDate::from_ymd(2019, 12, 21),
            7,
            8,
        )
        .unwrap()
    }

    #[test]
    fn desktop_enrollments_use_normandy_events() {
        let query = ExperimentQuery::new("normandy-test-slug", "firefox_desktop", EnrollmentsQueryType::Normandy);
        let sql = query.build_enrollments_query(&limits(), &[]);
        assert!(sql.contains("e.event_string_value = 'normandy-test-slug'"));
        assert!(sql.contains("BETWEEN '2019-12-01' AND '2019-12-08'"));
        assert!(!sql.contains("firefox_desktop"));
    }

    #[test]
    fn segments_are_joined_on_enrollments() {
        let query = ExperimentQuery::new("slug", "firefox_desktop", EnrollmentsQueryType::Normandy);
        let regular = segment(Platform::FirefoxDesktop, "regular_users_v3").unwrap();
        let sql = query.build_enrollments_query(&limits(), &[regular]);
        assert!(sql.contains("seg_0.regular_users_v3"));
        assert!(sql.contains("AS regular_users_v3"));
        assert!(sql.contains("telemetry.clients_last_seen"));
    }

    #[test]
    fn metrics_share_a_join_per_data_source() {
        let query = ExperimentQuery::new("slug", "org_mozilla_firefox", EnrollmentsQueryType::GleanEvent);
        let metrics: Vec<Metric> = ["active_hours", "days_of_use", "search_count"]
            .iter()
            .map(|name| metric_config(Platform::Fenix, name).unwrap().metric)
            .collect();
        let sql = query.build_metrics_query(&metrics, &limits(), "enrollments_table");
        assert_eq!(sql.matches("LEFT JOIN (").count(), 2);
        assert!(sql.contains("`mozdata.org_mozilla_firefox.baseline`"));
        assert!(sql.contains("`mozdata.org_mozilla_firefox.metrics`"));
        assert!(sql.contains("DATE(ds.submission_timestamp) BETWEEN '2019-12-01' AND '2019-12-21'"));
        assert!(!sql.contains("{dataset}"));
        assert!(sql.contains("SELECT 7 AS analysis_window_start, 13 AS analysis_window_end"));
    }
}
