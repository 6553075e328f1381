//! Scheduling and execution of one experiment's analysis.

pub mod export;
pub mod period;
pub mod query;
pub mod time_limits;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    api::{
        client::{Backend, EnrollmentPlan, StatisticResult, StatisticsEngine, StatisticsRequest, Warehouse},
        error::AnalysisError,
        metric::Metric,
    },
    config::{AnalysisConfiguration, ExportConfiguration, PopulationPolicy},
    logging::LogConfiguration,
    tracking::run::{AnalysisRun, PeriodOutcome},
};
use period::AnalysisPeriod;
use query::ExperimentQuery;
use time_limits::{add_days, TimeLimits};

/// Analysis length used for validation when an experiment has no end date.
const DEFAULT_VALIDATION_LENGTH_DATES: i64 = 21;

/// Runs the analysis of a single experiment.
pub struct Analysis {
    project: String,
    dataset: String,
    config: AnalysisConfiguration,
    log_config: Option<LogConfiguration>,
    export_config: ExportConfiguration,
    population_policy: PopulationPolicy,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl Analysis {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        config: AnalysisConfiguration,
    ) -> Self {
        Analysis {
            project: project.into(),
            dataset: dataset.into(),
            config,
            log_config: None,
            export_config: ExportConfiguration::default(),
            population_policy: PopulationPolicy::default(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfiguration) -> Self {
        self.log_config = Some(log_config);
        self
    }

    pub fn with_export_config(mut self, export_config: ExportConfiguration) -> Self {
        self.export_config = export_config;
        self
    }

    pub fn with_population_policy(mut self, population_policy: PopulationPolicy) -> Self {
        self.population_policy = population_policy;
        self
    }

    pub fn config(&self) -> &AnalysisConfiguration {
        &self.config
    }

    /// When the last `run` started.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    fn slug(&self) -> String {
        self.config.experiment.log_slug().to_string()
    }

    fn normalized_slug(&self) -> String {
        crate::api::id::normalize(self.config.experiment.log_slug())
    }

    fn table_ref(&self, table: &str) -> String {
        format!("{}.{}.{}", self.project, self.dataset, table)
    }

    pub fn enrollments_table(&self) -> String {
        self.table_ref(&format!("enrollments_{}", self.normalized_slug()))
    }

    pub fn metrics_table(&self, period: AnalysisPeriod, window_index: usize) -> String {
        self.table_ref(&format!(
            "{}_{}_{}",
            self.normalized_slug(),
            period.table_suffix(),
            window_index
        ))
    }

    fn experiment_query(&self) -> ExperimentQuery {
        let experiment = &*self.config.experiment;
        ExperimentQuery::new(
            experiment.log_slug(),
            experiment.bigquery_dataset(),
            experiment.platform.enrollments_query_type(),
        )
    }

    /// Checks that can be decided before any window is computed.
    ///
    /// A missing enrollment period is not one of them: it surfaces from
    /// `timelimits_if_ready` once a window is actually needed.
    pub fn check_runnable(&self) -> Result<(), AnalysisError> {
        let experiment = &self.config.experiment;
        if experiment.skip {
            return Err(AnalysisError::ExplicitSkip(self.slug()));
        }
        if experiment.normandy_slug.is_none() {
            return Err(AnalysisError::NoSlug(self.slug()));
        }
        if self.population_policy.is_high_population(experiment) {
            return Err(AnalysisError::HighPopulation(self.slug()));
        }
        if experiment.start_date.is_none() {
            return Err(AnalysisError::NoStartDate(self.slug()));
        }
        Ok(())
    }

    /// The limits to analyse for `period` as of `current_date`, or `None`
    /// while not a single window of it is complete.
    ///
    /// Readiness only grows with `current_date`.
    pub fn timelimits_if_ready(
        &self,
        period: AnalysisPeriod,
        current_date: DateTime<Utc>,
    ) -> Result<Option<TimeLimits>, AnalysisError> {
        let experiment = &self.config.experiment;
        let start_date = experiment
            .start_date
            .ok_or_else(|| AnalysisError::NoStartDate(self.slug()))?;
        let dates_enrollment = experiment
            .num_dates_enrollment()
            .ok_or_else(|| AnalysisError::NoEnrollmentPeriod(self.slug()))?;
        let first_enrollment_date = start_date.date().naive_utc();
        let current = current_date.date().naive_utc();

        let period_days = match period.days() {
            Some(days) => days,
            None => {
                let end_date = match experiment.end_date {
                    Some(end_date) => end_date.date().naive_utc(),
                    None => return Ok(None),
                };
                if current < end_date {
                    return Ok(None);
                }
                let analysis_length_dates =
                    (end_date - first_enrollment_date).num_days() - dates_enrollment + 1;
                if analysis_length_dates < 0 {
                    return Err(AnalysisError::EnrollmentLongerThanAnalysis(self.slug()));
                }
                return Ok(add_days(end_date, -1).and_then(|last_date_full_data| {
                    TimeLimits::for_single_analysis_window(
                        first_enrollment_date,
                        last_date_full_data,
                        0,
                        analysis_length_dates,
                        dates_enrollment,
                    )
                }));
            }
        };

        Ok(TimeLimits::for_ts(
            first_enrollment_date,
            current,
            period_days,
            dates_enrollment,
        ))
    }

    /// Every metric configured for any period, each once.
    fn all_metrics(&self) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = Vec::new();
        for period in AnalysisPeriod::ALL.iter() {
            for config in self.config.metrics_for(*period) {
                if !metrics.iter().any(|m| m.name == config.metric.name) {
                    metrics.push(config.metric.clone());
                }
            }
        }
        metrics
    }

    /// Dry-runs the enrollments query and the metrics query a run would
    /// issue, over one window spanning the whole experiment.
    pub fn validate(&self, warehouse: &mut dyn Warehouse) -> Result<(), AnalysisError> {
        self.check_runnable()?;
        let experiment = &self.config.experiment;
        let start_date = experiment
            .start_date
            .ok_or_else(|| AnalysisError::NoStartDate(self.slug()))?
            .date()
            .naive_utc();
        let dates_enrollment = experiment
            .num_dates_enrollment()
            .ok_or_else(|| AnalysisError::NoEnrollmentPeriod(self.slug()))?;

        let (end_date, analysis_length_dates) = match experiment.end_date {
            Some(end_date) => {
                let end_date = end_date.date().naive_utc();
                (
                    end_date,
                    (end_date - start_date).num_days() - dates_enrollment + 1,
                )
            }
            None => (
                add_days(start_date, DEFAULT_VALIDATION_LENGTH_DATES + dates_enrollment - 1)
                    .ok_or_else(|| AnalysisError::EnrollmentLongerThanAnalysis(self.slug()))?,
                DEFAULT_VALIDATION_LENGTH_DATES,
            ),
        };
        if analysis_length_dates < 1 {
            error!(
                experiment = %self.slug(),
                "Proposed enrollment longer than analysis dates length"
            );
            return Err(AnalysisError::EnrollmentLongerThanAnalysis(self.slug()));
        }
        let limits = TimeLimits::for_single_analysis_window(
            start_date,
            end_date,
            0,
            analysis_length_dates,
            dates_enrollment,
        )
        .ok_or_else(|| AnalysisError::EnrollmentLongerThanAnalysis(self.slug()))?;

        let query = self.experiment_query();
        let enrollments_sql = query.build_enrollments_query(&limits, &experiment.segments);
        warehouse.dry_run(&enrollments_sql).map_err(|e| {
            error!(experiment = %self.slug(), "Error while dry running enrollments SQL: {:#}", e);
            AnalysisError::Warehouse(e)
        })?;

        let metrics_sql = query.build_metrics_query(&self.all_metrics(), &limits, "enrollments_table");
        warehouse.dry_run(&metrics_sql).map_err(|e| {
            error!(experiment = %self.slug(), "Error while dry running metrics SQL: {:#}", e);
            AnalysisError::Warehouse(e)
        })?;

        info!(experiment = %self.slug(), "Dry run of enrollments and metrics queries passed");
        Ok(())
    }

    /// The enrollment cohort as of `current_date`, or `None` while no
    /// client has a complete day of data.
    pub fn enrollment_plan(
        &self,
        current_date: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<Option<EnrollmentPlan>, AnalysisError> {
        let limits = match self.timelimits_if_ready(AnalysisPeriod::Day, current_date)? {
            Some(limits) => limits,
            None => return Ok(None),
        };
        let query = self
            .experiment_query()
            .build_enrollments_query(&limits, &self.config.experiment.segments);
        Ok(Some(EnrollmentPlan {
            table: self.enrollments_table(),
            query,
            dry_run,
        }))
    }

    /// Makes sure the enrollments table exists before metrics are computed.
    pub fn ensure_enrollments(
        &self,
        backend: &mut Backend<'_>,
        current_date: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<(), AnalysisError> {
        match self.enrollment_plan(current_date, dry_run)? {
            Some(plan) => {
                debug!(experiment = %self.slug(), table = %plan.table, "Ensuring enrollments");
                backend.enrollments.ensure_enrollments(&plan)
            }
            None => {
                info!(experiment = %self.slug(), "Skipping enrollments; not ready");
                Ok(())
            }
        }
    }

    fn calculate_metrics(
        &self,
        warehouse: &mut dyn Warehouse,
        limits: &TimeLimits,
        period: AnalysisPeriod,
        dry_run: bool,
    ) -> Result<String, AnalysisError> {
        let table = self.metrics_table(period, limits.window_index());
        let metrics: Vec<Metric> = self
            .config
            .metrics_for(period)
            .iter()
            .map(|config| config.metric.clone())
            .collect();
        let sql = self.experiment_query().build_metrics_query(
            &metrics,
            &limits.last_window_only(),
            &self.enrollments_table(),
        );

        if dry_run {
            info!(experiment = %self.slug(), %period, "Not executing query; dry run");
            debug!("{}", sql);
        } else {
            info!(experiment = %self.slug(), %period, table = %table, "Executing metrics query");
            warehouse
                .execute(&sql, Some(&table))
                .map_err(AnalysisError::Warehouse)?;
        }
        Ok(table)
    }

    /// Statistic failures are logged and skipped; they never abort the run.
    fn calculate_statistics(
        &self,
        engine: &mut dyn StatisticsEngine,
        metrics_table: &str,
        period: AnalysisPeriod,
    ) -> Vec<StatisticResult> {
        let experiment = &self.config.experiment;
        let segments: Vec<_> = std::iter::once(None)
            .chain(experiment.segments.iter().map(Some))
            .collect();

        let mut results = Vec::new();
        for config in self.config.metrics_for(period) {
            for statistic in &config.statistics {
                for segment in &segments {
                    let request = StatisticsRequest {
                        metrics_table,
                        metric: &config.metric.name,
                        statistic,
                        segment: *segment,
                        reference_branch: experiment.reference_branch(),
                    };
                    match engine.compute(&request) {
                        Ok(computed) => results.extend(computed),
                        Err(err) if err.is_critical() => error!(
                            experiment = %self.slug(),
                            metric = %config.metric.name,
                            statistic = %statistic.name,
                            exception_type = err.exception_type(),
                            severity = "CRITICAL",
                            "{}", err
                        ),
                        Err(err) => error!(
                            experiment = %self.slug(),
                            metric = %config.metric.name,
                            statistic = %statistic.name,
                            exception_type = err.exception_type(),
                            "{}", err
                        ),
                    }
                }
            }
        }
        results
    }

    /// Analyses every period that is ready as of `current_date`.
    ///
    /// A dry run goes through the same readiness and enrollment steps but
    /// neither executes metric queries nor computes statistics.
    pub fn run(
        &mut self,
        backend: &mut Backend<'_>,
        current_date: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<AnalysisRun, AnalysisError> {
        info!(experiment = %self.slug(), "Analysis.run invoked");
        if let Err(err) = self.check_runnable() {
            if err.is_expected() {
                warn!(experiment = %self.slug(), exception_type = err.exception_type(), "{}", err);
            }
            return Err(err);
        }

        let mut run = AnalysisRun::start(self.config.experiment.slug.clone(), dry_run);
        self.start_time = Some(run.start_time);
        self.end_time = None;

        self.ensure_enrollments(backend, current_date, dry_run)?;

        for period in AnalysisPeriod::ALL.iter().copied() {
            let limits = match self.timelimits_if_ready(period, current_date)? {
                Some(limits) => limits,
                None => {
                    info!(experiment = %self.slug(), %period, "Skipping; not ready");
                    continue;
                }
            };
            if self.config.metrics_for(period).is_empty() {
                info!(experiment = %self.slug(), %period, "Skipping; no metrics configured");
                continue;
            }

            let metrics_table = self.calculate_metrics(&mut *backend.warehouse, &limits, period, dry_run)?;
            let statistics = if dry_run {
                Vec::new()
            } else {
                self.calculate_statistics(&mut *backend.statistics, &metrics_table, period)
            };
            run.record(PeriodOutcome {
                period,
                window_index: limits.window_index(),
                last_date_data_required: limits.last_date_data_required,
                metrics_table,
                statistics,
            });
        }

        run.finish();
        self.end_time = run.end_time;
        info!(
            experiment = %self.slug(),
            run_id = %run.run_id,
            periods = run.outcomes.len(),
            "Analysis.run finished"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::experiment::{Experiment, ExperimentType};
    use chrono::{NaiveDate, TimeZone};

    fn analysis() -> Analysis {
        let mut experiment = Experiment::new("test-slug", ExperimentType::Pref);
        experiment.normandy_slug = Some("normandy-test-slug".into());
        experiment.start_date = Some(Utc.ymd(2019, 12, 1).and_hms(0, 0, 0));
        experiment.end_date = Some(Utc.ymd(2020, 3, 1).and_hms(0, 0, 0));
        experiment.proposed_enrollment = Some(7);
        Analysis::new("test", "test", AnalysisConfiguration::new(experiment))
    }

    #[test]
    fn table_names() {
        let analysis = analysis();
        assert_eq!(
            analysis.enrollments_table(),
            "test.test.enrollments_normandy_test_slug"
        );
        assert_eq!(
            analysis.metrics_table(AnalysisPeriod::Days28, 2),
            "test.test.normandy_test_slug_days28_2"
        );
    }

    #[test]
    fn overall_covers_enrollment_to_end_date() {
        let analysis = analysis();
        let limits = analysis
            .timelimits_if_ready(AnalysisPeriod::Overall, Utc.ymd(2020, 3, 1).and_hms(0, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(limits.last_date_data_required, NaiveDate::from_ymd(2020, 2, 29));
        assert_eq!(limits.analysis_windows[0].length(), 84);
        assert!(analysis
            .timelimits_if_ready(AnalysisPeriod::Overall, Utc.ymd(2020, 2, 29).and_hms(23, 59, 59))
            .unwrap()
            .is_none());
    }

    #[test]
    fn enrollment_plan_waits_for_the_first_day() {
        let analysis = analysis();
        let early = Utc.ymd(2019, 12, 7).and_hms(0, 0, 0);
        assert!(analysis.enrollment_plan(early, false).unwrap().is_none());
        let plan = analysis
            .enrollment_plan(Utc.ymd(2019, 12, 8).and_hms(0, 0, 0), true)
            .unwrap()
            .unwrap();
        assert!(plan.dry_run);
        assert_eq!(plan.table, "test.test.enrollments_normandy_test_slug");
        assert!(plan.query.contains("'normandy-test-slug'"));
    }
}
