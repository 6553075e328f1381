//! Per-experiment overrides and their resolution against the metric registry.
//!
//! An override file looks like
//!
//! ```toml
//! [experiment]
//! skip = false
//! segments = ["regular_users_v3"]
//! enrollment_period = 14
//! end_date = "2020-03-01"
//!
//! [metrics]
//! weekly = ["active_hours", "retained"]
//! ```
//!
//! Keys that are not recognised are ignored.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops::Deref};

use crate::analysis::period::AnalysisPeriod;
use crate::api::{
    error::ConfigError,
    experiment::Experiment,
    metric::{self, MetricConfig, Segment},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    #[serde(default)]
    pub skip: Option<bool>,
    #[serde(default)]
    pub segments: Option<Vec<String>>,
    /// Overrides the proposed enrollment, in days after the start date.
    #[serde(default)]
    pub enrollment_period: Option<u32>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Metric names per period; `None` keeps the platform default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSpec {
    #[serde(default)]
    pub daily: Option<Vec<String>>,
    #[serde(default)]
    pub weekly: Option<Vec<String>>,
    #[serde(default)]
    pub days28: Option<Vec<String>>,
    #[serde(default)]
    pub overall: Option<Vec<String>>,
}

impl MetricsSpec {
    pub fn get(&self, period: AnalysisPeriod) -> Option<&Vec<String>> {
        match period {
            AnalysisPeriod::Day => self.daily.as_ref(),
            AnalysisPeriod::Week => self.weekly.as_ref(),
            AnalysisPeriod::Days28 => self.days28.as_ref(),
            AnalysisPeriod::Overall => self.overall.as_ref(),
        }
    }

    fn get_mut(&mut self, period: AnalysisPeriod) -> &mut Option<Vec<String>> {
        match period {
            AnalysisPeriod::Day => &mut self.daily,
            AnalysisPeriod::Week => &mut self.weekly,
            AnalysisPeriod::Days28 => &mut self.days28,
            AnalysisPeriod::Overall => &mut self.overall,
        }
    }
}

/// An unresolved override specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSpec {
    #[serde(default)]
    pub experiment: ExperimentSpec,
    #[serde(default)]
    pub metrics: MetricsSpec,
}

impl AnalysisSpec {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// The platform's default metrics for every period.
    pub fn default_for_experiment(experiment: &Experiment) -> Self {
        let mut spec = AnalysisSpec::default();
        for &period in AnalysisPeriod::ALL.iter() {
            let names = metric::default_metric_names(experiment.platform, period)
                .into_iter()
                .map(String::from)
                .collect();
            *spec.metrics.get_mut(period) = Some(names);
        }
        spec
    }

    /// Fields set in `other` win.
    pub fn merge(&mut self, other: AnalysisSpec) {
        let AnalysisSpec { experiment, metrics } = other;
        if experiment.skip.is_some() {
            self.experiment.skip = experiment.skip;
        }
        if experiment.segments.is_some() {
            self.experiment.segments = experiment.segments;
        }
        if experiment.enrollment_period.is_some() {
            self.experiment.enrollment_period = experiment.enrollment_period;
        }
        if experiment.start_date.is_some() {
            self.experiment.start_date = experiment.start_date;
        }
        if experiment.end_date.is_some() {
            self.experiment.end_date = experiment.end_date;
        }
        for &period in AnalysisPeriod::ALL.iter() {
            if let Some(names) = metrics.get(period) {
                *self.metrics.get_mut(period) = Some(names.clone());
            }
        }
    }

    /// Applies this spec on top of the experiment's defaults.
    pub fn resolve(&self, experiment: &Experiment) -> Result<AnalysisConfiguration, ConfigError> {
        let mut spec = AnalysisSpec::default_for_experiment(experiment);
        spec.merge(self.clone());

        let mut experiment = experiment.clone();
        if let Some(days) = spec.experiment.enrollment_period {
            experiment.proposed_enrollment = Some(days);
        }
        if let Some(date) = spec.experiment.start_date {
            experiment.start_date = Some(midnight(date));
        }
        if let Some(date) = spec.experiment.end_date {
            experiment.end_date = Some(midnight(date));
        }

        let platform = experiment.platform;
        let segment_names = spec.experiment.segments.unwrap_or_default();
        if platform.is_mobile() && !segment_names.is_empty() {
            return Err(ConfigError::UnsupportedPlatform {
                feature: "segments",
                platform: platform.app_name(),
            });
        }
        let segments = segment_names
            .into_iter()
            .map(|name| {
                metric::segment(platform, &name).ok_or(ConfigError::UnknownSegment {
                    segment: name,
                    platform: platform.app_name(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut metrics = BTreeMap::new();
        for &period in AnalysisPeriod::ALL.iter() {
            let names = spec.metrics.get(period).cloned().unwrap_or_default();
            let configs = names
                .into_iter()
                .map(|name| {
                    metric::metric_config(platform, &name).ok_or(ConfigError::UnknownMetric {
                        metric: name,
                        platform: platform.app_name(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            metrics.insert(period, configs);
        }

        Ok(AnalysisConfiguration {
            experiment: ExperimentConfiguration {
                experiment,
                skip: spec.experiment.skip.unwrap_or(false),
                segments,
            },
            metrics,
        })
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms(0, 0, 0))
}

/// An experiment with its overrides applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfiguration {
    pub experiment: Experiment,
    pub skip: bool,
    pub segments: Vec<Segment>,
}

impl Deref for ExperimentConfiguration {
    type Target = Experiment;

    fn deref(&self) -> &Experiment {
        &self.experiment
    }
}

/// Everything an `Analysis` is run with. Immutable once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfiguration {
    pub experiment: ExperimentConfiguration,
    pub metrics: BTreeMap<AnalysisPeriod, Vec<MetricConfig>>,
}

impl AnalysisConfiguration {
    /// The platform defaults, without segments or overrides.
    pub fn new(experiment: Experiment) -> Self {
        let metrics = AnalysisPeriod::ALL
            .iter()
            .map(|&period| {
                let configs = metric::default_metric_names(experiment.platform, period)
                    .into_iter()
                    .filter_map(|name| metric::metric_config(experiment.platform, name))
                    .collect();
                (period, configs)
            })
            .collect();
        AnalysisConfiguration {
            experiment: ExperimentConfiguration {
                experiment,
                skip: false,
                segments: Vec::new(),
            },
            metrics,
        }
    }

    pub fn metrics_for(&self, period: AnalysisPeriod) -> &[MetricConfig] {
        self.metrics
            .get(&period)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn with_metrics(mut self, period: AnalysisPeriod, metrics: Vec<MetricConfig>) -> Self {
        self.metrics.insert(period, metrics);
        self
    }

    pub fn with_segments(mut self, segments: Vec<Segment>) -> Self {
        self.experiment.segments = segments;
        self
    }

    pub fn with_skip(mut self, skip: bool) -> Self {
        self.experiment.skip = skip;
        self
    }
}

/// Safety valve against analysing experiments too large to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationPolicy {
    pub max_expected_clients: u64,
}

impl Default for PopulationPolicy {
    fn default() -> Self {
        PopulationPolicy {
            max_expected_clients: 100_000_000,
        }
    }
}

impl PopulationPolicy {
    /// Estimated number of enrolled clients, when both the population
    /// percentage and the enrollment period are known.
    pub fn expected_clients(&self, experiment: &Experiment) -> Option<f64> {
        let percent = experiment.population_percent?;
        let days = experiment.num_dates_enrollment()?;
        Some(experiment.platform.daily_active_clients() as f64 * percent / 100.0 * days as f64)
    }

    pub fn is_high_population(&self, experiment: &Experiment) -> bool {
        experiment.is_high_population
            || self
                .expected_clients(experiment)
                .map_or(false, |clients| clients > self.max_expected_clients as f64)
    }
}

/// Where exported error logs are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfiguration {
    pub bucket: String,
    pub prefix: String,
}

impl Default for ExportConfiguration {
    fn default() -> Self {
        ExportConfiguration {
            bucket: "mozanalysis".to_string(),
            prefix: "errors".to_string(),
        }
    }
}

impl ExportConfiguration {
    pub fn blob_for(&self, table: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}.json", table)
        } else {
            format!("{}/{}.json", self.prefix.trim_end_matches('/'), table)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::experiment::{ExperimentType, Platform};

    fn experiment() -> Experiment {
        let mut experiment = Experiment::new("test-slug", ExperimentType::Pref);
        experiment.normandy_slug = Some("normandy-test-slug".into());
        experiment.start_date = Some(Utc.ymd(2019, 12, 1).and_hms(0, 0, 0));
        experiment.proposed_enrollment = Some(7);
        experiment
    }

    #[test]
    fn overrides_are_applied() {
        let spec = AnalysisSpec::from_toml(
            r#"
            [experiment]
            segments = ["regular_users_v3"]
            enrollment_period = 14
            end_date = "2020-03-01"
            owner = "ignored"

            [metrics]
            weekly = ["active_hours"]
            "#,
        )
        .unwrap();
        let config = spec.resolve(&experiment()).unwrap();
        assert!(!config.experiment.skip);
        assert_eq!(config.experiment.proposed_enrollment, Some(14));
        assert_eq!(config.experiment.end_date, Some(Utc.ymd(2020, 3, 1).and_hms(0, 0, 0)));
        assert_eq!(config.experiment.segments[0].name, "regular_users_v3");
        let weekly: Vec<_> = config
            .metrics_for(AnalysisPeriod::Week)
            .iter()
            .map(|c| c.metric.name.as_str())
            .collect();
        assert_eq!(weekly, vec!["active_hours"]);
        assert_eq!(config.metrics_for(AnalysisPeriod::Days28).len(), 2);
    }

    #[test]
    fn later_specs_win() {
        let mut spec = AnalysisSpec::from_toml("[experiment]\nskip = true").unwrap();
        spec.merge(AnalysisSpec::from_toml("[experiment]\nskip = false").unwrap());
        assert_eq!(spec.experiment.skip, Some(false));
        spec.merge(AnalysisSpec::default());
        assert_eq!(spec.experiment.skip, Some(false));
    }

    #[test]
    fn resolving_is_deterministic() {
        let spec = AnalysisSpec::from_toml("[metrics]\noverall = [\"retained\"]").unwrap();
        assert_eq!(spec.resolve(&experiment()).unwrap(), spec.resolve(&experiment()).unwrap());
    }

    #[test]
    fn unknown_names_are_rejected() {
        let spec = AnalysisSpec::from_toml("[metrics]\nweekly = [\"made_up\"]").unwrap();
        assert!(matches!(
            spec.resolve(&experiment()),
            Err(ConfigError::UnknownMetric { .. })
        ));

        let mut fenix = experiment();
        fenix.platform = Platform::Fenix;
        let spec = AnalysisSpec::from_toml("[experiment]\nsegments = [\"regular_users_v3\"]").unwrap();
        assert!(matches!(
            spec.resolve(&fenix),
            Err(ConfigError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn malformed_specs_fail_to_parse() {
        assert!(matches!(
            AnalysisSpec::from_toml("[experiment]\nskip = \"maybe\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn population_valve() {
        let policy = PopulationPolicy::default();
        let mut experiment = experiment();
        assert!(!policy.is_high_population(&experiment));

        experiment.population_percent = Some(10.0);
        experiment.proposed_enrollment = Some(7);
        // 60M * 10% * 8 days
        assert_eq!(policy.expected_clients(&experiment), Some(48_000_000.0));
        assert!(!policy.is_high_population(&experiment));

        experiment.proposed_enrollment = Some(20);
        assert!(policy.is_high_population(&experiment));

        experiment.proposed_enrollment = None;
        assert!(!policy.is_high_population(&experiment));

        experiment.is_high_population = true;
        assert!(policy.is_high_population(&experiment));
    }

    #[test]
    fn export_blob_names() {
        let export = ExportConfiguration::default();
        assert_eq!(export.blob_for("logs"), "errors/logs.json");
    }
}
