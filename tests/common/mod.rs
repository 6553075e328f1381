#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

use jetstream::api::{
    client::{
        Backend, EnrollmentPlan, EnrollmentStep, ObjectStorage, Record, StatisticResult,
        StatisticsEngine, StatisticsRequest, Warehouse,
    },
    error::{AnalysisError, StatisticError, StorageError, WarehouseError},
    experiment::{Experiment, ExperimentType, Platform, Status, Variant},
};

pub fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.ymd(y, m, d).and_hms(0, 0, 0)
}

fn variant(slug: &str, is_control: bool) -> Variant {
    Variant {
        slug: slug.to_string(),
        is_control,
        ratio: 1.0,
    }
}

/// Three desktop experiments running from 2019-12-01 to 2020-03-01.
///
/// The first is a regular one, the second has neither an enrollment period
/// worth waiting for nor a Normandy slug, the third has no end date yet.
pub fn experiments() -> Vec<Experiment> {
    let mut first = Experiment::new("test_slug", ExperimentType::Pref);
    first.status = Status::Complete;
    first.start_date = Some(utc(2019, 12, 1));
    first.end_date = Some(utc(2020, 3, 1));
    first.proposed_enrollment = Some(7);
    first.variants = vec![variant("a", false), variant("b", true)];
    first.normandy_slug = Some("normandy-test-slug".to_string());

    let mut second = Experiment::new("test_slug", ExperimentType::Addon);
    second.status = Status::Complete;
    second.start_date = Some(utc(2019, 12, 1));
    second.end_date = Some(utc(2020, 3, 1));
    second.proposed_enrollment = Some(0);

    let mut third = first.clone();
    third.status = Status::Live;
    third.end_date = None;
    third.variants = Vec::new();

    vec![first, second, third]
}

fn mobile(platform: Platform, app_id: &str) -> Experiment {
    let mut experiment = Experiment::new(format!("{}-onboarding", platform.app_name()), ExperimentType::Nimbus);
    experiment.status = Status::Live;
    experiment.start_date = Some(utc(2020, 1, 1));
    experiment.end_date = Some(utc(2020, 3, 1));
    experiment.proposed_enrollment = Some(7);
    experiment.variants = vec![variant("control", true), variant("treatment", false)];
    experiment.normandy_slug = Some(experiment.slug.to_string());
    experiment.platform = platform;
    experiment.app_id = app_id.to_string();
    experiment
}

pub fn fenix_experiments() -> Vec<Experiment> {
    ["org.mozilla.firefox", "org.mozilla.firefox_beta", "org.mozilla.fenix"]
        .iter()
        .map(|app_id| mobile(Platform::Fenix, app_id))
        .collect()
}

pub fn firefox_ios_experiments() -> Vec<Experiment> {
    ["org.mozilla.ios.Firefox", "org.mozilla.ios.FirefoxBeta", "org.mozilla.ios.Fennec"]
        .iter()
        .map(|app_id| mobile(Platform::FirefoxIos, app_id))
        .collect()
}

pub fn focus_android_experiments() -> Vec<Experiment> {
    ["org.mozilla.focus", "org.mozilla.focus.beta", "org.mozilla.focus.nightly"]
        .iter()
        .map(|app_id| mobile(Platform::FocusAndroid, app_id))
        .collect()
}

pub fn klar_android_experiments() -> Vec<Experiment> {
    vec![mobile(Platform::KlarAndroid, "org.mozilla.klar")]
}

#[derive(Default)]
pub struct FakeWarehouse {
    pub dry_runs: Vec<String>,
    pub executed: Vec<(String, Option<String>)>,
    pub tables: HashMap<String, Vec<Record>>,
    /// Dry runs of queries containing this text fail.
    pub reject: Option<String>,
    /// Called with every dry-run query.
    pub inspect: Option<Box<dyn FnMut(&str)>>,
}

impl Warehouse for FakeWarehouse {
    fn execute(&mut self, query: &str, destination: Option<&str>) -> Result<(), WarehouseError> {
        self.executed
            .push((query.to_string(), destination.map(str::to_string)));
        Ok(())
    }

    fn dry_run(&mut self, query: &str) -> Result<(), WarehouseError> {
        self.dry_runs.push(query.to_string());
        if let Some(inspect) = self.inspect.as_mut() {
            inspect(query);
        }
        match &self.reject {
            Some(text) if query.contains(text.as_str()) => {
                anyhow::bail!("Syntax error: Unexpected identifier {}", text)
            }
            _ => Ok(()),
        }
    }

    fn table_to_records(&mut self, table: &str) -> Result<Vec<Record>, WarehouseError> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Not found: Table {}", table))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub bucket: String,
    pub blob: String,
    pub data: String,
    pub content_type: String,
}

#[derive(Default)]
pub struct FakeStorage {
    pub uploads: Vec<Upload>,
}

impl ObjectStorage for FakeStorage {
    fn upload_from_string(&mut self, bucket: &str, blob: &str, data: &str, content_type: &str) -> Result<(), StorageError> {
        self.uploads.push(Upload {
            bucket: bucket.to_string(),
            blob: blob.to_string(),
            data: data.to_string(),
            content_type: content_type.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEnrollments {
    pub plans: Vec<EnrollmentPlan>,
}

impl EnrollmentStep for RecordingEnrollments {
    fn ensure_enrollments(&mut self, plan: &EnrollmentPlan) -> Result<(), AnalysisError> {
        self.plans.push(plan.clone());
        Ok(())
    }
}

/// Answers every request with a single result for branch `b`, except for
/// the (metric, statistic) pairs in `failures`.
#[derive(Default)]
pub struct FakeStatistics {
    pub requests: Vec<(String, String, Option<String>)>,
    pub failures: HashMap<(String, String), StatisticError>,
}

impl StatisticsEngine for FakeStatistics {
    fn compute(&mut self, request: &StatisticsRequest<'_>) -> Result<Vec<StatisticResult>, StatisticError> {
        let key = (request.metric.to_string(), request.statistic.name.clone());
        self.requests.push((
            key.0.clone(),
            key.1.clone(),
            request.segment.map(|segment| segment.name.clone()),
        ));
        if let Some(error) = self.failures.get(&key) {
            return Err(error.clone());
        }
        Ok(vec![StatisticResult {
            metric: key.0,
            statistic: key.1,
            branch: "b".to_string(),
            comparison: None,
            point: Some(1.0),
            lower: Some(0.5),
            upper: Some(1.5),
            segment: request
                .segment
                .map_or_else(|| "all".to_string(), |segment| segment.name.clone()),
            analysis_basis: Some("enrollments".to_string()),
            window_index: None,
            last_date: None,
        }])
    }
}

/// Every collaborator of a run, faked.
#[derive(Default)]
pub struct Fakes {
    pub warehouse: FakeWarehouse,
    pub enrollments: RecordingEnrollments,
    pub statistics: FakeStatistics,
}

impl Fakes {
    pub fn backend(&mut self) -> Backend<'_> {
        Backend {
            warehouse: &mut self.warehouse,
            enrollments: &mut self.enrollments,
            statistics: &mut self.statistics,
        }
    }
}
