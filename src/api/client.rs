use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::{
    error::{AnalysisError, StatisticError, StorageError, WarehouseError},
    experiment::Experiment,
    metric::{Segment, Statistic},
};

/// A row of a warehouse table, keyed by column name.
pub type Record = Map<String, Value>;

/// The columnar warehouse the metric queries run against.
#[rustfmt::skip]
pub trait Warehouse {
    /// Run `query`, replacing `destination` with its result when given.
    fn execute(&mut self, query: &str, destination: Option<&str>) -> Result<(), WarehouseError>;
    /// Check `query` without running or billing it.
    fn dry_run(&mut self, query: &str) -> Result<(), WarehouseError>;
    fn table_to_records(&mut self, table: &str) -> Result<Vec<Record>, WarehouseError>;
}

impl<W: Warehouse + ?Sized> Warehouse for &mut W {
    fn execute(&mut self, query: &str, destination: Option<&str>) -> Result<(), WarehouseError> {
        (**self).execute(query, destination)
    }

    fn dry_run(&mut self, query: &str) -> Result<(), WarehouseError> {
        (**self).dry_run(query)
    }

    fn table_to_records(&mut self, table: &str) -> Result<Vec<Record>, WarehouseError> {
        (**self).table_to_records(table)
    }
}

#[rustfmt::skip]
pub trait ObjectStorage {
    fn upload_from_string(&mut self, bucket: &str, blob: &str, data: &str, content_type: &str) -> Result<(), StorageError>;
}

pub trait ExperimentSource {
    fn experiments(&mut self) -> Result<Vec<Experiment>, anyhow::Error>;
}

/// What `ensure_enrollments` needs to materialize the enrollment cohort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentPlan {
    pub table: String,
    pub query: String,
    pub dry_run: bool,
}

pub trait EnrollmentStep {
    fn ensure_enrollments(&mut self, plan: &EnrollmentPlan) -> Result<(), AnalysisError>;
}

/// Creates the enrollments table once; later runs reuse it.
pub struct WarehouseEnrollments<W> {
    warehouse: W,
}

impl<W: Warehouse> WarehouseEnrollments<W> {
    pub fn new(warehouse: W) -> Self {
        WarehouseEnrollments { warehouse }
    }

    pub fn into_inner(self) -> W {
        self.warehouse
    }
}

impl<W: Warehouse> EnrollmentStep for WarehouseEnrollments<W> {
    fn ensure_enrollments(&mut self, plan: &EnrollmentPlan) -> Result<(), AnalysisError> {
        if plan.dry_run {
            return self
                .warehouse
                .dry_run(&plan.query)
                .map_err(AnalysisError::Warehouse);
        }
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS `{}` AS\n{}",
            plan.table, plan.query
        );
        self.warehouse
            .execute(&statement, None)
            .map_err(AnalysisError::Warehouse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsRequest<'a> {
    pub metrics_table: &'a str,
    pub metric: &'a str,
    pub statistic: &'a Statistic,
    /// `None` for the whole population.
    pub segment: Option<&'a Segment>,
    pub reference_branch: Option<&'a str>,
}

/// One computed value for one branch, as returned by the statistics library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticResult {
    pub metric: String,
    pub statistic: String,
    pub branch: String,
    pub comparison: Option<String>,
    pub point: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub segment: String,
    pub analysis_basis: Option<String>,
    pub window_index: Option<String>,
    pub last_date: Option<NaiveDate>,
}

pub trait StatisticsEngine {
    fn compute(&mut self, request: &StatisticsRequest<'_>) -> Result<Vec<StatisticResult>, StatisticError>;
}

/// Collaborators of a single `Analysis::run`.
pub struct Backend<'a> {
    pub warehouse: &'a mut dyn Warehouse,
    pub enrollments: &'a mut dyn EnrollmentStep,
    pub statistics: &'a mut dyn StatisticsEngine,
}
