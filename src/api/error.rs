use thiserror::Error;

pub type WarehouseError = anyhow::Error;
pub type StorageError = anyhow::Error;

/// Reasons a single experiment's analysis stops.
///
/// None of these are handled inside the pipeline; a batch driver is
/// expected to log them and carry on with the next experiment.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Skipping {0}; skip=true in config")]
    ExplicitSkip(String),
    #[error("{0} -> Experiment has no Normandy slug")]
    NoSlug(String),
    #[error("{0} -> Experiment has no start date")]
    NoStartDate(String),
    #[error("{0} -> Experiment has no enrollment period")]
    NoEnrollmentPeriod(String),
    #[error("{0} -> Experiment has a high population")]
    HighPopulation(String),
    #[error("{0} -> Enrollment period is longer than analysis dates")]
    EnrollmentLongerThanAnalysis(String),
    #[error("no log configuration to read errors from")]
    MissingLogConfiguration,
    #[error("an error ocurred in the warehouse: {0:?}")]
    Warehouse(#[source] WarehouseError),
    #[error("an error ocurred in the object storage: {0:?}")]
    Storage(#[source] StorageError),
    #[error("serializing {0} failed")]
    Serialization(&'static str, #[source] serde_json::Error),
}

impl AnalysisError {
    /// The name written to the `exception_type` column of the log table.
    pub fn exception_type(&self) -> &'static str {
        match self {
            AnalysisError::ExplicitSkip(_) => "ExplicitSkipException",
            AnalysisError::NoSlug(_) => "NoSlugException",
            AnalysisError::NoStartDate(_) => "NoStartDateException",
            AnalysisError::NoEnrollmentPeriod(_) => "NoEnrollmentPeriodException",
            AnalysisError::HighPopulation(_) => "HighPopulationException",
            AnalysisError::EnrollmentLongerThanAnalysis(_) => {
                "EnrollmentLongerThanAnalysisException"
            }
            AnalysisError::MissingLogConfiguration => "MissingLogConfigurationException",
            AnalysisError::Warehouse(_) => "WarehouseException",
            AnalysisError::Storage(_) => "StorageException",
            AnalysisError::Serialization(..) => "SerializationException",
        }
    }

    /// Operator opt-outs are expected and only worth a warning.
    pub fn is_expected(&self) -> bool {
        matches!(self, AnalysisError::ExplicitSkip(_))
    }
}

/// Failure of the statistics engine for one metric and statistic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatisticError {
    #[error("Error statistic {statistic} metric {metric}: {message}")]
    Computation {
        metric: String,
        statistic: String,
        message: String,
    },
    #[error("Error statistic {statistic} metric {metric}: {message}")]
    Critical {
        metric: String,
        statistic: String,
        message: String,
    },
}

impl StatisticError {
    pub fn exception_type(&self) -> &'static str {
        match self {
            StatisticError::Computation { .. } => "StatisticComputationException",
            StatisticError::Critical { .. } => "CriticalStatisticComputationException",
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, StatisticError::Critical { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("the analysis spec could not be parsed: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("the metric {metric} is not defined for {platform}")]
    UnknownMetric { metric: String, platform: &'static str },
    #[error("the segment {segment} is not defined for {platform}")]
    UnknownSegment { segment: String, platform: &'static str },
    #[error("{feature} are not supported on {platform}")]
    UnsupportedPlatform {
        feature: &'static str,
        platform: &'static str,
    },
}
