use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{
    id::{normalize, Slug},
    opt_iso_date, opt_ms_timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentType {
    Pref,
    Addon,
    Rollout,
    Message,
    Nimbus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Draft,
    Preview,
    Live,
    Complete,
    #[serde(other)]
    Unknown,
}

/// How enrollments are recorded by a platform's telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentsQueryType {
    /// `normandy` enroll events in the desktop events table.
    Normandy,
    /// `nimbus_events.enrollment` Glean events in the application's dataset.
    GleanEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    FirefoxDesktop,
    Fenix,
    FirefoxIos,
    FocusAndroid,
    KlarAndroid,
    FocusIos,
    KlarIos,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::FirefoxDesktop,
        Platform::Fenix,
        Platform::FirefoxIos,
        Platform::FocusAndroid,
        Platform::KlarAndroid,
        Platform::FocusIos,
        Platform::KlarIos,
    ];

    pub fn app_name(self) -> &'static str {
        match self {
            Platform::FirefoxDesktop => "firefox_desktop",
            Platform::Fenix => "fenix",
            Platform::FirefoxIos => "firefox_ios",
            Platform::FocusAndroid => "focus_android",
            Platform::KlarAndroid => "klar_android",
            Platform::FocusIos => "focus_ios",
            Platform::KlarIos => "klar_ios",
        }
    }

    pub fn from_app_name(app_name: &str) -> Option<Self> {
        Platform::ALL
            .iter()
            .copied()
            .find(|platform| platform.app_name() == app_name)
    }

    /// The release channel's application id.
    pub fn default_app_id(self) -> &'static str {
        match self {
            Platform::FirefoxDesktop => "firefox-desktop",
            Platform::Fenix => "org.mozilla.firefox",
            Platform::FirefoxIos => "org.mozilla.ios.Firefox",
            Platform::FocusAndroid => "org.mozilla.focus",
            Platform::KlarAndroid => "org.mozilla.klar",
            Platform::FocusIos => "org.mozilla.ios.Focus",
            Platform::KlarIos => "org.mozilla.ios.Klar",
        }
    }

    pub fn is_mobile(self) -> bool {
        self != Platform::FirefoxDesktop
    }

    pub fn enrollments_query_type(self) -> EnrollmentsQueryType {
        match self {
            Platform::FirefoxDesktop => EnrollmentsQueryType::Normandy,
            _ => EnrollmentsQueryType::GleanEvent,
        }
    }

    /// Rough number of clients active on a single day, the base of the
    /// population estimate.
    pub fn daily_active_clients(self) -> u64 {
        match self {
            Platform::FirefoxDesktop => 60_000_000,
            Platform::Fenix => 10_000_000,
            Platform::FirefoxIos => 3_000_000,
            Platform::FocusAndroid => 1_000_000,
            Platform::FocusIos => 500_000,
            Platform::KlarAndroid => 100_000,
            Platform::KlarIos => 50_000,
        }
    }

    /// Warehouse dataset holding the application's tables.
    pub fn dataset_for(self, app_id: &str) -> String {
        let dataset = normalize(app_id);
        if self.is_mobile() {
            dataset.to_lowercase()
        } else {
            dataset
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub slug: String,
    pub is_control: bool,
    pub ratio: f64,
}

/// Everything the analysis needs to know about one experiment.
///
/// Built once from one of the Experimenter formats and never changed
/// afterwards; every scheduling decision is a function of this value and a
/// date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub slug: Slug,
    pub experiment_type: ExperimentType,
    pub status: Status,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub proposed_enrollment: Option<u32>,
    pub variants: Vec<Variant>,
    pub normandy_slug: Option<String>,
    pub platform: Platform,
    pub app_id: String,
    pub population_percent: Option<f64>,
    pub is_high_population: bool,
}

impl Experiment {
    /// A desktop experiment with no dates, branches or enrollment yet.
    pub fn new(slug: impl Into<Slug>, experiment_type: ExperimentType) -> Self {
        Experiment {
            slug: slug.into(),
            experiment_type,
            status: Status::Draft,
            start_date: None,
            end_date: None,
            proposed_enrollment: None,
            variants: Vec::new(),
            normandy_slug: None,
            platform: Platform::FirefoxDesktop,
            app_id: Platform::FirefoxDesktop.default_app_id().to_string(),
            population_percent: None,
            is_high_population: false,
        }
    }

    /// The slug used in logs and errors: the Normandy slug when deployed.
    pub fn log_slug(&self) -> &str {
        self.normandy_slug
            .as_deref()
            .unwrap_or_else(|| self.slug.as_ref())
    }

    /// Number of enrollment dates: the proposed enrollment plus the start date.
    pub fn num_dates_enrollment(&self) -> Option<i64> {
        self.proposed_enrollment.map(|days| i64::from(days) + 1)
    }

    pub fn bigquery_dataset(&self) -> String {
        self.platform.dataset_for(&self.app_id)
    }

    pub fn reference_branch(&self) -> Option<&str> {
        self.variants
            .iter()
            .find(|variant| variant.is_control)
            .map(|variant| variant.slug.as_str())
    }
}

// EXPERIMENTER V1 (legacy Normandy experiments, desktop only)

#[derive(Debug, Clone, Deserialize)]
pub struct VariantV1 {
    pub slug: String,
    pub is_control: bool,
    pub ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentV1 {
    #[serde(rename = "type")]
    pub experiment_type: ExperimentType,
    pub slug: String,
    pub status: Status,
    #[serde(default, with = "opt_ms_timestamp")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, with = "opt_ms_timestamp")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub proposed_enrollment: Option<u32>,
    #[serde(default)]
    pub normandy_slug: Option<String>,
    #[serde(default)]
    pub population_percent: Option<String>,
    pub variants: Vec<VariantV1>,
}

impl ExperimentV1 {
    pub fn to_experiment(self) -> Experiment {
        let population_percent = self
            .population_percent
            .as_deref()
            .and_then(|percent| percent.trim().parse::<f64>().ok());
        Experiment {
            slug: self.slug.into(),
            experiment_type: self.experiment_type,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
            proposed_enrollment: self.proposed_enrollment,
            variants: self
                .variants
                .into_iter()
                .map(|v| Variant {
                    slug: v.slug,
                    is_control: v.is_control,
                    ratio: v.ratio,
                })
                .collect(),
            normandy_slug: self.normandy_slug,
            platform: Platform::FirefoxDesktop,
            app_id: Platform::FirefoxDesktop.default_app_id().to_string(),
            population_percent,
            is_high_population: false,
        }
    }
}

// EXPERIMENTER V6 (Nimbus)

#[derive(Debug, Clone, Deserialize)]
pub struct BranchV6 {
    pub slug: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentV6 {
    pub slug: String,
    pub app_name: String,
    pub app_id: String,
    #[serde(default, with = "opt_iso_date")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, with = "opt_iso_date")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub proposed_enrollment: Option<f64>,
    #[serde(default)]
    pub reference_branch: Option<String>,
    #[serde(default)]
    pub is_high_population: bool,
    pub branches: Vec<BranchV6>,
}

impl ExperimentV6 {
    /// `None` when the experiment targets an application this crate cannot analyse.
    pub fn to_experiment(self) -> Option<Experiment> {
        let platform = Platform::from_app_name(&self.app_name)?;
        let reference_branch = self.reference_branch;
        let status = if self.end_date.is_some() {
            Status::Complete
        } else {
            Status::Live
        };
        Some(Experiment {
            normandy_slug: Some(self.slug.clone()),
            slug: self.slug.into(),
            experiment_type: ExperimentType::Nimbus,
            status,
            start_date: self.start_date,
            end_date: self.end_date,
            proposed_enrollment: self
                .proposed_enrollment
                .filter(|days| *days >= 0.0)
                .map(|days| days.round() as u32),
            variants: self
                .branches
                .into_iter()
                .map(|b| Variant {
                    is_control: reference_branch.as_deref() == Some(b.slug.as_str()),
                    slug: b.slug,
                    ratio: b.ratio,
                })
                .collect(),
            platform,
            app_id: self.app_id,
            population_percent: None,
            is_high_population: self.is_high_population,
        })
    }
}
