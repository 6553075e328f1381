pub mod analysis;
pub mod api;
pub mod backend;
pub mod config;
pub mod logging;
pub mod tracking;

pub use analysis::{period::AnalysisPeriod, time_limits::TimeLimits, Analysis};
pub use api::experiment::{Experiment, Platform, Variant};
pub use api::id::{RunId, Slug};
pub use config::{AnalysisConfiguration, AnalysisSpec};

/// Utility function to create a run timestamp.
pub fn timestamp() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
