use anyhow::Error;
use serde_json::Value;
use tracing::warn;

use crate::api::{
    client::ExperimentSource,
    experiment::{Experiment, ExperimentType, ExperimentV1, ExperimentV6},
};
use crate::backend::rest::{Endpoint, Server};

pub const EXPERIMENTER_API_URL: &str = "https://experimenter.services.mozilla.com/api";

/// Lists experiments from both the legacy and the Nimbus endpoints.
pub struct ExperimenterClient {
    server: Server,
}

impl ExperimenterClient {
    pub fn new(server: Server) -> Self {
        ExperimenterClient { server }
    }
}

impl ExperimentSource for ExperimenterClient {
    fn experiments(&mut self) -> Result<Vec<Experiment>, Error> {
        let legacy = self.server.execute(ListExperiments { version: "v1" }, Error::from)?;
        let nimbus = self.server.execute(ListExperiments { version: "v6" }, Error::from)?;
        Ok(collect_experiments(legacy, nimbus))
    }
}

/// Entries that fail to parse are logged and skipped. Nimbus experiments
/// listed by the legacy endpoint are taken from the Nimbus one.
fn collect_experiments(legacy: Vec<Value>, nimbus: Vec<Value>) -> Vec<Experiment> {
    let mut experiments = Vec::new();
    for entry in legacy {
        match serde_json::from_value::<ExperimentV1>(entry) {
            Ok(experiment) if experiment.experiment_type == ExperimentType::Nimbus => {}
            Ok(experiment) => experiments.push(experiment.to_experiment()),
            Err(e) => warn!("Skipping unreadable v1 experiment: {}", e),
        }
    }
    for entry in nimbus {
        match serde_json::from_value::<ExperimentV6>(entry) {
            Ok(experiment) => {
                let slug = experiment.slug.clone();
                match experiment.to_experiment() {
                    Some(experiment) => experiments.push(experiment),
                    None => warn!(experiment = %slug, "Skipping experiment for unsupported application"),
                }
            }
            Err(e) => warn!("Skipping unreadable v6 experiment: {}", e),
        }
    }
    experiments
}

struct ListExperiments {
    version: &'static str,
}
impl Endpoint for ListExperiments {
    const METHOD: fn(&str) -> ureq::Request = ureq::get;
    type Response = Vec<Value>;
    type Value = Vec<Value>;

    fn path(&self) -> Result<String, Error> {
        Ok(format!("{}/experiments/", self.version))
    }

    fn body(&self) -> Result<Option<String>, Error> {
        Ok(None)
    }

    fn extract(response: Self::Response) -> Self::Value {
        response
    }
}
