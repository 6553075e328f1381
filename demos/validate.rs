use anyhow::Result;
use jetstream::{
    api::{client::ExperimentSource, experiment::Status},
    backend::{
        bigquery::{BigQueryClient, BIGQUERY_API_URL},
        experimenter::{ExperimenterClient, EXPERIMENTER_API_URL},
        gcs::{StorageClient, STORAGE_UPLOAD_API_URL},
        rest::Server,
    },
    logging::{self, LogConfiguration},
    Analysis, AnalysisSpec,
};
use tracing::{error, info, warn};

struct Args {
    project: String,
    dataset: String,
    token: String,
    slug: Option<String>,
    config: Option<String>,
    log_table: Option<String>,
    export_name: Option<String>,
}

impl Args {
    pub fn from_env() -> Result<Self> {
        let mut args = pico_args::Arguments::from_env();
        Ok(Args {
            project: args
                .opt_value_from_str(["-p", "--project"])?
                .unwrap_or_else(|| "moz-fx-data-experiments".to_string()),
            dataset: args
                .opt_value_from_str(["-d", "--dataset"])?
                .unwrap_or_else(|| "mozanalysis".to_string()),
            token: args.value_from_str(["-t", "--token"])?,
            slug: args.opt_value_from_str(["-s", "--slug"])?,
            config: args.opt_value_from_str(["-c", "--config"])?,
            log_table: args.opt_value_from_str(["-l", "--log-table"])?,
            export_name: args.opt_value_from_str(["-e", "--export-name"])?,
        })
    }
}

fn main() -> Result<()> {
    let args = Args::from_env()?;
    let collector = logging::init("info")?;

    let spec = match &args.config {
        Some(path) => AnalysisSpec::from_toml(&std::fs::read_to_string(path)?)?,
        None => AnalysisSpec::default(),
    };

    let mut experimenter = ExperimenterClient::new(Server::new(EXPERIMENTER_API_URL));
    let mut bigquery = BigQueryClient::new(
        Server::new(BIGQUERY_API_URL).with_token(args.token.clone()),
        args.project.clone(),
    );

    let experiments = experimenter.experiments()?;
    let live = experiments.into_iter().filter(|experiment| match &args.slug {
        Some(slug) => experiment.slug.as_ref() == slug.as_str(),
        None => experiment.status == Status::Live,
    });

    let mut failed = 0;
    let mut analyses = Vec::new();
    for experiment in live {
        let slug = experiment.log_slug().to_string();
        let config = match spec.resolve(&experiment) {
            Ok(config) => config,
            Err(err) => {
                warn!(experiment = %slug, "{}", err);
                continue;
            }
        };
        let mut analysis = Analysis::new(args.project.as_str(), args.dataset.as_str(), config);
        if let Some(table) = &args.log_table {
            analysis = analysis.with_log_config(LogConfiguration::new(
                args.project.as_str(),
                args.dataset.as_str(),
                table.as_str(),
            ));
        }
        match analysis.validate(&mut bigquery) {
            Ok(()) => info!(experiment = %slug, "Valid"),
            Err(err) if err.is_expected() => warn!(experiment = %slug, "{}", err),
            Err(err) => {
                failed += 1;
                error!(
                    experiment = %slug,
                    exception_type = err.exception_type(),
                    "{}",
                    err
                );
            }
        }
        analyses.push(analysis);
    }

    if let Some(table) = &args.log_table {
        let config = LogConfiguration::new(args.project.as_str(), args.dataset.as_str(), table.as_str());
        let written = collector.flush(&mut bigquery, &config)?;
        info!(written, table = %config.log_table(), "Flushed logs");

        if let Some(name) = &args.export_name {
            let mut storage =
                StorageClient::new(Server::new(STORAGE_UPLOAD_API_URL).with_token(args.token.clone()));
            for analysis in &analyses {
                analysis.export_errors(&mut bigquery, &mut storage, name)?;
            }
        }
    }

    println!("{} experiment(s) failed validation", failed);
    Ok(())
}
