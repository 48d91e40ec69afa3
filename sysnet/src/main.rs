use std::{env, fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use log::info;
use serde::Serialize;

use sysnet::{
    catalog::{Catalog, Sample},
    config::SysnetConfig,
    ensemble::SystematicWeight,
    pipeline::{Pipeline, RunFailure, RunReport},
};

const USAGE: &str = "usage: sysnet <config.json> <samples.json> <weights.json> [checkpoints.json]";

/// The persisted result of a pipeline run.
#[derive(Serialize)]
struct Report<'a> {
    weights: &'a [SystematicWeight],
    mean_weight: f32,
    runs: &'a [RunReport],
    failures: &'a [RunFailure],
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<PathBuf> = env::args_os().skip(1).map(PathBuf::from).collect();
    let [config_path, samples_path, output_path, rest @ ..] = args.as_slice() else {
        bail!(USAGE);
    };

    if rest.len() > 1 {
        bail!(USAGE);
    }

    let config = SysnetConfig::from_path(config_path)
        .with_context(|| format!("reading the config at {}", config_path.display()))?;

    let raw = fs::read_to_string(samples_path)
        .with_context(|| format!("reading the samples at {}", samples_path.display()))?;
    let samples: Vec<Sample> = serde_json::from_str(&raw).context("parsing the samples")?;
    let catalog = Catalog::new(samples)?;
    info!(samples = catalog.len(), templates = catalog.x_size(); "catalog loaded");

    let mut pipeline = Pipeline::new(config)?;
    pipeline.tune(&catalog)?;

    let (output, map) = pipeline.run_and_ensemble(&catalog)?;

    let report = Report {
        weights: &map.weights,
        mean_weight: map.mean_weight(),
        runs: &output.reports,
        failures: &output.failures,
    };

    fs::write(output_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("writing the weights to {}", output_path.display()))?;
    info!("weights written to {}", output_path.display());

    if let Some(checkpoints_path) = rest.first() {
        fs::write(checkpoints_path, serde_json::to_string(&output.checkpoints)?)
            .with_context(|| format!("writing the checkpoints to {}", checkpoints_path.display()))?;
        info!("checkpoints written to {}", checkpoints_path.display());
    }

    Ok(())
}
