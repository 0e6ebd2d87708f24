/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod clap_args;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod matrix;
pub mod pattern;
pub mod results;
pub mod runtime;
pub mod verify;

use anyhow::Context;
use config::Config;
use engine::TransferEngine;
use executor::{RunConfig, SequentialExecutor};
use matrix::MatrixLoader;
use pattern::TrafficPattern;
use results::RunResult;
use runtime::DistRuntime;
use std::{future::Future, path::Path};
use tracing::{error, info, warn};

/// Reads the config file and builds every traffic pattern it lists. Any problem here is fatal and
/// is reported before a single pattern runs.
///
/// # Arguments
/// * config_file - path to the YAML config
/// * loader - used to load each pattern's matrix file
pub fn load_traffic_patterns(
    config_file: &Path,
    loader: &dyn MatrixLoader,
) -> anyhow::Result<Vec<TrafficPattern>> {
    let config = Config::try_from_path(config_file)?;
    let patterns = config
        .traffic_patterns(loader)
        .context(format!("Invalid config file {}", config_file.display()))?;

    info!(
        "Loaded {} traffic patterns from {}",
        patterns.len(),
        config_file.display()
    );
    Ok(patterns)
}

/// Smallest process group able to run every pattern.
pub fn required_world_size(patterns: &[TrafficPattern]) -> usize {
    patterns
        .iter()
        .map(|pattern| pattern.ranks())
        .max()
        .unwrap_or(1)
}

/// Runs the patterns back to back and returns the per-pattern results. Failed patterns are part
/// of the result, they do not make this function fail.
pub async fn sequential_ct_perftest(
    patterns: Vec<TrafficPattern>,
    runtime: &dyn DistRuntime,
    engine: &mut dyn TransferEngine,
    run_config: &RunConfig,
) -> anyhow::Result<RunResult> {
    let run = SequentialExecutor::new(patterns)
        .run(runtime, engine, run_config)
        .await?;

    let failures = run.failures();
    if failures > 0 {
        warn!(
            "{} of {} traffic patterns did not succeed",
            failures,
            run.patterns.len()
        );
    }

    Ok(run)
}

/// Awaits `work` and then tears the process group down, whether `work` succeeded or not.
///
/// An error from `work` takes precedence over an error from the teardown.
pub async fn with_teardown<T, F>(runtime: &dyn DistRuntime, work: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let res = work.await;
    let teardown = runtime
        .destroy()
        .await
        .context("Failed to tear down the process group");

    match (res, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(teardown_err)) => {
            error!("{:#}", teardown_err);
            Err(err)
        }
    }
}
