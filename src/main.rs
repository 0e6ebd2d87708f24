/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use ctperf::{
    clap_args::{self, Commands},
    engine::loopback::LoopbackEngine,
    load_traffic_patterns,
    matrix::FileMatrixLoader,
    required_world_size,
    runtime::LocalRuntime,
    sequential_ct_perftest, with_teardown,
};
use tracing::{info, subscriber::set_global_default, Subscriber};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = clap_args::parse();

    let level = if args.debug { "debug" } else { "info" };
    set_global_default(get_subscriber(level.into()))?;

    let run_config = args.command.run_config();
    match args.command {
        Commands::SequentialCtPerftest {
            config_file,
            world_size,
            ..
        } => {
            let patterns = load_traffic_patterns(&config_file, &FileMatrixLoader)?;

            let world_size = world_size
                .map(|n| n as usize)
                .unwrap_or_else(|| required_world_size(&patterns));
            let runtime = LocalRuntime::new(world_size);
            let mut engine = LoopbackEngine::new();

            let run = with_teardown(
                &runtime,
                sequential_ct_perftest(patterns, &runtime, &mut engine, &run_config),
            )
            .await?;
            info!("Finished run {}", run.run_id);
        }
    }

    Ok(())
}

fn get_subscriber(env_filter: String) -> impl Subscriber + Sync + Send {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish()
}
