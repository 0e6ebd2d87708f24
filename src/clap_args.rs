/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::executor::RunConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Custom traffic performance testing", long_about = None)]
pub struct Args {
    /// Enable debug logging
    #[arg(long, global = true, overrides_with = "no_debug")]
    pub debug: bool,

    #[arg(long, global = true, hide = true, overrides_with = "debug")]
    pub no_debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run custom traffic performance test using patterns defined in YAML config
    SequentialCtPerftest {
        /// YAML file with a `traffic_patterns` list
        #[arg(value_parser = existing_file)]
        config_file: PathBuf,

        /// Verify buffer contents after transfer
        #[arg(long, overrides_with = "no_verify_buffers")]
        verify_buffers: bool,

        #[arg(long, hide = true, overrides_with = "verify_buffers")]
        no_verify_buffers: bool,

        /// Print received buffer contents
        #[arg(long, overrides_with = "no_print_recv_buffers")]
        print_recv_buffers: bool,

        #[arg(long, hide = true, overrides_with = "print_recv_buffers")]
        no_print_recv_buffers: bool,

        /// Path to save JSON output
        #[arg(long)]
        json_output_path: Option<PathBuf>,

        /// Number of ranks in the process group, defaults to the largest matrix
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        world_size: Option<u32>,
    },
}
impl Commands {
    pub fn run_config(&self) -> RunConfig {
        match self {
            Commands::SequentialCtPerftest {
                verify_buffers,
                print_recv_buffers,
                json_output_path,
                ..
            } => RunConfig {
                verify_buffers: *verify_buffers,
                print_recv_buffers: *print_recv_buffers,
                json_output_path: json_output_path.clone(),
            },
        }
    }
}

fn existing_file(path: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("file '{}' does not exist", path.display()))
    }
}

pub fn parse() -> Args {
    Args::parse()
}
