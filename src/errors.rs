/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning a config file into traffic patterns. Any of these aborts the run
/// before the first pattern is launched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file is not valid YAML")]
    Parse(#[from] serde_yaml::Error),

    #[error("Config file must contain 'traffic_patterns' key")]
    MissingTrafficPatterns,

    #[error("'traffic_patterns' must be a list of traffic pattern records")]
    TrafficPatternsNotAList,

    #[error("traffic pattern {index} must be a mapping of option names to values")]
    RecordNotAMapping { index: usize },

    #[error("Traffic pattern {index} missing required fields: {fields:?}")]
    MissingFields { index: usize, fields: Vec<String> },

    #[error("traffic pattern {index} has an invalid '{field}': {reason}")]
    InvalidField {
        index: usize,
        field: String,
        reason: String,
    },

    #[error("traffic pattern {index} failed to load 'matrix_file' {path}")]
    Matrix {
        index: usize,
        path: PathBuf,
        #[source]
        source: MatrixError,
    },
}

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("unable to read matrix file")]
    Io(#[from] std::io::Error),

    #[error("matrix file is not valid YAML")]
    Yaml(#[from] serde_yaml::Error),

    #[error("line {line}: '{token}' is not a valid transfer size")]
    InvalidCell { line: usize, token: String },

    #[error("row {row} has {found} cells, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("matrix has no cells")]
    Empty,
}

/// Errors raised while a single pattern executes. These are recorded against the pattern and the
/// run carries on with the next one.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("pattern needs {required} ranks but the process group only has {world_size}")]
    NotEnoughRanks { required: usize, world_size: usize },

    #[error("failed to allocate buffers: {0}")]
    Allocation(String),

    #[error("failed to launch transfer {src} -> {dst}: {reason}")]
    Launch {
        src: usize,
        dst: usize,
        reason: String,
    },

    #[error("transfer did not complete: {0}")]
    Completion(String),
}
