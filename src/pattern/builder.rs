/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{
    shards_from, sleep_duration, MemType, TrafficPattern, XferOp, DEFAULT_MEM_TYPE,
    DEFAULT_SHARDS, DEFAULT_SLEEP_AFTER_LAUNCH_SEC, DEFAULT_XFER_OP,
};
use crate::{errors::ConfigError, matrix::MatrixLoader};
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;
use tracing::{debug, warn};

pub const MATRIX_FILE: &str = "matrix_file";
pub const SHARDS: &str = "shards";
pub const MEM_TYPE: &str = "mem_type";
pub const XFER_OP: &str = "xfer_op";
pub const SLEEP_AFTER_LAUNCH_SEC: &str = "sleep_after_launch_sec";

pub const REQUIRED_FIELDS: [&str; 1] = [MATRIX_FILE];
const KNOWN_FIELDS: [&str; 5] = [MATRIX_FILE, SHARDS, MEM_TYPE, XFER_OP, SLEEP_AFTER_LAUNCH_SEC];

/// Turns raw `traffic_patterns` records into validated [`TrafficPattern`]s.
pub struct PatternBuilder<'a> {
    loader: &'a dyn MatrixLoader,
}
impl<'a> PatternBuilder<'a> {
    pub fn new(loader: &'a dyn MatrixLoader) -> Self {
        Self { loader }
    }

    /// Builds every record in order, stopping at the first invalid one.
    pub fn build_all(&self, records: &[Value]) -> Result<Vec<TrafficPattern>, ConfigError> {
        records
            .iter()
            .enumerate()
            .map(|(index, record)| match record {
                Value::Mapping(record) => self.build(index, record),
                _ => Err(ConfigError::RecordNotAMapping { index }),
            })
            .collect()
    }

    /// Builds a single traffic pattern.
    ///
    /// Missing required fields are all reported together. Optional fields fall back to their
    /// defaults and are normalised (`mem_type` lower case, `xfer_op` upper case). The matrix file
    /// is loaded exactly once, after every option has been validated.
    ///
    /// # Arguments
    /// * index - position of the record in `traffic_patterns`, used in error messages
    /// * record - the raw record
    pub fn build(&self, index: usize, record: &Mapping) -> Result<TrafficPattern, ConfigError> {
        let missing = missing_fields(record);
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields {
                index,
                fields: missing,
            });
        }

        for key in record.keys() {
            match key.as_str() {
                Some(name) if KNOWN_FIELDS.contains(&name) => {}
                _ => warn!("Ignoring unknown option {:?} in traffic pattern {}", key, index),
            }
        }

        let invalid = |field: &str, reason: String| ConfigError::InvalidField {
            index,
            field: field.to_string(),
            reason,
        };

        let matrix_file = match field(record, MATRIX_FILE) {
            Some(Value::String(path)) => PathBuf::from(path),
            Some(other) => {
                return Err(invalid(
                    MATRIX_FILE,
                    format!("expected a path, found {:?}", other),
                ))
            }
            None => {
                return Err(ConfigError::MissingFields {
                    index,
                    fields: vec![MATRIX_FILE.to_string()],
                })
            }
        };

        let shards = match field(record, SHARDS) {
            None => DEFAULT_SHARDS,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| format!("expected a positive integer, found {:?}", value))
                .and_then(shards_from)
                .map_err(|reason| invalid(SHARDS, reason))?,
        };

        let mem_type = match field(record, MEM_TYPE) {
            None => DEFAULT_MEM_TYPE,
            Some(Value::String(s)) => s.parse::<MemType>().map_err(|e| invalid(MEM_TYPE, e))?,
            Some(other) => {
                return Err(invalid(
                    MEM_TYPE,
                    format!("expected a string, found {:?}", other),
                ))
            }
        };

        let xfer_op = match field(record, XFER_OP) {
            None => DEFAULT_XFER_OP,
            Some(Value::String(s)) => s.parse::<XferOp>().map_err(|e| invalid(XFER_OP, e))?,
            Some(other) => {
                return Err(invalid(
                    XFER_OP,
                    format!("expected a string, found {:?}", other),
                ))
            }
        };

        let sleep_after_launch_sec = match field(record, SLEEP_AFTER_LAUNCH_SEC) {
            None => DEFAULT_SLEEP_AFTER_LAUNCH_SEC,
            Some(value) => value.as_f64().ok_or_else(|| {
                invalid(
                    SLEEP_AFTER_LAUNCH_SEC,
                    format!("expected a non-negative number, found {:?}", value),
                )
            })?,
        };
        let sleep_after_launch = sleep_duration(sleep_after_launch_sec)
            .map_err(|reason| invalid(SLEEP_AFTER_LAUNCH_SEC, reason))?;

        let matrix = self
            .loader
            .load(&matrix_file)
            .map_err(|source| ConfigError::Matrix {
                index,
                path: matrix_file.clone(),
                source,
            })?;

        debug!(
            "Built traffic pattern {}: {} ({} ranks), shards={}, mem_type={}, xfer_op={}, sleep={}s",
            index,
            matrix_file.display(),
            matrix.dim(),
            shards,
            mem_type,
            xfer_op,
            sleep_after_launch_sec
        );

        Ok(TrafficPattern {
            matrix_file,
            matrix,
            shards,
            mem_type,
            xfer_op,
            sleep_after_launch_sec,
            sleep_after_launch,
        })
    }
}

/// Looks up an option, treating an explicit `null` the same as an absent key.
fn field<'r>(record: &'r Mapping, name: &str) -> Option<&'r Value> {
    record.get(name).filter(|value| !value.is_null())
}

fn missing_fields(record: &Mapping) -> Vec<String> {
    REQUIRED_FIELDS
        .iter()
        .filter(|name| field(record, name).is_none())
        .map(|name| name.to_string())
        .collect()
}
