/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    pattern::{MemType, XferOp},
    verify::Verification,
};
use anyhow::Context;
use colored::*;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use term_table::{row, row::Row, rows, table_cell::*, Table, TableStyle};

/// How a single pattern ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PatternOutcome {
    Success,
    TransferError { message: String },
    VerificationFailed { mismatched_buffers: usize },
}
impl PatternOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PatternOutcome::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PatternOutcome::Success => "success",
            PatternOutcome::TransferError { .. } => "transfer error",
            PatternOutcome::VerificationFailed { .. } => "verification failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    pub index: usize,
    pub matrix_file: PathBuf,
    pub shards: u32,
    pub mem_type: MemType,
    pub xfer_op: XferOp,
    pub sleep_after_launch_sec: f64,
    pub num_requests: usize,
    pub total_bytes: u64,
    /// Unix time in milliseconds when the pattern started.
    pub start_time: i64,
    pub launch_ms: f64,
    /// Launch plus completion, without the post-launch sleep.
    pub transfer_ms: f64,
    /// Everything from launch to completion, sleep included.
    pub elapsed_ms: f64,
    pub bandwidth_gbps: f64,
    pub outcome: PatternOutcome,
    pub verification: Option<Verification>,
}
impl PatternResult {
    pub fn transfer_secs(&self) -> f64 {
        self.transfer_ms / 1000.0
    }
}

/// Results of every pattern of a run, in the order they ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub start_time: i64,
    pub stop_time: Option<i64>,
    pub world_size: usize,
    pub rank: usize,
    pub verify_buffers: bool,
    pub patterns: Vec<PatternResult>,
}
impl RunResult {
    pub fn new(run_id: &str, start_time: i64, world_size: usize, rank: usize, verify: bool) -> Self {
        RunResult {
            run_id: String::from(run_id),
            start_time,
            stop_time: None,
            world_size,
            rank,
            verify_buffers: verify,
            patterns: vec![],
        }
    }

    pub fn stop(&mut self, stop_time: i64) {
        self.stop_time = Some(stop_time);
    }

    /// Number of patterns that did not succeed.
    pub fn failures(&self) -> usize {
        self.patterns
            .iter()
            .filter(|res| !res.outcome.is_success())
            .count()
    }

    pub fn duration(&self) -> Option<f64> {
        self.stop_time
            .map(|stop_time| (stop_time - self.start_time) as f64 / 1000.0)
    }

    /// Writes the run as pretty printed JSON, creating parent directories as needed.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .context(format!("Unable to create directory {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).context(format!("Unable to write results to {}", path.display()))
    }

    pub fn read_json(path: &Path) -> anyhow::Result<RunResult> {
        let json = fs::read_to_string(path)
            .context(format!("Unable to read results from {}", path.display()))?;
        serde_json::from_str(&json).context("Results file is not a valid run result")
    }

    pub fn print_summary(&self) {
        println!("\n{}", " Summary ".reversed().green());

        let mut rows = rows![row![
            TableCell::builder("#").build(),
            TableCell::builder("Matrix".bold()).build(),
            TableCell::builder("Mem".bold()).build(),
            TableCell::builder("Op".bold()).build(),
            TableCell::builder("Requests".bold()).build(),
            TableCell::builder("Bytes".bold()).build(),
            TableCell::builder("Time (ms)".bold()).build(),
            TableCell::builder("BW (GB/s)".bold()).build(),
            TableCell::builder("Status".bold()).build()
        ]];

        for res in self.patterns.iter() {
            let status = match &res.outcome {
                PatternOutcome::Success => res.outcome.label().green(),
                _ => res.outcome.label().red(),
            };

            rows.push(row![
                TableCell::new(res.index),
                TableCell::new(res.matrix_file.display()),
                TableCell::new(res.mem_type),
                TableCell::new(res.xfer_op),
                TableCell::new(res.num_requests),
                TableCell::new(res.total_bytes),
                TableCell::new(format!("{:.3}", res.transfer_ms)),
                TableCell::new(format!("{:.3}", res.bandwidth_gbps)),
                TableCell::new(status)
            ]);
        }

        let table = Table::builder()
            .rows(rows)
            .style(TableStyle::rounded())
            .build();

        println!("{}", table.render());

        if let Some(duration) = self.duration() {
            println!(
                "Run {} finished {} traffic patterns in {:.3}s ({} failed)",
                self.run_id,
                self.patterns.len(),
                duration,
                self.failures()
            );
        }
    }
}

/// Bandwidth in GB/s (10^9 bytes per second). Zero when nothing measurable was moved.
pub fn bandwidth_gbps(bytes: u64, secs: f64) -> f64 {
    if bytes == 0 || secs <= 0.0 {
        0.0
    } else {
        bytes as f64 / secs / 1e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::Mismatch;

    fn pattern_result(index: usize, outcome: PatternOutcome) -> PatternResult {
        PatternResult {
            index,
            matrix_file: PathBuf::from(format!("matrices/{}.txt", index)),
            shards: 2,
            mem_type: MemType::Cpu,
            xfer_op: XferOp::Read,
            sleep_after_launch_sec: 0.25,
            num_requests: 4,
            total_bytes: 4096,
            start_time: 1_700_000_000_000 + index as i64,
            launch_ms: 0.125,
            transfer_ms: 1.5,
            elapsed_ms: 251.5,
            bandwidth_gbps: bandwidth_gbps(4096, 0.0015),
            outcome,
            verification: None,
        }
    }

    fn run_result() -> RunResult {
        let mut run = RunResult::new("abc12", 1_700_000_000_000, 2, 0, true);
        run.patterns.push(pattern_result(0, PatternOutcome::Success));
        run.patterns.push(pattern_result(
            1,
            PatternOutcome::TransferError {
                message: "boom".to_string(),
            },
        ));

        let mut failed = pattern_result(2, PatternOutcome::VerificationFailed {
            mismatched_buffers: 1,
        });
        failed.verification = Some(Verification {
            passed: false,
            checked_buffers: 2,
            mismatched_buffers: 1,
            first_mismatch: Some(Mismatch {
                src: 0,
                dst: 1,
                offset: 7,
                expected: Some(3),
                actual: Some(4),
            }),
        });
        run.patterns.push(failed);
        run.stop(1_700_000_002_500);
        run
    }

    #[test]
    fn json_round_trip_keeps_order_and_outcomes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/results.json");

        let run = run_result();
        run.write_json(&path)?;
        let read_back = RunResult::read_json(&path)?;

        assert_eq!(read_back, run);
        assert_eq!(
            read_back.patterns.iter().map(|p| p.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        Ok(())
    }

    #[test]
    fn outcomes_are_tagged_in_json() -> anyhow::Result<()> {
        let json = serde_json::to_value(run_result())?;

        assert_eq!(json["patterns"][0]["outcome"]["status"], "success");
        assert_eq!(json["patterns"][1]["outcome"]["status"], "transfer_error");
        assert_eq!(json["patterns"][1]["outcome"]["message"], "boom");
        assert_eq!(json["patterns"][2]["outcome"]["status"], "verification_failed");
        assert_eq!(json["patterns"][0]["mem_type"], "cpu");
        assert_eq!(json["patterns"][0]["xfer_op"], "READ");
        assert!(json["patterns"][0]["verification"].is_null());

        Ok(())
    }

    #[test]
    fn counts_failures() {
        let run = run_result();
        assert_eq!(run.failures(), 2);
        assert_eq!(run.duration(), Some(2.5));
    }

    #[test]
    fn bandwidth() {
        assert_eq!(bandwidth_gbps(0, 1.0), 0.0);
        assert_eq!(bandwidth_gbps(10, 0.0), 0.0);
        assert_eq!(bandwidth_gbps(2_000_000_000, 2.0), 1.0);
    }
}
