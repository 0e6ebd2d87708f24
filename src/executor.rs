/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    engine::{plan_requests, TransferEngine},
    errors::ExecutionError,
    pattern::TrafficPattern,
    results::{bandwidth_gbps, PatternOutcome, PatternResult, RunResult},
    runtime::DistRuntime,
    verify::{print_recv_buffers, verify_buffers},
};
use chrono::Utc;
use colored::*;
use nanoid::nanoid;
use std::{
    ops::Range,
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

/// Options that apply to every pattern of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    pub verify_buffers: bool,
    pub print_recv_buffers: bool,
    pub json_output_path: Option<PathBuf>,
}

/// What a pattern moved and how long it took.
#[derive(Debug, Default)]
struct Execution {
    num_requests: usize,
    total_bytes: u64,
    launch: Duration,
    transfer: Duration,
    elapsed: Duration,
}

/// Runs traffic patterns one after another. A pattern's transfers have all completed, and its
/// buffers have been released, before the next pattern is launched.
pub struct SequentialExecutor {
    patterns: Vec<TrafficPattern>,
}
impl SequentialExecutor {
    pub fn new(patterns: Vec<TrafficPattern>) -> Self {
        Self { patterns }
    }

    /// Executes every pattern in order and returns one result per pattern, in the same order.
    ///
    /// Transfer and verification failures are recorded against their pattern and the run moves
    /// on. Only a failing process group barrier or an unwritable results file stops the run.
    ///
    /// # Arguments
    /// * runtime - the process group, shared with the caller who tears it down afterwards
    /// * engine - moves the bytes
    /// * config - run wide options
    pub async fn run(
        self,
        runtime: &dyn DistRuntime,
        engine: &mut dyn TransferEngine,
        config: &RunConfig,
    ) -> anyhow::Result<RunResult> {
        let run_id = nanoid!(5, &nanoid::alphabet::SAFE);
        let mut run = RunResult::new(
            &run_id,
            Utc::now().timestamp_millis(),
            runtime.world_size(),
            runtime.rank(),
            config.verify_buffers,
        );
        info!(
            "Starting run {} with {} traffic patterns on rank {}/{}",
            run_id,
            self.patterns.len(),
            runtime.rank(),
            runtime.world_size()
        );

        let total = self.patterns.len();
        for (index, pattern) in self.patterns.into_iter().enumerate() {
            println!(
                "> running traffic pattern {} - {}/{}",
                pattern.matrix_file().display().to_string().green(),
                index + 1,
                total
            );

            runtime.barrier().await?;
            let res = run_pattern(index, &pattern, runtime, engine, config).await;
            engine.release().await;
            runtime.barrier().await?;

            match &res.outcome {
                PatternOutcome::Success => info!(
                    "Pattern {} moved {} bytes in {} requests in {:.3}s ({:.3} GB/s)",
                    index,
                    res.total_bytes,
                    res.num_requests,
                    res.transfer_secs(),
                    res.bandwidth_gbps
                ),
                PatternOutcome::TransferError { message } => {
                    warn!("Pattern {} failed: {}", index, message)
                }
                PatternOutcome::VerificationFailed { mismatched_buffers } => warn!(
                    "Pattern {} failed verification in {} buffers",
                    index, mismatched_buffers
                ),
            }
            run.patterns.push(res);
        }

        run.stop(Utc::now().timestamp_millis());

        if runtime.rank() == 0 {
            if let Some(path) = &config.json_output_path {
                run.write_json(path)?;
                info!("Wrote results to {}", path.display());
            }
            run.print_summary();
        }

        Ok(run)
    }
}

async fn run_pattern(
    index: usize,
    pattern: &TrafficPattern,
    runtime: &dyn DistRuntime,
    engine: &mut dyn TransferEngine,
    config: &RunConfig,
) -> PatternResult {
    let start_time = Utc::now().timestamp_millis();
    let local_ranks = runtime.local_ranks();

    let executed = execute(pattern, runtime.world_size(), local_ranks.clone(), engine).await;
    // bandwidth is reported for every completed transfer, verified or not
    let transferred = executed.is_ok();

    let (execution, outcome, verification) = match executed {
        Err((execution, err)) => (
            execution,
            PatternOutcome::TransferError {
                message: err.to_string(),
            },
            None,
        ),

        Ok(execution) => {
            let received = engine.recv_buffers();
            if config.print_recv_buffers {
                print_recv_buffers(index, &received);
            }

            if config.verify_buffers {
                let verification = verify_buffers(pattern.matrix(), &local_ranks, &received);
                let outcome = if verification.passed {
                    PatternOutcome::Success
                } else {
                    PatternOutcome::VerificationFailed {
                        mismatched_buffers: verification.mismatched_buffers,
                    }
                };
                (execution, outcome, Some(verification))
            } else {
                (execution, PatternOutcome::Success, None)
            }
        }
    };

    let transfer_secs = execution.transfer.as_secs_f64();
    PatternResult {
        index,
        matrix_file: pattern.matrix_file().to_path_buf(),
        shards: pattern.shards(),
        mem_type: pattern.mem_type(),
        xfer_op: pattern.xfer_op(),
        sleep_after_launch_sec: pattern.sleep_after_launch_sec(),
        num_requests: execution.num_requests,
        total_bytes: execution.total_bytes,
        start_time,
        launch_ms: execution.launch.as_secs_f64() * 1000.0,
        transfer_ms: transfer_secs * 1000.0,
        elapsed_ms: execution.elapsed.as_secs_f64() * 1000.0,
        bandwidth_gbps: if transferred {
            bandwidth_gbps(execution.total_bytes, transfer_secs)
        } else {
            0.0
        },
        outcome,
        verification,
    }
}

/// Allocates, launches, optionally sleeps and waits for completion. On failure the partial timings
/// are returned next to the error.
async fn execute(
    pattern: &TrafficPattern,
    world_size: usize,
    local_ranks: Range<usize>,
    engine: &mut dyn TransferEngine,
) -> Result<Execution, (Execution, ExecutionError)> {
    let mut execution = Execution::default();

    if pattern.ranks() > world_size {
        return Err((
            execution,
            ExecutionError::NotEnoughRanks {
                required: pattern.ranks(),
                world_size,
            },
        ));
    }

    let requests = match plan_requests(pattern, &local_ranks) {
        Ok(requests) => requests,
        Err(err) => return Err((execution, err)),
    };
    execution.num_requests = requests.len();
    execution.total_bytes = requests.iter().map(|req| req.len as u64).sum();

    if let Err(err) = engine.allocate(pattern, local_ranks).await {
        return Err((execution, err));
    }

    // ---- launch ----
    let launch_start = Instant::now();
    let launched = engine.launch(requests).await;
    execution.launch = launch_start.elapsed();

    if let Err(err) = launched {
        // whatever was issued before the failure still has to land before the next pattern
        if let Err(drain_err) = engine.wait_all().await {
            debug!("Draining after failed launch: {}", drain_err);
        }
        execution.elapsed = launch_start.elapsed();
        execution.transfer = execution.elapsed;
        return Err((execution, err));
    }

    if let Some(sleep) = pattern.sleep_after_launch() {
        debug!("Sleeping {:?} after launch", sleep);
        tokio::time::sleep(sleep).await;
    }

    // ---- await completion ----
    let wait_start = Instant::now();
    let completed = engine.wait_all().await;
    execution.transfer = execution.launch + wait_start.elapsed();
    execution.elapsed = launch_start.elapsed();

    match completed {
        Ok(()) => Ok(execution),
        Err(err) => Err((execution, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::loopback::LoopbackEngine,
        matrix::Matrix,
        pattern::{MemType, XferOp},
        runtime::LocalRuntime,
    };

    fn pattern(cells: Vec<Vec<u64>>, sleep: f64) -> TrafficPattern {
        let matrix = Matrix::new(cells).expect("valid matrix");
        TrafficPattern::new("m.txt", matrix, 2, MemType::Cpu, XferOp::Write, sleep)
            .expect("valid pattern")
    }

    #[tokio::test]
    async fn runs_patterns_in_order() -> anyhow::Result<()> {
        let runtime = LocalRuntime::new(3);
        let mut engine = LoopbackEngine::new();
        let config = RunConfig {
            verify_buffers: true,
            ..RunConfig::default()
        };

        let executor = SequentialExecutor::new(vec![
            pattern(vec![vec![0, 100], vec![0, 0]], 0.0),
            pattern(vec![vec![0, 1, 1], vec![1, 0, 1], vec![1, 1, 0]], 0.0),
        ]);
        let run = executor.run(&runtime, &mut engine, &config).await?;

        assert_eq!(run.patterns.len(), 2);
        assert_eq!(run.patterns[0].index, 0);
        assert_eq!(run.patterns[0].total_bytes, 100);
        assert_eq!(run.patterns[0].num_requests, 2);
        assert_eq!(run.patterns[1].total_bytes, 6);
        assert_eq!(run.patterns[1].num_requests, 6);
        assert_eq!(run.failures(), 0);
        assert!(run.patterns.iter().all(|p| p
            .verification
            .as_ref()
            .is_some_and(|v| v.passed)));
        assert!(run.stop_time.is_some());

        // one barrier before and one after each pattern
        assert_eq!(runtime.barriers(), 4);
        assert!(!runtime.is_destroyed());

        Ok(())
    }

    #[tokio::test]
    async fn too_few_ranks_is_recorded_not_fatal() -> anyhow::Result<()> {
        let runtime = LocalRuntime::new(2);
        let mut engine = LoopbackEngine::new();

        let executor = SequentialExecutor::new(vec![
            pattern(vec![vec![0, 1, 1], vec![1, 0, 1], vec![1, 1, 0]], 0.0),
            pattern(vec![vec![0, 8], vec![8, 0]], 0.0),
        ]);
        let run = executor
            .run(&runtime, &mut engine, &RunConfig::default())
            .await?;

        assert!(matches!(
            run.patterns[0].outcome,
            PatternOutcome::TransferError { .. }
        ));
        assert!(run.patterns[1].outcome.is_success());
        assert_eq!(run.patterns[1].verification, None);

        Ok(())
    }

    #[tokio::test]
    async fn rectangular_matrix_spans_its_longer_side() -> anyhow::Result<()> {
        let wide = pattern(vec![vec![0, 1024, 0], vec![0, 0, 512]], 0.0);
        assert_eq!(wide.ranks(), 3);
        assert_eq!(crate::required_world_size(std::slice::from_ref(&wide)), 3);

        let runtime = LocalRuntime::new(3);
        let mut engine = LoopbackEngine::new();
        let config = RunConfig {
            verify_buffers: true,
            ..RunConfig::default()
        };
        let run = SequentialExecutor::new(vec![wide.clone()])
            .run(&runtime, &mut engine, &config)
            .await?;

        let res = &run.patterns[0];
        assert!(res.outcome.is_success());
        assert_eq!(res.total_bytes, 1536);
        assert_eq!(res.num_requests, 4);
        assert_eq!(res.verification.as_ref().map(|v| v.checked_buffers), Some(2));

        // one rank short of the destination column
        let runtime = LocalRuntime::new(2);
        let run = SequentialExecutor::new(vec![wide])
            .run(&runtime, &mut engine, &RunConfig::default())
            .await?;
        assert!(matches!(
            run.patterns[0].outcome,
            PatternOutcome::TransferError { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn sleep_after_launch_is_excluded_from_transfer_time() -> anyhow::Result<()> {
        let runtime = LocalRuntime::new(2);
        let mut engine = LoopbackEngine::new();

        let executor = SequentialExecutor::new(vec![pattern(vec![vec![0, 64], vec![0, 0]], 0.2)]);
        let run = executor
            .run(&runtime, &mut engine, &RunConfig::default())
            .await?;

        let res = &run.patterns[0];
        assert!(res.elapsed_ms >= 200.0);
        assert!(res.transfer_ms <= res.elapsed_ms);
        assert_eq!(res.sleep_after_launch_sec, 0.2);

        Ok(())
    }
}
