/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use async_trait::async_trait;
use std::{
    ops::Range,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
use tracing::{debug, trace, warn};

/// The process group a run executes in. Owned outside the executor: the executor synchronises on
/// it between patterns but never tears it down.
#[async_trait]
pub trait DistRuntime: Send + Sync {
    /// Total number of ranks in the group.
    fn world_size(&self) -> usize;

    /// Rank of this process.
    fn rank(&self) -> usize;

    /// Ranks whose buffers live in this process. A one-rank-per-process runtime returns
    /// `rank..rank + 1`.
    fn local_ranks(&self) -> Range<usize> {
        self.rank()..self.rank() + 1
    }

    /// Blocks until every rank in the group has reached the barrier.
    async fn barrier(&self) -> anyhow::Result<()>;

    /// Tears the group down. Called once, after the run has been finalised.
    async fn destroy(&self) -> anyhow::Result<()>;
}

/// Hosts every rank of a world inside the current process.
#[derive(Debug)]
pub struct LocalRuntime {
    world_size: usize,
    barriers: AtomicU64,
    destroyed: AtomicBool,
}
impl LocalRuntime {
    pub fn new(world_size: usize) -> Self {
        debug!("Initialised local process group with {} ranks", world_size);
        Self {
            world_size,
            barriers: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn barriers(&self) -> u64 {
        self.barriers.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistRuntime for LocalRuntime {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn rank(&self) -> usize {
        0
    }

    fn local_ranks(&self) -> Range<usize> {
        0..self.world_size
    }

    async fn barrier(&self) -> anyhow::Result<()> {
        if self.is_destroyed() {
            return Err(anyhow::anyhow!("barrier called on a destroyed process group"));
        }

        let n = self.barriers.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("barrier {} reached by all {} local ranks", n, self.world_size);
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            warn!("Process group was already destroyed");
        } else {
            debug!("Destroyed local process group");
        }
        Ok(())
    }
}
