/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod builder;

use crate::matrix::Matrix;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_SHARDS: u32 = 1;
pub const DEFAULT_MEM_TYPE: MemType = MemType::Cuda;
pub const DEFAULT_XFER_OP: XferOp = XferOp::Write;
pub const DEFAULT_SLEEP_AFTER_LAUNCH_SEC: f64 = 0.0;

/// Upper bound on `shards`. Every chunk of a cell is issued as its own request.
pub const MAX_SHARDS: u32 = 1024;

/// Memory domain buffers are allocated in. Always spelled in lower case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemType {
    Cuda,
    Vram,
    Cpu,
    Dram,
}
impl MemType {
    pub const ALL: [MemType; 4] = [MemType::Cuda, MemType::Vram, MemType::Cpu, MemType::Dram];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemType::Cuda => "cuda",
            MemType::Vram => "vram",
            MemType::Cpu => "cpu",
            MemType::Dram => "dram",
        }
    }

    /// True for accelerator memory.
    pub fn is_device(&self) -> bool {
        matches!(self, MemType::Cuda | MemType::Vram)
    }
}
impl fmt::Display for MemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for MemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        MemType::ALL
            .into_iter()
            .find(|mem_type| mem_type.as_str() == lower)
            .ok_or_else(|| {
                format!(
                    "'{}' is not one of {}",
                    s,
                    MemType::ALL.map(|m| m.as_str()).join(", ")
                )
            })
    }
}

/// Kind of transfer issued for every non-zero cell. Always spelled in upper case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum XferOp {
    Write,
    Read,
}
impl XferOp {
    pub const ALL: [XferOp; 2] = [XferOp::Write, XferOp::Read];

    pub fn as_str(&self) -> &'static str {
        match self {
            XferOp::Write => "WRITE",
            XferOp::Read => "READ",
        }
    }

    /// The rank that issues the transfer moving bytes from `src` to `dst`. Writes are pushed by the
    /// sender, reads are pulled by the receiver.
    pub fn initiator(&self, src: usize, dst: usize) -> usize {
        match self {
            XferOp::Write => src,
            XferOp::Read => dst,
        }
    }
}
impl fmt::Display for XferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for XferOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        XferOp::ALL
            .into_iter()
            .find(|op| op.as_str() == upper)
            .ok_or_else(|| {
                format!(
                    "'{}' is not one of {}",
                    s,
                    XferOp::ALL.map(|op| op.as_str()).join(", ")
                )
            })
    }
}

/// One validated test case: what to move between which shards and how. Built once from a config
/// record and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficPattern {
    matrix_file: PathBuf,
    matrix: Matrix,
    shards: u32,
    mem_type: MemType,
    xfer_op: XferOp,
    sleep_after_launch_sec: f64,
    sleep_after_launch: Duration,
}
impl TrafficPattern {
    pub fn new(
        matrix_file: impl Into<PathBuf>,
        matrix: Matrix,
        shards: u32,
        mem_type: MemType,
        xfer_op: XferOp,
        sleep_after_launch_sec: f64,
    ) -> Result<Self, String> {
        Ok(TrafficPattern {
            matrix_file: matrix_file.into(),
            matrix,
            shards: shards_from(u64::from(shards))?,
            mem_type,
            xfer_op,
            sleep_after_launch_sec,
            sleep_after_launch: sleep_duration(sleep_after_launch_sec)?,
        })
    }

    /// A pattern using the default options for everything except the matrix.
    pub fn with_defaults(matrix_file: impl Into<PathBuf>, matrix: Matrix) -> Self {
        TrafficPattern {
            matrix_file: matrix_file.into(),
            matrix,
            shards: DEFAULT_SHARDS,
            mem_type: DEFAULT_MEM_TYPE,
            xfer_op: DEFAULT_XFER_OP,
            sleep_after_launch_sec: DEFAULT_SLEEP_AFTER_LAUNCH_SEC,
            sleep_after_launch: Duration::ZERO,
        }
    }

    pub fn matrix_file(&self) -> &Path {
        &self.matrix_file
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn shards(&self) -> u32 {
        self.shards
    }

    pub fn mem_type(&self) -> MemType {
        self.mem_type
    }

    pub fn xfer_op(&self) -> XferOp {
        self.xfer_op
    }

    pub fn sleep_after_launch_sec(&self) -> f64 {
        self.sleep_after_launch_sec
    }

    pub fn sleep_after_launch(&self) -> Option<Duration> {
        (!self.sleep_after_launch.is_zero()).then_some(self.sleep_after_launch)
    }

    /// Number of ranks the pattern spans.
    pub fn ranks(&self) -> usize {
        self.matrix.dim()
    }
}

/// Checks a chunk count, accepting `1..=MAX_SHARDS`.
pub fn shards_from(shards: u64) -> Result<u32, String> {
    u32::try_from(shards)
        .ok()
        .filter(|shards| (1..=MAX_SHARDS).contains(shards))
        .ok_or_else(|| {
            format!(
                "shards must be an integer between 1 and {}, got {}",
                MAX_SHARDS, shards
            )
        })
}

/// Converts a post-launch delay in seconds, rejecting values a `Duration` cannot hold.
pub fn sleep_duration(secs: f64) -> Result<Duration, String> {
    if secs < 0.0 {
        return Err(format!(
            "sleep_after_launch_sec must not be negative, got {}",
            secs
        ));
    }

    Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("sleep_after_launch_sec of {} is not usable: {}", secs, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> Matrix {
        Matrix::new(vec![vec![0, 1], vec![0, 0]]).expect("valid matrix")
    }

    #[test]
    fn normalisation_is_case_insensitive_and_idempotent() -> anyhow::Result<()> {
        for input in ["CUDA", "cuda", " Cuda "] {
            let mem_type: MemType = input.parse().map_err(anyhow::Error::msg)?;
            assert_eq!(mem_type.to_string(), "cuda");
            assert_eq!(mem_type.to_string().parse::<MemType>(), Ok(mem_type));
        }

        for input in ["write", "WRITE", "Write"] {
            let op: XferOp = input.parse().map_err(anyhow::Error::msg)?;
            assert_eq!(op.to_string(), "WRITE");
            assert_eq!(op.to_string().parse::<XferOp>(), Ok(op));
        }

        assert_eq!("dram".parse::<MemType>(), Ok(MemType::Dram));
        assert_eq!("read".parse::<XferOp>(), Ok(XferOp::Read));
        Ok(())
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!("hbm".parse::<MemType>().is_err());
        assert!("PUT".parse::<XferOp>().is_err());
        assert!("".parse::<XferOp>().is_err());
    }

    #[test]
    fn initiator_depends_on_op() {
        assert_eq!(XferOp::Write.initiator(0, 3), 0);
        assert_eq!(XferOp::Read.initiator(0, 3), 3);
    }

    #[test]
    fn new_validates_options() {
        assert!(TrafficPattern::new("m", matrix(), 0, MemType::Cpu, XferOp::Write, 0.0).is_err());
        assert!(TrafficPattern::new("m", matrix(), 1, MemType::Cpu, XferOp::Write, -1.0).is_err());
        assert!(
            TrafficPattern::new("m", matrix(), 1, MemType::Cpu, XferOp::Write, f64::NAN).is_err()
        );
        assert!(
            TrafficPattern::new("m", matrix(), 1, MemType::Cpu, XferOp::Write, 1.0e20).is_err()
        );
        assert!(TrafficPattern::new(
            "m",
            matrix(),
            MAX_SHARDS + 1,
            MemType::Cpu,
            XferOp::Write,
            0.0
        )
        .is_err());

        let pattern = TrafficPattern::new("m", matrix(), 2, MemType::Cpu, XferOp::Read, 0.5)
            .expect("valid pattern");
        assert_eq!(pattern.ranks(), 2);
        assert_eq!(pattern.sleep_after_launch(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn option_checks() {
        assert_eq!(shards_from(1), Ok(1));
        assert_eq!(shards_from(u64::from(MAX_SHARDS)), Ok(MAX_SHARDS));
        assert!(shards_from(0).is_err());
        assert!(shards_from(4_000_000_000).is_err());
        assert!(shards_from(u64::MAX).is_err());

        assert_eq!(sleep_duration(0.0), Ok(Duration::ZERO));
        assert_eq!(sleep_duration(2.0), Ok(Duration::from_secs(2)));
        assert!(sleep_duration(-0.5).is_err());
        assert!(sleep_duration(f64::INFINITY).is_err());
        assert!(sleep_duration(1.0e20).is_err());
    }

    #[test]
    fn defaults() {
        let pattern = TrafficPattern::with_defaults("m", matrix());
        assert_eq!(pattern.shards(), 1);
        assert_eq!(pattern.mem_type(), MemType::Cuda);
        assert_eq!(pattern.xfer_op(), XferOp::Write);
        assert_eq!(pattern.sleep_after_launch_sec(), 0.0);
        assert_eq!(pattern.sleep_after_launch(), None);
    }
}
