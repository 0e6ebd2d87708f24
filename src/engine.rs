/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod loopback;

use crate::{
    errors::ExecutionError,
    pattern::{MemType, TrafficPattern, XferOp},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::ops::Range;

/// One contiguous piece of a cell's transfer, issued by `op.initiator(src, dst)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub src: usize,
    pub dst: usize,
    pub offset: usize,
    pub len: usize,
    pub mem_type: MemType,
    pub op: XferOp,
}

/// Contents of the buffer `dst` received from `src`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecvBuffer {
    pub src: usize,
    pub dst: usize,
    pub data: Bytes,
}

/// Moves bytes for one pattern at a time. The executor drives it through
/// `allocate -> launch -> wait_all -> recv_buffers -> release` for every pattern, so nothing
/// allocated for one pattern is visible to the next.
#[async_trait]
pub trait TransferEngine: Send {
    /// Registers send and receive buffers for every cell touching `local_ranks`. Send buffers are
    /// filled with [`payload`].
    async fn allocate(
        &mut self,
        pattern: &TrafficPattern,
        local_ranks: Range<usize>,
    ) -> Result<(), ExecutionError>;

    /// Issues the requests without waiting for them to finish.
    async fn launch(&mut self, requests: Vec<TransferRequest>) -> Result<(), ExecutionError>;

    /// Waits for every launched request, successful or not.
    async fn wait_all(&mut self) -> Result<(), ExecutionError>;

    fn recv_buffers(&self) -> Vec<RecvBuffer>;

    /// Frees everything registered by `allocate`.
    async fn release(&mut self);
}

/// Byte at `offset` of the payload `src` sends to `dst`.
pub fn payload_byte(src: usize, dst: usize, offset: usize) -> u8 {
    ((src * 31 + dst * 17 + offset) % 251) as u8
}

pub fn payload(src: usize, dst: usize, len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(len);
    buf.extend((0..len).map(|offset| payload_byte(src, dst, offset)));
    buf.freeze()
}

/// Splits every non-zero cell of the pattern into `shards` chunks and keeps the ones initiated by
/// a local rank.
///
/// # Arguments
/// * pattern - the pattern being executed
/// * local_ranks - ranks hosted by this process
///
/// # Returns
/// Requests in row-major cell order, chunks in offset order.
pub fn plan_requests(
    pattern: &TrafficPattern,
    local_ranks: &Range<usize>,
) -> Result<Vec<TransferRequest>, ExecutionError> {
    let op = pattern.xfer_op();
    let shards = pattern.shards() as usize;

    let mut requests = vec![];
    for (src, dst, bytes) in pattern.matrix().non_zero_cells() {
        if !local_ranks.contains(&op.initiator(src, dst)) {
            continue;
        }

        let len = usize::try_from(bytes).map_err(|_| {
            ExecutionError::Allocation(format!(
                "{} bytes from {} to {} does not fit in memory",
                bytes, src, dst
            ))
        })?;

        let chunk = len.div_ceil(shards);
        let mut offset = 0;
        while offset < len {
            let chunk_len = chunk.min(len - offset);
            requests.push(TransferRequest {
                src,
                dst,
                offset,
                len: chunk_len,
                mem_type: pattern.mem_type(),
                op,
            });
            offset += chunk_len;
        }
    }

    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;

    fn pattern(cells: Vec<Vec<u64>>, shards: u32, op: XferOp) -> TrafficPattern {
        let matrix = Matrix::new(cells).expect("valid matrix");
        TrafficPattern::new("m", matrix, shards, MemType::Cpu, op, 0.0).expect("valid pattern")
    }

    #[test]
    fn payload_is_deterministic() {
        assert_eq!(payload(1, 2, 300), payload(1, 2, 300));
        assert_ne!(payload(1, 2, 16), payload(2, 1, 16));
        assert_eq!(payload(0, 1, 3)[2], payload_byte(0, 1, 2));
    }

    #[test]
    fn splits_cells_into_shards() -> anyhow::Result<()> {
        let pattern = pattern(vec![vec![0, 10], vec![3, 0]], 4, XferOp::Write);
        let requests = plan_requests(&pattern, &(0..2))?;

        let chunks = requests
            .iter()
            .map(|r| (r.src, r.dst, r.offset, r.len))
            .collect::<Vec<_>>();
        assert_eq!(
            chunks,
            vec![
                (0, 1, 0, 3),
                (0, 1, 3, 3),
                (0, 1, 6, 3),
                (0, 1, 9, 1),
                (1, 0, 0, 1),
                (1, 0, 1, 1),
                (1, 0, 2, 1),
            ]
        );

        Ok(())
    }

    #[test]
    fn requests_per_cell_are_bounded_by_shards() -> anyhow::Result<()> {
        let pattern = pattern(
            vec![vec![0, 1 << 30], vec![0, 0]],
            crate::pattern::MAX_SHARDS,
            XferOp::Write,
        );
        let requests = plan_requests(&pattern, &(0..2))?;

        assert_eq!(requests.len(), crate::pattern::MAX_SHARDS as usize);
        assert_eq!(requests.iter().map(|r| r.len as u64).sum::<u64>(), 1 << 30);

        Ok(())
    }

    #[test]
    fn only_local_initiators_issue_requests() -> anyhow::Result<()> {
        let cells = vec![vec![0, 8], vec![0, 0]];

        let writes = plan_requests(&pattern(cells.clone(), 1, XferOp::Write), &(1..2))?;
        assert!(writes.is_empty());

        let reads = plan_requests(&pattern(cells, 1, XferOp::Read), &(1..2))?;
        assert_eq!(reads.len(), 1);
        assert_eq!((reads[0].src, reads[0].dst, reads[0].len), (0, 1, 8));

        Ok(())
    }
}
