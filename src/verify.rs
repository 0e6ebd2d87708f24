/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    engine::{payload_byte, RecvBuffer},
    matrix::Matrix,
};
use colored::Colorize;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, ops::Range};
use tracing::warn;

const DUMP_BYTES: usize = 32;

/// First byte of a receive buffer that differs from what should have arrived. `None` on either
/// side means the buffer has no byte at `offset` on that side: it is missing, short or too long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub src: usize,
    pub dst: usize,
    pub offset: usize,
    pub expected: Option<u8>,
    pub actual: Option<u8>,
}

/// Outcome of checking every receive buffer of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    pub checked_buffers: usize,
    pub mismatched_buffers: usize,
    pub first_mismatch: Option<Mismatch>,
}

/// Checks the receive buffers of the local ranks against the matrix. Every non-zero cell whose
/// destination is local must have a buffer holding exactly the payload its sender wrote. A
/// missing buffer, or a non-empty buffer for a cell that should not have received anything,
/// counts as a mismatch.
///
/// # Arguments
/// * matrix - the pattern's matrix, giving the expected buffers and their lengths
/// * local_ranks - ranks whose receive buffers this process holds
/// * received - receive buffers returned by the engine
pub fn verify_buffers(
    matrix: &Matrix,
    local_ranks: &Range<usize>,
    received: &[RecvBuffer],
) -> Verification {
    let by_cell: HashMap<(usize, usize), &[u8]> = received
        .iter()
        .map(|buf| ((buf.src, buf.dst), &buf.data[..]))
        .collect();

    let expected = matrix
        .non_zero_cells()
        .filter(|(_, dst, _)| local_ranks.contains(dst))
        .map(|(src, dst, bytes)| {
            // a cell too large to address can never arrive in full
            let len = usize::try_from(bytes).unwrap_or(usize::MAX);
            (src, dst, len)
        })
        .collect::<Vec<_>>();

    let unexpected = received
        .iter()
        .filter(|buf| !buf.data.is_empty())
        .filter(|buf| {
            !expected
                .iter()
                .any(|(src, dst, _)| (*src, *dst) == (buf.src, buf.dst))
        })
        .map(|buf| (buf.src, buf.dst, 0));

    let mut checked_buffers = 0;
    let mut mismatched_buffers = 0;
    let mut first_mismatch = None;

    for (src, dst, len) in expected.iter().copied().chain(unexpected) {
        checked_buffers += 1;
        let data = by_cell.get(&(src, dst)).copied().unwrap_or_default();

        if let Some(mismatch) = compare(src, dst, len, data) {
            warn!(
                "Buffer {} -> {} differs at byte {}: expected {}, found {}",
                mismatch.src,
                mismatch.dst,
                mismatch.offset,
                describe(mismatch.expected),
                describe(mismatch.actual)
            );
            mismatched_buffers += 1;
            first_mismatch.get_or_insert(mismatch);
        }
    }

    Verification {
        passed: mismatched_buffers == 0,
        checked_buffers,
        mismatched_buffers,
        first_mismatch,
    }
}

fn compare(src: usize, dst: usize, len: usize, data: &[u8]) -> Option<Mismatch> {
    (0..len.max(data.len()))
        .map(|offset| {
            let expected = (offset < len).then(|| payload_byte(src, dst, offset));
            (offset, expected, data.get(offset).copied())
        })
        .find(|(_, expected, actual)| expected != actual)
        .map(|(offset, expected, actual)| Mismatch {
            src,
            dst,
            offset,
            expected,
            actual,
        })
}

fn describe(byte: Option<u8>) -> String {
    match byte {
        Some(byte) => format!("{:#04x}", byte),
        None => "nothing".to_string(),
    }
}

/// Renders the head of a receive buffer as hex, e.g. `0 <- 1 [1024 B] 11 12 13 ...`.
pub fn format_recv_buffer(buf: &RecvBuffer) -> String {
    let head = buf.data.iter().take(DUMP_BYTES).map(|b| format!("{:02x}", b)).join(" ");
    let ellipsis = if buf.data.len() > DUMP_BYTES { " ..." } else { "" };
    format!(
        "{} <- {} [{} B] {}{}",
        buf.dst,
        buf.src,
        buf.data.len(),
        head,
        ellipsis
    )
}

pub fn print_recv_buffers(pattern_idx: usize, received: &[RecvBuffer]) {
    println!(
        "{}",
        format!("> receive buffers of pattern {}", pattern_idx).bright_black()
    );
    for buf in received {
        println!("\t{}", format_recv_buffer(buf));
    }
}
