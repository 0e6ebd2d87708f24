/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{payload, RecvBuffer, TransferEngine, TransferRequest};
use crate::{errors::ExecutionError, pattern::TrafficPattern};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use itertools::Itertools;
use std::{collections::HashMap, ops::Range};
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// A chunk that has arrived at its destination.
struct Delivery {
    src: usize,
    dst: usize,
    offset: usize,
    data: Bytes,
}

/// In-process transfer engine. Every memory type is backed by host memory and every request runs
/// as its own task, so requests of one pattern complete concurrently and in any order.
#[derive(Default)]
pub struct LoopbackEngine {
    send: HashMap<(usize, usize), Bytes>,
    recv: HashMap<(usize, usize), BytesMut>,
    in_flight: JoinSet<Delivery>,
}
impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn deliver(&mut self, delivery: Delivery) -> Result<(), ExecutionError> {
        let Delivery {
            src,
            dst,
            offset,
            data,
        } = delivery;

        let buf = self.recv.get_mut(&(src, dst)).ok_or_else(|| {
            ExecutionError::Completion(format!("rank {} has no receive buffer for {}", dst, src))
        })?;

        let end = offset + data.len();
        if end > buf.len() {
            return Err(ExecutionError::Completion(format!(
                "chunk {}..{} from {} overruns the {} byte receive buffer on {}",
                offset,
                end,
                src,
                buf.len(),
                dst
            )));
        }

        buf[offset..end].copy_from_slice(&data);
        Ok(())
    }
}

#[async_trait]
impl TransferEngine for LoopbackEngine {
    async fn allocate(
        &mut self,
        pattern: &TrafficPattern,
        local_ranks: Range<usize>,
    ) -> Result<(), ExecutionError> {
        if !self.send.is_empty() || !self.recv.is_empty() {
            return Err(ExecutionError::Allocation(
                "buffers from the previous pattern were not released".to_string(),
            ));
        }

        if pattern.mem_type().is_device() {
            debug!(
                "Loopback engine backs {} buffers with host memory",
                pattern.mem_type()
            );
        }

        for (src, dst, bytes) in pattern.matrix().non_zero_cells() {
            let len = usize::try_from(bytes).map_err(|_| {
                ExecutionError::Allocation(format!("{} byte buffer is too large", bytes))
            })?;

            if local_ranks.contains(&src) {
                self.send.insert((src, dst), payload(src, dst, len));
            }
            if local_ranks.contains(&dst) {
                self.recv.insert((src, dst), BytesMut::zeroed(len));
            }
        }

        trace!(
            "Allocated {} send and {} receive buffers",
            self.send.len(),
            self.recv.len()
        );
        Ok(())
    }

    async fn launch(&mut self, requests: Vec<TransferRequest>) -> Result<(), ExecutionError> {
        for request in requests {
            let TransferRequest {
                src,
                dst,
                offset,
                len,
                ..
            } = request;

            let send = self
                .send
                .get(&(src, dst))
                .ok_or_else(|| ExecutionError::Launch {
                    src,
                    dst,
                    reason: "no send buffer registered".to_string(),
                })?;

            if offset + len > send.len() {
                return Err(ExecutionError::Launch {
                    src,
                    dst,
                    reason: format!(
                        "chunk {}..{} is outside the {} byte send buffer",
                        offset,
                        offset + len,
                        send.len()
                    ),
                });
            }

            let chunk = send.slice(offset..offset + len);
            self.in_flight.spawn(async move {
                tokio::task::yield_now().await;
                Delivery {
                    src,
                    dst,
                    offset,
                    data: Bytes::copy_from_slice(&chunk),
                }
            });
        }

        trace!("{} requests in flight", self.in_flight.len());
        Ok(())
    }

    async fn wait_all(&mut self) -> Result<(), ExecutionError> {
        let mut first_error = None;
        while let Some(res) = self.in_flight.join_next().await {
            let res = res
                .map_err(|err| ExecutionError::Completion(err.to_string()))
                .and_then(|delivery| self.deliver(delivery));

            if let Err(err) = res {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn recv_buffers(&self) -> Vec<RecvBuffer> {
        self.recv
            .iter()
            .sorted_by_key(|(key, _)| **key)
            .map(|((src, dst), data)| RecvBuffer {
                src: *src,
                dst: *dst,
                data: Bytes::copy_from_slice(data),
            })
            .collect()
    }

    async fn release(&mut self) {
        self.in_flight.shutdown().await;
        self.send.clear();
        self.recv.clear();
    }
}
