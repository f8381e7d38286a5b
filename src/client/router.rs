//! Client-side routing of operations into per-destination batches.

use crate::server::Op;
use crate::utils::{fnv1a_32, ShardKvError};

/// Accumulates operations into one queue per destination host, keyed by
/// `fnv1a_32(key) % host_count`.
///
/// This is deliberately independent of the server's internal shard count:
/// the client only picks a host, and the host re-shards among its own locks.
/// Pure accumulation state, no I/O; the owning connection decides when to
/// flush the drained queues.
pub struct BatchRouter {
    /// One pending-operations queue per destination host.
    queues: Vec<Vec<Op>>,

    /// Flush threshold over the total queued count.
    threshold: usize,

    /// Total operations currently queued across all destinations.
    queued: usize,
}

impl BatchRouter {
    /// Creates a new router over the given number of destination hosts.
    pub fn new(
        host_count: usize,
        threshold: usize,
    ) -> Result<Self, ShardKvError> {
        if host_count == 0 {
            return logged_err!("router host count must be non-zero");
        }
        if threshold == 0 {
            return logged_err!("router batch threshold must be non-zero");
        }

        Ok(BatchRouter {
            queues: vec![Vec::new(); host_count],
            threshold,
            queued: 0,
        })
    }

    /// Index of the destination host owning the given key.
    #[inline]
    pub fn host_index(&self, key: &str) -> usize {
        fnv1a_32(key.as_bytes()) as usize % self.queues.len()
    }

    /// Queues one operation onto its destination's batch.
    pub fn push(&mut self, op: Op) {
        let host = self.host_index(op.key());
        self.queues[host].push(op);
        self.queued += 1;
    }

    /// Total operations currently queued.
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// True once enough operations have accumulated to warrant a flush.
    pub fn ready(&self) -> bool {
        self.queued >= self.threshold
    }

    /// Takes all non-empty per-destination batches, leaving the router
    /// empty. Destinations with nothing queued are skipped, so no empty
    /// RPC calls are ever issued.
    pub fn drain(&mut self) -> Vec<(usize, Vec<Op>)> {
        self.queued = 0;
        self.queues
            .iter_mut()
            .enumerate()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(host, queue)| (host, std::mem::take(queue)))
            .collect()
    }
}
