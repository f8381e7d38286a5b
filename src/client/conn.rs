//! Per-connection client glue: links to every host, batch routing, and
//! synchronous or asynchronous dispatch with transparent retries.

use std::sync::Arc;

use crate::client::{call_with_retry, BatchRouter, HostStub};
use crate::server::{ApiRequest, Op, RequestId};
use crate::utils::ShardKvError;

use futures::future::join_all;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How a flushed batch call relates to the calling task.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DispatchMode {
    /// Block the caller until the server's reply (or retry exhaustion).
    Synchronous,

    /// Issue the call on a spawned task and keep its handle; outstanding
    /// handles are awaited by `drain()` before counts are read.
    Asynchronous,
}

impl DispatchMode {
    /// Maps the command-line asynchronous flag to a mode.
    pub fn from_flag(asynch: bool) -> Self {
        if asynch {
            Self::Asynchronous
        } else {
            Self::Synchronous
        }
    }
}

/// One load-generating connection to the whole cluster.
///
/// Owns one link per destination host plus the router that assigns keys to
/// them. Each link sits behind its own async mutex so that asynchronous
/// flushes of consecutive iterations serialize per host while different
/// hosts proceed in parallel. Nothing here is shared between connections;
/// a load driver creates one `ClusterConn` per concurrent connection.
pub struct ClusterConn {
    /// One link per destination host, indexed like the router's hosts.
    links: Vec<Arc<Mutex<HostStub>>>,

    /// Per-destination batch accumulation.
    router: BatchRouter,

    /// Synchronous or asynchronous dispatch of flushed batches.
    mode: DispatchMode,

    /// Join handles of asynchronous calls not yet awaited, each resolving
    /// to the operation count it carried.
    inflight: Vec<JoinHandle<Result<u64, ShardKvError>>>,

    /// Operations whose batch call has completed successfully.
    completed: u64,
}

impl ClusterConn {
    /// Connects to every host in the list. A fresh random client ID is
    /// drawn per link so that servers tell connections apart.
    pub async fn new_and_setup(
        hosts: &[String],
        batch_threshold: usize,
        mode: DispatchMode,
    ) -> Result<Self, ShardKvError> {
        if hosts.is_empty() {
            return logged_err!("empty hosts list given");
        }

        let mut links = Vec::with_capacity(hosts.len());
        for host in hosts {
            let stub = HostStub::connect(rand::random(), host).await?;
            links.push(Arc::new(Mutex::new(stub)));
        }

        Ok(ClusterConn {
            links,
            router: BatchRouter::new(hosts.len(), batch_threshold)?,
            mode,
            inflight: Vec::new(),
            completed: 0,
        })
    }

    /// Queues one operation for its destination host.
    pub fn push(&mut self, op: Op) {
        self.router.push(op);
    }

    /// True once the router's batch threshold has been reached.
    pub fn ready(&self) -> bool {
        self.router.ready()
    }

    /// Flushes all queued operations as one batch call per non-empty
    /// destination, in the connection's dispatch mode. Retries happen
    /// inside each call; a synchronous call's exhaustion surfaces here,
    /// an asynchronous one's when its handle is reaped by a later flush
    /// or by `drain()`.
    pub async fn flush(&mut self) -> Result<(), ShardKvError> {
        // reap asynchronous calls that have already finished, so the
        // handle vector stays small over a long run instead of growing
        // until `drain()`
        let mut idx = 0;
        while idx < self.inflight.len() {
            if self.inflight[idx].is_finished() {
                self.completed += self.inflight.swap_remove(idx).await??;
            } else {
                idx += 1;
            }
        }

        for (host, ops) in self.router.drain() {
            let count = ops.len() as u64;
            let req = ApiRequest::Batch {
                // random correlation ID, kept within 63 bits so it stays
                // positive in a signed wire field
                id: rand::random::<RequestId>() >> 1,
                ops,
            };

            match self.mode {
                DispatchMode::Synchronous => {
                    let mut link = self.links[host].lock().await;
                    call_with_retry(&mut *link, &req).await?;
                    self.completed += count;
                }

                DispatchMode::Asynchronous => {
                    let link = self.links[host].clone();
                    self.inflight.push(tokio::spawn(async move {
                        let mut link = link.lock().await;
                        call_with_retry(&mut *link, &req).await?;
                        Ok(count)
                    }));
                }
            }
        }

        Ok(())
    }

    /// Awaits every outstanding asynchronous call, folding their operation
    /// counts into the completed total. Any exhausted retry among them
    /// surfaces as an error here.
    pub async fn drain(&mut self) -> Result<(), ShardKvError> {
        for joined in join_all(std::mem::take(&mut self.inflight)).await {
            self.completed += joined??;
        }
        Ok(())
    }

    /// Drains outstanding calls, then sends a leave notification on every
    /// link.
    pub async fn leave(&mut self) -> Result<(), ShardKvError> {
        self.drain().await?;
        for link in &self.links {
            link.lock().await.leave().await?;
        }
        Ok(())
    }

    /// Operations completed by this connection so far. Exact only after
    /// `drain()` in asynchronous mode.
    pub fn completed(&self) -> u64 {
        self.completed
    }
}
