//! ShardKV public library interface.

#[macro_use]
mod utils;

mod workload;

mod server;

mod client;

pub use crate::utils::{fnv1a_32, logger_init, ShardKvError, IDENT};

pub use crate::workload::{
    Workload, WorkloadProfile, WorkloadStep, Xorshift64, ZipfianGen,
};

pub use crate::server::{
    ApiReply, ApiRequest, BatchProcessor, ExternalApi, Op, RequestId,
    ShardStore, Stats, StatsRates,
};

pub use crate::client::{
    call_with_retry, BatchRouter, ClientId, ClusterConn, DispatchMode,
    HostStub, UnaryCall, RETRY_ATTEMPTS, RETRY_BASE_DELAY_MS,
};
