//! ShardKV's client functionality modules.

mod apistub;
mod retry;
mod router;
mod conn;

pub use apistub::{ClientId, HostStub};
pub use conn::{ClusterConn, DispatchMode};
pub use retry::{
    call_with_retry, UnaryCall, RETRY_ATTEMPTS, RETRY_BASE_DELAY_MS,
};
pub use router::BatchRouter;
