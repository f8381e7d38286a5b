//! ShardKV's server functionality modules.

mod store;
mod stats;
mod batch;
mod external;

pub use batch::{BatchProcessor, Op};
pub use external::{ApiReply, ApiRequest, ExternalApi, RequestId};
pub use stats::{Stats, StatsRates};
pub use store::ShardStore;
