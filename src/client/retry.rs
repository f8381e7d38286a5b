//! Bounded-retry wrapper around one RPC call.
//!
//! A retried batch may have already been applied remotely if only its
//! acknowledgment was lost; the server does not deduplicate correlation IDs,
//! so delivery is at-least-once. Writes are last-write-wins idempotent and
//! reads have no duplication hazard, which keeps re-application harmless.

use crate::client::HostStub;
use crate::server::{ApiReply, ApiRequest};
use crate::utils::ShardKvError;

use async_trait::async_trait;

use tokio::time::{self, Duration};

/// Maximum number of attempts for one call.
pub const RETRY_ATTEMPTS: usize = 3;

/// Backoff before the second attempt; doubles per further attempt.
pub const RETRY_BASE_DELAY_MS: u64 = 100;

/// One request/reply round-trip to a server, with a way to re-establish the
/// underlying link between attempts.
#[async_trait]
pub trait UnaryCall {
    /// Makes one call attempt, returning the matched reply.
    async fn call(&mut self, req: &ApiRequest)
        -> Result<ApiReply, ShardKvError>;

    /// Re-establishes the underlying link after a failed attempt.
    async fn reset(&mut self) -> Result<(), ShardKvError>;
}

#[async_trait]
impl UnaryCall for HostStub {
    async fn call(
        &mut self,
        req: &ApiRequest,
    ) -> Result<ApiReply, ShardKvError> {
        self.call_once(req).await
    }

    async fn reset(&mut self) -> Result<(), ShardKvError> {
        self.reconnect().await
    }
}

/// Makes the call with up to `RETRY_ATTEMPTS` attempts and exponential
/// backoff in between (100ms, 200ms, ...). The link is reset before each
/// re-attempt. Exhaustion returns the last error; callers treat that as
/// fatal to the connection, never as a silent drop.
pub async fn call_with_retry<C>(
    link: &mut C,
    req: &ApiRequest,
) -> Result<ApiReply, ShardKvError>
where
    C: UnaryCall + ?Sized,
{
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

    for attempt in 1..=RETRY_ATTEMPTS {
        match link.call(req).await {
            Ok(reply) => return Ok(reply),

            Err(e) if attempt < RETRY_ATTEMPTS => {
                pi_warn!(
                    "call failed (attempt {}/{}): {}, retrying in {:?}",
                    attempt,
                    RETRY_ATTEMPTS,
                    e,
                    delay
                );
                time::sleep(delay).await;
                delay *= 2;

                // a broken link would fail every further attempt, so refresh
                // it now; a failed refresh just burns this backoff round and
                // the next attempt reports the error
                if let Err(e) = link.reset().await {
                    pi_warn!("error resetting link: {}", e);
                }
            }

            Err(e) => {
                return logged_err!(
                    "call failed after {} attempts: {}",
                    RETRY_ATTEMPTS,
                    e
                );
            }
        }
    }

    unreachable!("attempt loop returns on success or exhaustion");
}
