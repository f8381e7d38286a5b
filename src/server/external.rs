//! ShardKV server external API module implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::client::ClientId;
use crate::server::{BatchProcessor, Op};
use crate::utils::ShardKvError;

use bytes::{Bytes, BytesMut};

use serde::{Deserialize, Serialize};

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// External API request ID type.
pub type RequestId = u64;

/// Upper bound on one request frame's byte length. A corrupt or hostile
/// length prefix is rejected before any buffer space is reserved for it.
const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Request received from client.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    /// Unified batch of mixed operations; the canonical shape.
    Batch {
        /// Client-generated correlation ID, echoed in the reply.
        id: RequestId,

        /// Operations to apply strictly in order.
        ops: Vec<Op>,
    },

    /// Read-only batch, the older split protocol shape.
    BatchGet {
        /// Client-generated correlation ID, echoed in the reply.
        id: RequestId,

        /// Keys to look up.
        keys: Vec<String>,
    },

    /// Write-only batch, the older split protocol shape.
    BatchPut {
        /// Client-generated correlation ID, echoed in the reply.
        id: RequestId,

        /// Key-value pairs to store.
        entries: Vec<(String, String)>,
    },

    /// Client leave notification.
    Leave,
}

impl ApiRequest {
    /// Correlation ID carried by this request, if any.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            ApiRequest::Batch { id, .. }
            | ApiRequest::BatchGet { id, .. }
            | ApiRequest::BatchPut { id, .. } => Some(*id),
            ApiRequest::Leave => None,
        }
    }
}

/// Reply back to client.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ApiReply {
    /// Reply to a unified batch. Values align positionally with the batch's
    /// operations; writes and misses yield empty strings.
    Batch {
        /// ID of the corresponding client request.
        id: RequestId,

        /// Positionally aligned result values.
        values: Vec<String>,
    },

    /// Reply to a read-only batch.
    BatchGet {
        /// ID of the corresponding client request.
        id: RequestId,

        /// Positionally aligned result values.
        values: Vec<String>,
    },

    /// Reply to a write-only batch.
    BatchPut {
        /// ID of the corresponding client request.
        id: RequestId,
    },

    /// Reply to client leave notification.
    Leave,
}

impl ApiReply {
    /// Correlation ID carried by this reply, if any.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            ApiReply::Batch { id, .. }
            | ApiReply::BatchGet { id, .. }
            | ApiReply::BatchPut { id } => Some(*id),
            ApiReply::Leave => None,
        }
    }
}

/// The external client-facing API module.
///
/// An acceptor task takes new TCP connections and spawns one servant task
/// per client; each servant reads framed requests, applies them through the
/// shared batch processor inline, and writes the reply back on its own
/// socket. All tasks exit when the termination flag flips.
pub struct ExternalApi {
    /// Address the listener actually bound.
    local_addr: SocketAddr,

    /// Join handle of the client acceptor task.
    acceptor_handle: JoinHandle<()>,
}

impl ExternalApi {
    /// Creates the TCP listener and spawns the client acceptor task.
    pub async fn new_and_setup(
        api_addr: SocketAddr,
        processor: Arc<BatchProcessor>,
        rx_term: watch::Receiver<bool>,
    ) -> Result<Self, ShardKvError> {
        let listener = TcpListener::bind(api_addr).await?;
        let local_addr = listener.local_addr()?;
        pi_info!("accepting clients on '{}'", local_addr);

        let acceptor_handle =
            tokio::spawn(Self::acceptor_task(listener, processor, rx_term));

        Ok(ExternalApi {
            local_addr,
            acceptor_handle,
        })
    }

    /// Address the listener bound, useful when the port was OS-picked.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the acceptor task to finish, which happens only after the
    /// termination flag flips.
    pub async fn wait(self) -> Result<(), ShardKvError> {
        self.acceptor_handle.await?;
        Ok(())
    }
}

// ExternalApi acceptor task implementation
impl ExternalApi {
    /// Client acceptor task function.
    async fn acceptor_task(
        listener: TcpListener,
        processor: Arc<BatchProcessor>,
        mut rx_term: watch::Receiver<bool>,
    ) {
        pi_debug!("client acceptor task spawned");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            tokio::spawn(Self::servant_task(
                                stream,
                                addr,
                                processor.clone(),
                                rx_term.clone(),
                            ));
                        }
                        Err(e) => {
                            pi_warn!("error accepting client connection: {}", e);
                        }
                    }
                },

                _ = rx_term.changed() => break,
            }
        }

        pi_debug!("client acceptor task exited");
    }
}

// ExternalApi servant task implementation
impl ExternalApi {
    /// Reads a client request from the given read half.
    async fn read_req(
        // first 8 bytes being the request length, and the rest bytes being
        // the request itself
        req_buf: &mut BytesMut,
        conn_read: &mut ReadHalf<'_>,
    ) -> Result<ApiRequest, ShardKvError> {
        // CANCELLATION SAFETY: we cannot use `read_u64()` and `read_exact()`
        // here because this function is used as a `tokio::select!` branch and
        // those two methods are not cancellation-safe

        // read length of request first
        while req_buf.len() < 8 {
            // req_len not wholesomely read from socket before last
            // cancellation
            if conn_read.read_buf(req_buf).await? == 0 {
                return Err(ShardKvError::msg("connection closed"));
            }
        }
        let req_len = u64::from_be_bytes(req_buf[..8].try_into().unwrap());
        if req_len > MAX_FRAME_LEN {
            return Err(ShardKvError::msg(format!(
                "request length {} exceeds limit {}",
                req_len, MAX_FRAME_LEN
            )));
        }

        // then read the request itself
        let req_end = 8 + req_len as usize;
        if req_buf.capacity() < req_end {
            // capacity not big enough, reserve more space
            req_buf.reserve(req_end - req_buf.capacity());
        }
        while req_buf.len() < req_end {
            if conn_read.read_buf(req_buf).await? == 0 {
                return Err(ShardKvError::msg("connection closed"));
            }
        }
        let req = decode_from_slice(&req_buf[8..req_end])?;

        // if reached this point, no further cancellation to this call is
        // possible (because there are no more awaits ahead); discard bytes
        // used in this call
        if req_buf.len() > req_end {
            let buf_tail = Bytes::copy_from_slice(&req_buf[req_end..]);
            req_buf.clear();
            req_buf.extend_from_slice(&buf_tail);
        } else {
            req_buf.clear();
        }

        Ok(req)
    }

    /// Writes a reply through the given write half.
    async fn write_reply(
        reply: &ApiReply,
        conn_write: &mut WriteHalf<'_>,
    ) -> Result<(), ShardKvError> {
        let reply_bytes = encode_to_vec(reply)?;
        conn_write.write_u64(reply_bytes.len() as u64).await?; // length first
        conn_write.write_all(&reply_bytes[..]).await?;
        Ok(())
    }

    /// Per-client request listener and reply sender task function.
    async fn servant_task(
        mut conn: TcpStream,
        addr: SocketAddr,
        processor: Arc<BatchProcessor>,
        mut rx_term: watch::Receiver<bool>,
    ) {
        // handshake: client announces its ID as the first 8 bytes
        let id: ClientId = tokio::select! {
            id = conn.read_u64() => match id {
                Ok(id) => id,
                Err(e) => {
                    pi_error!("error receiving new client ID: {}", e);
                    return;
                }
            },
            _ = rx_term.changed() => return,
        };
        pi_info!("accepted new client {} ({})", id, addr);

        let (mut conn_read, mut conn_write) = conn.split();
        let mut req_buf = BytesMut::with_capacity(8 + 4096);

        loop {
            tokio::select! {
                req = Self::read_req(&mut req_buf, &mut conn_read) => {
                    match req {
                        // client leaving, reply in kind and break
                        Ok(ApiRequest::Leave) => {
                            if let Err(e) = Self::write_reply(
                                &ApiReply::Leave,
                                &mut conn_write,
                            )
                            .await
                            {
                                pi_error!("error replying to {}: {}", id, e);
                            } else {
                                pi_info!("client {} has left", id);
                            }
                            break;
                        },

                        Ok(ApiRequest::Batch { id: req_id, ops }) => {
                            let reply = ApiReply::Batch {
                                id: req_id,
                                values: processor.apply_batch(ops),
                            };
                            if let Err(e) = Self::write_reply(
                                &reply,
                                &mut conn_write,
                            )
                            .await
                            {
                                pi_error!("error replying to {}: {}", id, e);
                            }
                        },

                        Ok(ApiRequest::BatchGet { id: req_id, keys }) => {
                            let reply = ApiReply::BatchGet {
                                id: req_id,
                                values: processor.apply_gets(&keys),
                            };
                            if let Err(e) = Self::write_reply(
                                &reply,
                                &mut conn_write,
                            )
                            .await
                            {
                                pi_error!("error replying to {}: {}", id, e);
                            }
                        },

                        Ok(ApiRequest::BatchPut { id: req_id, entries }) => {
                            processor.apply_puts(entries);
                            let reply = ApiReply::BatchPut { id: req_id };
                            if let Err(e) = Self::write_reply(
                                &reply,
                                &mut conn_write,
                            )
                            .await
                            {
                                pi_error!("error replying to {}: {}", id, e);
                            }
                        },

                        Err(e) => {
                            // probably the client exited without `leave()`
                            pi_error!(
                                "error reading request from {}: {}", id, e
                            );
                            break;
                        }
                    }
                },

                _ = rx_term.changed() => break,
            }
        }

        pi_debug!("client servant task for {} ({}) exited", id, addr);
    }
}
