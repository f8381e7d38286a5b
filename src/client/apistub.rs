//! ShardKV client -> server API communication stub implementation.

use crate::server::{ApiReply, ApiRequest};
use crate::utils::ShardKvError;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Client stub ID type.
pub type ClientId = u64;

/// Client-side connection stub to one server host.
///
/// Holds one persistent TCP connection; requests and replies are correlated
/// by the echoed request ID. Not shareable between tasks by itself; callers
/// wrap it in their own synchronization when needed.
pub struct HostStub {
    /// My client ID, announced to the server on (re)connect.
    id: ClientId,

    /// Server address, kept for re-establishing the link.
    addr: String,

    /// Read-half split of the TCP connection stream.
    conn_read: OwnedReadHalf,

    /// Write-half split of the TCP connection stream.
    conn_write: OwnedWriteHalf,
}

impl HostStub {
    /// Connects to the given server address and announces the client ID as
    /// the first 8 bytes on the wire.
    pub async fn connect(
        id: ClientId,
        addr: impl ToString,
    ) -> Result<Self, ShardKvError> {
        let addr = addr.to_string();
        let (conn_read, conn_write) = Self::dial(id, &addr).await?;
        Ok(HostStub {
            id,
            addr,
            conn_read,
            conn_write,
        })
    }

    /// Dials the server and performs the client ID handshake.
    async fn dial(
        id: ClientId,
        addr: &str,
    ) -> Result<(OwnedReadHalf, OwnedWriteHalf), ShardKvError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_u64(id).await?; // send my client ID
        Ok(stream.into_split())
    }

    /// Drops the current connection and dials a fresh one. The server sees
    /// the old connection close and a new client session begin.
    pub async fn reconnect(&mut self) -> Result<(), ShardKvError> {
        pi_debug!("reconnecting to '{}'", self.addr);
        let (conn_read, conn_write) = Self::dial(self.id, &self.addr).await?;
        self.conn_read = conn_read;
        self.conn_write = conn_write;
        Ok(())
    }

    /// Gets my client ID.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Address of the server this stub talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends a request to the established server connection.
    pub async fn send_req(
        &mut self,
        req: &ApiRequest,
    ) -> Result<(), ShardKvError> {
        let req_bytes = encode_to_vec(req)?;
        self.conn_write.write_u64(req_bytes.len() as u64).await?; // length first
        self.conn_write.write_all(&req_bytes[..]).await?;
        Ok(())
    }

    /// Receives a reply from the established server connection.
    pub async fn recv_reply(&mut self) -> Result<ApiReply, ShardKvError> {
        let reply_len = self.conn_read.read_u64().await?;
        let mut reply_buf: Vec<u8> = vec![0; reply_len as usize];
        self.conn_read.read_exact(&mut reply_buf[..]).await?;
        let reply = decode_from_slice(&reply_buf)?;
        Ok(reply)
    }

    /// Makes one request/reply round-trip, discarding stale replies whose
    /// correlation ID does not match (e.g. the late acknowledgment of an
    /// attempt that was already retried on a fresh link).
    pub async fn call_once(
        &mut self,
        req: &ApiRequest,
    ) -> Result<ApiReply, ShardKvError> {
        self.send_req(req).await?;
        loop {
            let reply = self.recv_reply().await?;
            if reply.id() == req.id() {
                return Ok(reply);
            }
            pi_warn!(
                "discarding stale reply {:?} while expecting {:?}",
                reply.id(),
                req.id()
            );
        }
    }

    /// Sends a leave notification and waits for the server's matching reply.
    pub async fn leave(&mut self) -> Result<(), ShardKvError> {
        self.send_req(&ApiRequest::Leave).await?;
        let reply = self.recv_reply().await?;
        if reply != ApiReply::Leave {
            return logged_err!("unexpected reply to leave: {:?}", reply);
        }
        pi_debug!("left server '{}'", self.addr);
        Ok(())
    }
}
