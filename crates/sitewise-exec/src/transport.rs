//! Request/reply framing between a client and a server.
//!
//! Request: `[request_id:u32][kind:u32][node:i32][len:i64][payload]`
//! Reply:   `[request_id:u32][len:u64][payload]`
//!
//! All integers little-endian. Several requests may be in flight on one
//! connection; replies are matched by request id and may arrive out of
//! order. A reply whose payload starts with `ERROR` carries a remote failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use sitewise_core::codec::{ByteReader, ByteWriter};
use sitewise_core::id::{PlanId, RequestId};

use crate::runtime::{ExecError, Result};
use crate::server::Server;

pub const ERROR_PREFIX: &str = "ERROR";

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Payload is a plan description; the reply is its explain text.
    Init = 0,
    /// Payload is a binding document; the reply is a serialized payload.
    Execute = 1,
    /// Payload is one log line; the reply is empty.
    Log = 2,
}

impl TryFrom<u32> for RequestKind {
    type Error = ExecError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Init),
            1 => Ok(Self::Execute),
            2 => Ok(Self::Log),
            other => Err(ExecError::Transport(format!("unknown request kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub kind: RequestKind,
    pub node: PlanId,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(20 + self.payload.len());
        w.put_u32(self.id.get());
        w.put_u32(self.kind as u32);
        w.put_i32(self.node.get());
        w.put_i64(self.payload.len() as i64);
        w.put_raw(&self.payload);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let id = RequestId::new(r.get_u32()?);
        let kind = RequestKind::try_from(r.get_u32()?)?;
        let node = PlanId::new(r.get_i32()?);
        let len = payload_len(r.get_i64()?, u64::MAX)?;
        let payload = r.take(len)?.to_vec();
        if !r.is_exhausted() {
            return Err(ExecError::Transport("trailing bytes after request".into()));
        }
        Ok(Self {
            id,
            kind,
            node,
            payload,
        })
    }

    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R, max_frame: u64) -> Result<Self> {
        let id = RequestId::new(r.read_u32_le().await?);
        let kind = RequestKind::try_from(r.read_u32_le().await?)?;
        let node = PlanId::new(r.read_i32_le().await?);
        let len = payload_len(r.read_i64_le().await?, max_frame)?;
        let mut payload = vec![0u8; len];
        r.read_exact(&mut payload).await?;
        Ok(Self {
            id,
            kind,
            node,
            payload,
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.encode()).await?;
        w.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: RequestId,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn error(id: RequestId, message: impl std::fmt::Display) -> Self {
        Self {
            id,
            payload: format!("{ERROR_PREFIX}: {message}").into_bytes(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(12 + self.payload.len());
        w.put_u32(self.id.get());
        w.put_u64(self.payload.len() as u64);
        w.put_raw(&self.payload);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let id = RequestId::new(r.get_u32()?);
        let len = r.get_len()?;
        let payload = r.take(len)?.to_vec();
        if !r.is_exhausted() {
            return Err(ExecError::Transport("trailing bytes after reply".into()));
        }
        Ok(Self { id, payload })
    }

    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R, max_frame: u64) -> Result<Self> {
        let id = RequestId::new(r.read_u32_le().await?);
        let len = r.read_u64_le().await?;
        if len > max_frame {
            return Err(ExecError::Transport(format!(
                "reply of {len} bytes exceeds the {max_frame} byte limit"
            )));
        }
        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload).await?;
        Ok(Self { id, payload })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.encode()).await?;
        w.flush().await?;
        Ok(())
    }
}

fn payload_len(raw: i64, max_frame: u64) -> Result<usize> {
    let len = u64::try_from(raw)
        .map_err(|_| ExecError::Transport(format!("negative payload length {raw}")))?;
    if len > max_frame {
        return Err(ExecError::Transport(format!(
            "payload of {len} bytes exceeds the {max_frame} byte limit"
        )));
    }
    usize::try_from(len).map_err(|_| ExecError::Transport(format!("payload length {len}")))
}

/// Surface an `ERROR` reply as `ExecError::Remote`, pass anything else on.
pub fn check_reply(payload: Vec<u8>) -> Result<Vec<u8>> {
    if payload.starts_with(ERROR_PREFIX.as_bytes()) {
        return Err(ExecError::Remote(
            String::from_utf8_lossy(&payload).into_owned(),
        ));
    }
    Ok(payload)
}

/// One request, one raw reply payload. Callers run `check_reply` before
/// decoding.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, kind: RequestKind, node: PlanId, payload: Vec<u8>) -> Result<Vec<u8>>;
}

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Vec<u8>>>>>;

/// Transport over one TCP connection. A background task reads replies and
/// completes the matching in-flight request.
pub struct TcpTransport {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Pending,
    next_id: AtomicU32,
    reader: JoinHandle<()>,
}

impl TcpTransport {
    pub async fn connect(addr: &str, max_frame: u64) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::info!(%addr, "connected to server");
        let (mut rd, wr) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let inflight = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            loop {
                match Reply::read_from(&mut rd, max_frame).await {
                    Ok(reply) => {
                        let waiter = inflight.lock().ok().and_then(|mut p| p.remove(&reply.id));
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(reply.payload);
                            }
                            None => {
                                tracing::warn!(id = reply.id.get(), "reply for unknown request")
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transport reader stopped");
                        // Dropping the senders fails every waiting request.
                        if let Ok(mut p) = inflight.lock() {
                            p.clear();
                        }
                        break;
                    }
                }
            }
        });
        Ok(Self {
            writer: tokio::sync::Mutex::new(wr),
            pending,
            next_id: AtomicU32::new(0),
            reader,
        })
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, kind: RequestKind, node: PlanId, payload: Vec<u8>) -> Result<Vec<u8>> {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| ExecError::Transport("pending request table poisoned".into()))?
            .insert(id, tx);
        let request = Request {
            id,
            kind,
            node,
            payload,
        };
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = request.write_to(&mut *writer).await {
                if let Ok(mut p) = self.pending.lock() {
                    p.remove(&id);
                }
                return Err(e);
            }
        }
        rx.await
            .map_err(|_| ExecError::Transport("connection closed before reply".into()))
    }
}

/// In-process transport: frames every request and reply exactly as the TCP
/// transport does and hands them to a `Server` directly.
pub struct LoopbackTransport {
    server: Arc<Server>,
    next_id: AtomicU32,
}

impl LoopbackTransport {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            next_id: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, kind: RequestKind, node: PlanId, payload: Vec<u8>) -> Result<Vec<u8>> {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let wire = Request {
            id,
            kind,
            node,
            payload,
        }
        .encode();
        let reply = self.server.handle(Request::decode(&wire)?).await;
        let reply = Reply::decode(&reply.encode())?;
        if reply.id != id {
            return Err(ExecError::Transport(format!(
                "reply id {} does not match request {}",
                reply.id.get(),
                id.get()
            )));
        }
        Ok(reply.payload)
    }
}
