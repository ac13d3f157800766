use super::message::{GetArgs, GetReply, PutAppendArgs, PutAppendReply, Request, Response};
use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode request: {0}")]
    Encode(#[from] ron::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[from] ron::error::SpannedError),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("connection closed before a response arrived")]
    Closed,
    #[error("server is unreachable")]
    Disconnected,
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// One addressable server of the cluster, as seen by the clerk.
///
/// An `Err` means no response was received; it never carries a server
/// verdict. Server verdicts travel in the reply's `Status`.
pub trait ServerEnd: Send + Sync {
    fn get(&self, args: GetArgs) -> impl Future<Output = Result<GetReply, TransportError>> + Send;

    fn put_append(
        &self,
        args: PutAppendArgs,
    ) -> impl Future<Output = Result<PutAppendReply, TransportError>> + Send;
}

/// Talks to a server over TCP, one connection per call.
///
/// Each call writes one RON-encoded `Request` line and reads back one
/// `Response` line.
#[derive(Debug, Clone)]
pub struct TcpServerEnd {
    addr: String,
    rpc_timeout: Duration,
}

impl TcpServerEnd {
    pub fn new(addr: impl Into<String>, rpc_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            rpc_timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, request: &Request) -> Result<Response, TransportError> {
        match tokio::time::timeout(self.rpc_timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.rpc_timeout)),
        }
    }

    async fn exchange(&self, request: &Request) -> Result<Response, TransportError> {
        let mut line = ron::to_string(request)?;
        line.push('\n');

        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (reader, mut writer) = stream.into_split();

        debug!(target: "clerk_transport", "sending to {}: {}", self.addr, line.trim_end());
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let mut reply = String::new();
        if BufReader::new(reader).read_line(&mut reply).await? == 0 {
            return Err(TransportError::Closed);
        }

        Ok(ron::from_str(reply.trim_end())?)
    }
}

impl ServerEnd for TcpServerEnd {
    async fn get(&self, args: GetArgs) -> Result<GetReply, TransportError> {
        match self.call(&Request::Get(args)).await? {
            Response::Get(reply) => Ok(reply),
            other => Err(TransportError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    async fn put_append(&self, args: PutAppendArgs) -> Result<PutAppendReply, TransportError> {
        match self.call(&Request::PutAppend(args)).await? {
            Response::PutAppend(reply) => Ok(reply),
            other => Err(TransportError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}
