//! Archive transports.
//!
//! A transport carries one request/reply exchange at a time over one
//! connection. [`ArchiveConnector`] opens connections so the client can
//! discard a bad one and dial a fresh one.
//!
//! [`TcpTransport`] frames every message as a single line of JSON.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::protocol::{RpcRequest, RpcResponse};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },
    #[error("i/o error: {0}")]
    Io(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed by peer")]
    Closed,
    /// The peer answered, but not with a valid response envelope.
    #[error("undecodable response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    async fn call(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError>;

    /// False once the connection can no longer be trusted to carry another
    /// exchange (e.g. a previous call was abandoned mid-flight).
    fn is_healthy(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait ArchiveConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ArchiveTransport>, TransportError>;
}

/// Strip a `tcp://` scheme, leaving `host:port`.
pub fn socket_address(address: &str) -> &str {
    address.strip_prefix("tcp://").unwrap_or(address)
}

pub struct TcpConnector;

#[async_trait]
impl ArchiveConnector for TcpConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ArchiveTransport>, TransportError> {
        let stream = TcpStream::connect(socket_address(address))
            .await
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);
        Ok(Arc::new(TcpTransport::new(stream)))
    }
}

pub struct TcpTransport {
    stream: Mutex<BufReader<TcpStream>>,
    /// Cleared while an exchange is in flight; stays cleared if the caller
    /// drops the future (timeout), since the reply would desync the stream.
    healthy: AtomicBool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(BufReader::new(stream)),
            healthy: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ArchiveTransport for TcpTransport {
    async fn call(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        let mut frame = serde_json::to_vec(request).map_err(|e| TransportError::Io(e.to_string()))?;
        frame.push(b'\n');

        let mut stream = self.stream.lock().await;
        self.healthy.store(false, Ordering::SeqCst);

        let io = |e: std::io::Error| TransportError::Io(e.to_string());
        stream.get_mut().write_all(&frame).await.map_err(io)?;
        stream.get_mut().flush().await.map_err(io)?;

        let mut line = String::new();
        let read = stream.read_line(&mut line).await.map_err(io)?;
        if read == 0 {
            return Err(TransportError::Closed);
        }

        let response: RpcResponse =
            serde_json::from_str(line.trim_end()).map_err(|e| TransportError::Decode(e.to_string()))?;
        if response.id.is_some() && response.id != request.id {
            return Err(TransportError::Decode(format!(
                "response id {:?} does not match request id {:?}",
                response.id, request.id
            )));
        }

        self.healthy.store(true, Ordering::SeqCst);
        Ok(response)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::protocol::Method;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_socket_address() {
        assert_eq!(socket_address("tcp://127.0.0.1:5560"), "127.0.0.1:5560");
        assert_eq!(socket_address("localhost:5560"), "localhost:5560");
    }

    /// Echo server: answers every line with `{"result": <method>, "id": <id>}`.
    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap() > 0 {
                let req: RpcRequest = serde_json::from_str(line.trim_end()).unwrap();
                let resp = RpcResponse::ok(json!(req.method), req.id);
                let mut out = serde_json::to_vec(&resp).unwrap();
                out.push(b'\n');
                reader.get_mut().write_all(&out).await.unwrap();
                line.clear();
            }
        });
        format!("tcp://{}", addr)
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let address = echo_server().await;
        let transport = TcpConnector.connect(&address).await.unwrap();

        for id in 1..=3 {
            let resp = transport.call(&RpcRequest::new(Method::Ping, json!({}), id)).await.unwrap();
            assert_eq!(resp.result, Some(json!("ping")));
            assert_eq!(resp.id, Some(id));
        }
        assert!(transport.is_healthy());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TcpConnector.connect(&format!("tcp://{}", addr)).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = socket.read(&mut buf).await;
            // drop without answering
        });

        let transport = TcpConnector.connect(&format!("tcp://{}", addr)).await.unwrap();
        let result = transport.call(&RpcRequest::new(Method::Ping, json!({}), 1)).await;
        assert_eq!(result.unwrap_err(), TransportError::Closed);
        assert!(!transport.is_healthy());
    }

    #[tokio::test]
    async fn test_garbage_reply_is_decode_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(b"not json\n").await.unwrap();
            // keep the socket open until the client is done
            let _ = reader.read_line(&mut line).await;
        });

        let transport = TcpConnector.connect(&format!("tcp://{}", addr)).await.unwrap();
        let result = transport.call(&RpcRequest::new(Method::Ping, json!({}), 1)).await;
        assert!(matches!(result, Err(TransportError::Decode(_))));
    }
}
