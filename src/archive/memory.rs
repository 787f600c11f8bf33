//! In-process archive speaking the archive wire protocol.
//!
//! Stands in for a real archive deployment in tests and demos. One
//! `InMemoryArchive` can back any number of endpoint addresses; each address
//! can be taken down or made to hang independently, so failover paths can be
//! exercised without a network.
//!
//! [`serve_tcp`](InMemoryArchive::serve_tcp) exposes the same archive over
//! newline-delimited JSON for use with the TCP transport.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{
    BundleParams, BundleResult, DestroyParams, DestroyResult, Method, QueryMatch, QueryParams, QueryResult,
    RetrieveParams, RetrieveResult, RpcRequest, RpcResponse,
};
use super::transport::{ArchiveConnector, ArchiveTransport, TransportError};
use crate::blob::ItemScheme;
use crate::pattern::GlobPattern;

type Tags = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

#[derive(Default)]
struct Inner {
    tags: RwLock<Tags>,
    down: DashSet<String>,
    hanging: DashSet<String>,
    calls: DashMap<String, u64>,
    connects: DashMap<String, u64>,
}

#[derive(Clone, Default)]
pub struct InMemoryArchive {
    inner: Arc<Inner>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that hands out in-process transports to this archive.
    pub fn connector(&self) -> Arc<dyn ArchiveConnector> {
        Arc::new(MemoryConnector {
            archive: self.clone(),
        })
    }

    /// Store a payload directly, bypassing the protocol.
    pub fn insert(&self, tag: &str, name: &str, data: Vec<u8>) {
        self.inner
            .tags
            .write()
            .entry(tag.to_string())
            .or_default()
            .insert(name.to_string(), data);
    }

    pub fn get(&self, tag: &str, name: &str) -> Option<Vec<u8>> {
        self.inner.tags.read().get(tag).and_then(|t| t.get(name)).cloned()
    }

    pub fn tags(&self) -> Vec<String> {
        self.inner.tags.read().keys().cloned().collect()
    }

    /// Total stored items across all tags.
    pub fn len(&self) -> usize {
        self.inner.tags.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse connections and fail in-flight calls on `address`.
    pub fn set_endpoint_down(&self, address: &str, down: bool) {
        if down {
            self.inner.down.insert(address.to_string());
        } else {
            self.inner.down.remove(address);
        }
    }

    /// Accept calls on `address` but never answer them.
    pub fn set_endpoint_hanging(&self, address: &str, hanging: bool) {
        if hanging {
            self.inner.hanging.insert(address.to_string());
        } else {
            self.inner.hanging.remove(address);
        }
    }

    fn is_down(&self, address: &str) -> bool {
        self.inner.down.contains(address)
    }

    fn is_hanging(&self, address: &str) -> bool {
        self.inner.hanging.contains(address)
    }

    /// Requests that reached `address`.
    pub fn calls_to(&self, address: &str) -> u64 {
        self.inner.calls.get(address).map(|c| *c).unwrap_or(0)
    }

    /// Connections opened to `address`.
    pub fn connects_to(&self, address: &str) -> u64 {
        self.inner.connects.get(address).map(|c| *c).unwrap_or(0)
    }

    /// Answer one request.
    pub async fn handle(&self, request: &RpcRequest) -> RpcResponse {
        let id = request.id;
        let Some(method) = Method::parse(&request.method) else {
            return RpcResponse::err(format!("unknown method: {}", request.method), id);
        };
        let result = match method {
            Method::Ping => Ok(json!("pong")),
            Method::Bundle => match params(&request.params) {
                Ok(p) => self.bundle(p).await,
                Err(e) => Err(e),
            },
            Method::Query => params(&request.params).and_then(|p| self.query(p)),
            Method::Retrieve => params(&request.params).and_then(|p| self.retrieve(p)),
            Method::Destroy => params(&request.params).and_then(|p| self.destroy(p)),
        };
        match result {
            Ok(value) => RpcResponse::ok(value, id),
            Err(message) => RpcResponse::err(message, id),
        }
    }

    async fn bundle(&self, p: BundleParams) -> Result<Value, String> {
        if p.dst.is_empty() {
            return Err("bundle destination tag is empty".to_string());
        }
        // Read everything first: a bundle lands whole or not at all.
        let mut loaded = Vec::with_capacity(p.src.len());
        for (i, src) in p.src.iter().enumerate() {
            let path = strip_scheme(src)?;
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| format!("cannot read {}: {}", src, e))?;
            let name = match p.names.get(i) {
                Some(name) if !name.is_empty() => name.clone(),
                _ => Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string()),
            };
            loaded.push((name, data));
        }

        let written = loaded.len();
        {
            let mut tags = self.inner.tags.write();
            let entry = tags.entry(p.dst.clone()).or_default();
            for (name, data) in loaded {
                entry.insert(name, data);
            }
        }
        debug!(tag = %p.dst, written, format = %p.format, "Bundle stored");
        to_value(BundleResult {
            status: "success".to_string(),
            tag: p.dst,
            written: Some(written),
        })
    }

    fn query(&self, p: QueryParams) -> Result<Value, String> {
        let tag_pattern = GlobPattern::new(&p.tag_pattern).map_err(|e| e.to_string())?;
        let name_pattern = GlobPattern::new(&p.blob_pattern).map_err(|e| e.to_string())?;
        let matches = self
            .inner
            .tags
            .read()
            .iter()
            .filter(|(tag, _)| tag_pattern.matches(tag))
            .flat_map(|(tag, blobs)| {
                blobs
                    .keys()
                    .filter(|name| name_pattern.matches(name))
                    .map(|name| QueryMatch {
                        tag: tag.clone(),
                        blob_name: Some(name.clone()),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        to_value(QueryResult { matches })
    }

    fn retrieve(&self, p: RetrieveParams) -> Result<Value, String> {
        let result = match self.get(&p.tag, &p.blob_name) {
            Some(data) => RetrieveResult::from_bytes(&data),
            None => RetrieveResult {
                data: None,
                encoding: None,
            },
        };
        to_value(result)
    }

    fn destroy(&self, p: DestroyParams) -> Result<Value, String> {
        let destroyed: Vec<String> = {
            let mut tags = self.inner.tags.write();
            p.tags.into_iter().filter(|tag| tags.remove(tag).is_some()).collect()
        };
        to_value(DestroyResult {
            status: "success".to_string(),
            destroyed,
        })
    }

    /// Serve this archive on `listener` until the task is aborted.
    pub fn serve_tcp(&self, listener: TcpListener) -> JoinHandle<()> {
        let archive = self.clone();
        tokio::spawn(async move {
            let address = match listener.local_addr() {
                Ok(addr) => format!("tcp://{}", addr),
                Err(e) => {
                    warn!(error = %e, "Archive listener has no local address");
                    return;
                }
            };
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        debug!(peer = %peer, "Archive connection accepted");
                        let archive = archive.clone();
                        let address = address.clone();
                        tokio::spawn(async move {
                            if let Err(e) = archive.serve_connection(socket, &address).await {
                                debug!(error = %e, "Archive connection closed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Archive accept failed");
                        return;
                    }
                }
            }
        })
    }

    async fn serve_connection(&self, socket: TcpStream, address: &str) -> std::io::Result<()> {
        let mut reader = BufReader::new(socket);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 || self.is_down(address) {
                return Ok(());
            }
            *self.inner.calls.entry(address.to_string()).or_insert(0) += 1;
            let response = match serde_json::from_str::<RpcRequest>(line.trim_end()) {
                Ok(request) => self.handle(&request).await,
                Err(e) => RpcResponse::err(format!("malformed request: {}", e), None),
            };
            let mut frame = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
            frame.push(b'\n');
            reader.get_mut().write_all(&frame).await?;
        }
    }
}

fn params<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    serde_json::from_value(value.clone()).map_err(|e| format!("invalid params: {}", e))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn strip_scheme(src: &str) -> Result<&str, String> {
    [ItemScheme::File, ItemScheme::Hdf5]
        .iter()
        .find_map(|s| src.strip_prefix(s.prefix()))
        .ok_or_else(|| format!("unsupported source reference: {}", src))
}

struct MemoryConnector {
    archive: InMemoryArchive,
}

#[async_trait]
impl ArchiveConnector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ArchiveTransport>, TransportError> {
        if self.archive.is_down(address) {
            return Err(TransportError::Connect {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        *self.archive.inner.connects.entry(address.to_string()).or_insert(0) += 1;
        Ok(Arc::new(MemoryTransport {
            archive: self.archive.clone(),
            address: address.to_string(),
        }))
    }
}

struct MemoryTransport {
    archive: InMemoryArchive,
    address: String,
}

#[async_trait]
impl ArchiveTransport for MemoryTransport {
    async fn call(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        if self.archive.is_down(&self.address) {
            return Err(TransportError::Io("connection reset by peer".to_string()));
        }
        *self.archive.inner.calls.entry(self.address.clone()).or_insert(0) += 1;
        if self.archive.is_hanging(&self.address) {
            std::future::pending::<()>().await;
        }
        Ok(self.archive.handle(request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::client::{ArchiveClient, ArchiveTimeouts};
    use crate::archive::transport::TcpConnector;
    use crate::blob::BlobKey;

    fn request(method: Method, params: Value) -> RpcRequest {
        RpcRequest::new(method, params, 1)
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected() {
        let archive = InMemoryArchive::new();
        let req = RpcRequest {
            method: "context_nuke".to_string(),
            params: Value::Null,
            id: Some(4),
        };
        let resp = archive.handle(&req).await;
        assert!(resp.error.unwrap().contains("unknown method"));
        assert_eq!(resp.id, Some(4));
    }

    #[tokio::test]
    async fn test_bundle_with_missing_file_stores_nothing() {
        let archive = InMemoryArchive::new();
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(&good, b"ok").unwrap();

        let params = json!({
            "src": [format!("file::{}", good.display()), format!("file::{}", dir.path().join("gone.csv").display())],
            "names": ["good.csv", "gone.csv"],
            "dst": "docs",
        });
        let resp = archive.handle(&request(Method::Bundle, params)).await;
        assert!(resp.error.is_some());
        assert!(archive.is_empty());
    }

    #[tokio::test]
    async fn test_bundle_uses_given_names() {
        let archive = InMemoryArchive::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bin");
        std::fs::write(&path, b"payload").unwrap();

        let params = json!({
            "src": [format!("hdf5::{}", path.display())],
            "names": ["sub/x.bin"],
            "dst": "runs",
        });
        let resp = archive.handle(&request(Method::Bundle, params)).await;
        let result: BundleResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.written, Some(1));
        assert_eq!(archive.get("runs", "sub/x.bin"), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_bad_params_are_rejected() {
        let archive = InMemoryArchive::new();
        let resp = archive.handle(&request(Method::Retrieve, json!({"tag": 3}))).await;
        assert!(resp.error.unwrap().starts_with("invalid params"));
    }

    #[tokio::test]
    async fn test_down_endpoint_refuses_connections() {
        let archive = InMemoryArchive::new();
        archive.set_endpoint_down("tcp://x:1", true);
        assert!(archive.connector().connect("tcp://x:1").await.is_err());
        assert_eq!(archive.connects_to("tcp://x:1"), 0);

        archive.set_endpoint_down("tcp://x:1", false);
        assert!(archive.connector().connect("tcp://x:1").await.is_ok());
        assert_eq!(archive.connects_to("tcp://x:1"), 1);
    }

    #[tokio::test]
    async fn test_served_over_tcp() {
        let archive = InMemoryArchive::new();
        archive.insert("docs", "a.csv", b"over the wire".to_vec());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("tcp://{}", listener.local_addr().unwrap());
        let server = archive.serve_tcp(listener);

        let client = ArchiveClient::new([address.clone()], Arc::new(TcpConnector), ArchiveTimeouts::default());
        assert_eq!(client.connect().await.unwrap(), 1);

        let key = BlobKey::new("docs", "a.csv").unwrap();
        assert_eq!(client.read(&key).await.unwrap(), b"over the wire".to_vec());
        assert_eq!(client.query("d*", "*.csv").await.unwrap(), vec![key]);
        assert_eq!(archive.calls_to(&address), 3);

        server.abort();
    }
}
