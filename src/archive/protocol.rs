//! Request/reply messages exchanged with archive endpoints.
//!
//! JSON-RPC style envelope:
//!
//! ```json
//! {"method": "context_retrieve", "params": {"tag": "docs", "blob_name": "a.csv"}, "id": 7}
//! {"result": {"data": "68656c6c6f", "encoding": "hex"}, "id": 7}
//! {"error": "unknown method: nope", "id": 8}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Archive RPC methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Ping,
    Bundle,
    Query,
    Retrieve,
    Destroy,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Bundle => "context_bundle",
            Self::Query => "context_query",
            Self::Retrieve => "context_retrieve",
            Self::Destroy => "context_destroy",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ping" => Some(Self::Ping),
            "context_bundle" => Some(Self::Bundle),
            "context_query" => Some(Self::Query),
            "context_retrieve" => Some(Self::Retrieve),
            "context_destroy" => Some(Self::Destroy),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<u64>,
}

impl RpcRequest {
    pub fn new(method: Method, params: Value, id: u64) -> Self {
        Self {
            method: method.as_str().to_string(),
            params,
            id: Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub id: Option<u64>,
}

impl RpcResponse {
    pub fn ok(result: Value, id: Option<u64>) -> Self {
        Self {
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn err(message: impl Into<String>, id: Option<u64>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleParams {
    /// Source references (`file::/path`, `hdf5::/path`)
    pub src: Vec<String>,
    /// Blob name for each source, same order as `src`
    #[serde(default)]
    pub names: Vec<String>,
    pub dst: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "arrow".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleResult {
    pub status: String,
    pub tag: String,
    /// Items the endpoint reports as stored; older endpoints omit it
    #[serde(default)]
    pub written: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default = "wildcard")]
    pub tag_pattern: String,
    #[serde(default = "wildcard")]
    pub blob_pattern: String,
}

fn wildcard() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub tag: String,
    #[serde(default)]
    pub blob_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub matches: Vec<QueryMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveParams {
    pub tag: String,
    pub blob_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveResult {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub encoding: Option<String>,
}

impl RetrieveResult {
    /// Hex-encode `bytes` for transport.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: Some(Value::String(hex::encode(bytes))),
            encoding: Some("hex".to_string()),
        }
    }

    /// Decode the payload. `Ok(None)` means the blob does not exist.
    pub fn into_bytes(self) -> Result<Option<Vec<u8>>, String> {
        match (self.data, self.encoding.as_deref()) {
            (None, _) | (Some(Value::Null), _) => Ok(None),
            (Some(Value::String(s)), Some("hex")) => hex::decode(&s)
                .map(Some)
                .map_err(|e| format!("bad hex payload: {}", e)),
            (Some(Value::String(s)), None) => Ok(Some(s.into_bytes())),
            (Some(_), Some(other)) => Err(format!("unsupported encoding '{}'", other)),
            (Some(value), None) => serde_json::to_vec(&value).map(Some).map_err(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyParams {
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub destroyed: Vec<String>,
}
