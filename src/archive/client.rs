// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Multi-endpoint archive client.
//!
//! Each request goes to the next Up endpoint in round-robin order. A network
//! error or timeout marks that endpoint Down and the request moves on to the
//! next eligible endpoint. Once every endpoint has been tried, the client
//! waits for the earliest retry-after deadline, tries that endpoint one more
//! time, and gives up with [`ArchiveError::Unreachable`].
//!
//! An error *answer* from the archive ([`ArchiveError::Remote`]) is never
//! retried: the endpoint was reachable, the request itself was refused.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::endpoint::{EndpointStatus, EndpointTable};
use super::protocol::{
    BundleParams, BundleResult, DestroyParams, DestroyResult, Method, QueryParams, QueryResult,
    RetrieveParams, RetrieveResult, RpcRequest,
};
use super::transport::{ArchiveConnector, ArchiveTransport, TcpConnector, TransportError};
use super::ArchiveError;
use crate::blob::{BlobKey, ItemRef};
use crate::config::TierEngineConfig;
use crate::metrics;

/// Timing knobs for the archive client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveTimeouts {
    /// Bound on dialing a new connection
    pub connect: Duration,
    /// Bound on one request/reply exchange
    pub request: Duration,
    /// How long a failed endpoint stays Down
    pub retry_after: Duration,
}

impl Default for ArchiveTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(30),
            retry_after: Duration::from_secs(5),
        }
    }
}

impl ArchiveTimeouts {
    pub fn from_config(config: &TierEngineConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            request: config.request_timeout(),
            retry_after: config.endpoint_retry_after(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleReceipt {
    pub tag: String,
    pub written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyReceipt {
    pub destroyed: Vec<String>,
}

/// Outcome of a single attempt against one endpoint.
enum Attempt {
    /// Endpoint could not be reached or did not answer in time
    Failed(TransportError),
    /// Endpoint answered; the error is final
    Rejected(ArchiveError),
}

pub struct ArchiveClient {
    endpoints: EndpointTable,
    connector: Arc<dyn ArchiveConnector>,
    timeouts: ArchiveTimeouts,
    next_id: AtomicU64,
}

impl ArchiveClient {
    pub fn new<I, S>(addresses: I, connector: Arc<dyn ArchiveConnector>, timeouts: ArchiveTimeouts) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: EndpointTable::new(addresses, timeouts.retry_after),
            connector,
            timeouts,
            next_id: AtomicU64::new(1),
        }
    }

    /// Client over TCP to the endpoints listed in `config.archive_endpoints`.
    pub fn from_config(config: &TierEngineConfig) -> Self {
        Self::new(
            config.archive_endpoints.iter().cloned(),
            Arc::new(TcpConnector),
            ArchiveTimeouts::from_config(config),
        )
    }

    pub fn endpoint_states(&self) -> Vec<EndpointStatus> {
        self.endpoints.snapshot()
    }

    /// Ping every endpoint once. Returns how many answered.
    ///
    /// Endpoints that fail are marked Down. Fails only when none answer.
    pub async fn connect(&self) -> Result<usize, ArchiveError> {
        let addresses = self.endpoints.addresses();
        let mut alive = 0;
        let mut last_error = String::from("no archive endpoints configured");

        for (idx, address) in addresses.iter().enumerate() {
            match self.attempt(idx, address, Method::Ping, &Value::Null).await {
                Ok(_) => {
                    alive += 1;
                    info!(endpoint = %address, "Archive endpoint connected");
                }
                Err(Attempt::Failed(e)) => {
                    self.endpoints.mark_failure(idx, Instant::now());
                    warn!(endpoint = %address, error = %e, "Archive endpoint did not answer ping");
                    last_error = e.to_string();
                }
                // Answered, even if with an error: reachable.
                Err(Attempt::Rejected(_)) => alive += 1,
            }
        }

        if alive == 0 {
            return Err(ArchiveError::Unreachable {
                method: Method::Ping.to_string(),
                attempts: addresses.len(),
                last_error,
            });
        }
        info!(alive, total = addresses.len(), "Archive client connected");
        Ok(alive)
    }

    /// Write `items` into `tag` as one bundle.
    pub async fn bundle(&self, items: &[ItemRef], tag: &str, format: &str) -> Result<BundleReceipt, ArchiveError> {
        let params = BundleParams {
            src: items.iter().map(ItemRef::uri).collect(),
            names: items.iter().map(|i| i.name.clone()).collect(),
            dst: tag.to_string(),
            format: format.to_string(),
        };
        let result: BundleResult = self.request(Method::Bundle, &params).await?;
        if result.status != "success" {
            return Err(ArchiveError::Remote {
                method: Method::Bundle.to_string(),
                message: format!("bundle into '{}' reported status '{}'", tag, result.status),
            });
        }
        Ok(BundleReceipt {
            tag: result.tag,
            written: result.written.unwrap_or(items.len()),
        })
    }

    /// Fetch one payload; [`ArchiveError::NotFound`] if absent.
    pub async fn read(&self, key: &BlobKey) -> Result<Vec<u8>, ArchiveError> {
        let params = RetrieveParams {
            tag: key.tag().to_string(),
            blob_name: key.name().to_string(),
        };
        let result: RetrieveResult = self.request(Method::Retrieve, &params).await?;
        match result.into_bytes() {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(ArchiveError::NotFound(key.clone())),
            Err(detail) => Err(ArchiveError::Protocol {
                method: Method::Retrieve.to_string(),
                detail,
            }),
        }
    }

    /// Keys matching both glob patterns, sorted.
    pub async fn query(&self, tag_pattern: &str, name_pattern: &str) -> Result<Vec<BlobKey>, ArchiveError> {
        let params = QueryParams {
            tag_pattern: tag_pattern.to_string(),
            blob_pattern: name_pattern.to_string(),
        };
        let result: QueryResult = self.request(Method::Query, &params).await?;

        let mut keys: Vec<BlobKey> = result
            .matches
            .into_iter()
            .filter_map(|m| {
                let name = m.blob_name?;
                match BlobKey::new(m.tag, name) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        debug!(error = %e, "Skipping malformed query match");
                        None
                    }
                }
            })
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Remove every item under each of `tags`.
    pub async fn destroy(&self, tags: &[String]) -> Result<DestroyReceipt, ArchiveError> {
        let params = DestroyParams { tags: tags.to_vec() };
        let result: DestroyResult = self.request(Method::Destroy, &params).await?;
        Ok(DestroyReceipt {
            destroyed: result.destroyed,
        })
    }

    async fn request<P, R>(&self, method: Method, params: &P) -> Result<R, ArchiveError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| ArchiveError::Protocol {
            method: method.to_string(),
            detail: e.to_string(),
        })?;
        let value = self.call(method, &params).await?;
        serde_json::from_value(value).map_err(|e| ArchiveError::Protocol {
            method: method.to_string(),
            detail: e.to_string(),
        })
    }

    /// Send `method` with failover across endpoints.
    async fn call(&self, method: Method, params: &Value) -> Result<Value, ArchiveError> {
        let mut tried: Vec<usize> = Vec::with_capacity(self.endpoints.len());
        let mut last_error = String::from("no archive endpoints configured");

        while let Some((idx, address)) = self.endpoints.next_up(Instant::now(), &tried) {
            tried.push(idx);
            match self.attempt(idx, &address, method, params).await {
                Ok(value) => return Ok(value),
                Err(Attempt::Rejected(e)) => return Err(e),
                Err(Attempt::Failed(e)) => {
                    self.endpoints.mark_failure(idx, Instant::now());
                    metrics::record_failover(&address);
                    warn!(
                        endpoint = %address,
                        method = %method,
                        error = %e,
                        "Archive request failed, trying next endpoint"
                    );
                    last_error = e.to_string();
                }
            }
        }

        let mut attempts = tried.len();
        if let Some((idx, address, deadline)) = self.endpoints.earliest_down() {
            debug!(endpoint = %address, method = %method, "All endpoints down, waiting for earliest retry");
            tokio::time::sleep_until(deadline).await;
            attempts += 1;
            match self.attempt(idx, &address, method, params).await {
                Ok(value) => return Ok(value),
                Err(Attempt::Rejected(e)) => return Err(e),
                Err(Attempt::Failed(e)) => {
                    self.endpoints.mark_failure(idx, Instant::now());
                    last_error = e.to_string();
                }
            }
        }

        warn!(method = %method, attempts, error = %last_error, "Archive unreachable");
        Err(ArchiveError::Unreachable {
            method: method.to_string(),
            attempts,
            last_error,
        })
    }

    /// One exchange with endpoint `idx`. Marks success on any answer.
    async fn attempt(&self, idx: usize, address: &str, method: Method, params: &Value) -> Result<Value, Attempt> {
        let connection = match self.endpoints.connection_for(idx) {
            Some(conn) => conn,
            None => {
                let conn = self.dial(address).await.map_err(|e| {
                    metrics::record_archive_attempt(address, method.as_str(), "error");
                    Attempt::Failed(e)
                })?;
                self.endpoints.store_connection(idx, Arc::clone(&conn));
                conn
            }
        };

        let request = RpcRequest::new(method, params.clone(), self.next_id.fetch_add(1, Ordering::Relaxed));
        let outcome = match tokio::time::timeout(self.timeouts.request, connection.call(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeouts.request)),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(TransportError::Decode(detail)) => {
                metrics::record_archive_attempt(address, method.as_str(), "error");
                self.endpoints.discard_connection(idx);
                return Err(Attempt::Rejected(ArchiveError::Protocol {
                    method: method.to_string(),
                    detail,
                }));
            }
            Err(e) => {
                metrics::record_archive_attempt(address, method.as_str(), "error");
                return Err(Attempt::Failed(e));
            }
        };

        self.endpoints.mark_success(idx);
        if let Some(message) = response.error {
            metrics::record_archive_attempt(address, method.as_str(), "rejected");
            metrics::record_remote_error(method.as_str());
            debug!(endpoint = %address, method = %method, error = %message, "Archive rejected request");
            return Err(Attempt::Rejected(ArchiveError::Remote {
                method: method.to_string(),
                message,
            }));
        }

        metrics::record_archive_attempt(address, method.as_str(), "success");
        debug!(endpoint = %address, method = %method, "Archive request ok");
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn dial(&self, address: &str) -> Result<Arc<dyn ArchiveTransport>, TransportError> {
        match tokio::time::timeout(self.timeouts.connect, self.connector.connect(address)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeouts.connect)),
        }
    }
}
