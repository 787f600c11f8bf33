//! Archive endpoint liveness table.
//!
//! Tracks each configured endpoint as Up or Down. A Down endpoint carries a
//! retry-after deadline; once it passes, the endpoint is eligible again.
//! Selection is round-robin over eligible endpoints.
//!
//! The table lives behind a `parking_lot::Mutex` and is never held across an
//! `.await`: callers take what they need (an address, a connection handle)
//! and release the lock before doing any I/O.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::transport::ArchiveTransport;
use crate::metrics;

/// Consecutive failures after which the connection is discarded.
pub const RECONNECT_AFTER_FAILURES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Up,
    Down { retry_after: Instant },
}

pub struct Endpoint {
    pub address: String,
    pub liveness: Liveness,
    pub consecutive_failures: u32,
    pub connection: Option<Arc<dyn ArchiveTransport>>,
}

impl Endpoint {
    fn new(address: String) -> Self {
        Self {
            address,
            liveness: Liveness::Up,
            consecutive_failures: 0,
            connection: None,
        }
    }

    fn is_eligible(&self, now: Instant) -> bool {
        match self.liveness {
            Liveness::Up => true,
            Liveness::Down { retry_after } => retry_after <= now,
        }
    }
}

/// Point-in-time view of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub address: String,
    pub up: bool,
    pub consecutive_failures: u32,
    pub connected: bool,
}

struct Inner {
    endpoints: Vec<Endpoint>,
    cursor: usize,
}

pub struct EndpointTable {
    inner: Mutex<Inner>,
    retry_after: Duration,
}

impl EndpointTable {
    pub fn new<I, S>(addresses: I, retry_after: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = addresses.into_iter().map(|a| Endpoint::new(a.into())).collect();
        Self {
            inner: Mutex::new(Inner { endpoints, cursor: 0 }),
            retry_after,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addresses(&self) -> Vec<String> {
        self.inner.lock().endpoints.iter().map(|e| e.address.clone()).collect()
    }

    /// Next eligible endpoint in round-robin order, skipping `exclude`.
    pub fn next_up(&self, now: Instant, exclude: &[usize]) -> Option<(usize, String)> {
        let mut inner = self.inner.lock();
        let n = inner.endpoints.len();
        for step in 0..n {
            let idx = (inner.cursor + step) % n;
            if exclude.contains(&idx) || !inner.endpoints[idx].is_eligible(now) {
                continue;
            }
            inner.cursor = (idx + 1) % n;
            return Some((idx, inner.endpoints[idx].address.clone()));
        }
        None
    }

    /// Down endpoint with the earliest retry-after deadline.
    pub fn earliest_down(&self) -> Option<(usize, String, Instant)> {
        let inner = self.inner.lock();
        inner
            .endpoints
            .iter()
            .enumerate()
            .filter_map(|(idx, e)| match e.liveness {
                Liveness::Down { retry_after } => Some((idx, e.address.clone(), retry_after)),
                Liveness::Up => None,
            })
            .min_by_key(|(_, _, deadline)| *deadline)
    }

    /// Live connection for `idx`, if one exists and is still healthy.
    /// An unhealthy connection is dropped so the caller dials a new one.
    pub fn connection_for(&self, idx: usize) -> Option<Arc<dyn ArchiveTransport>> {
        let mut inner = self.inner.lock();
        let endpoint = inner.endpoints.get_mut(idx)?;
        match &endpoint.connection {
            Some(conn) if conn.is_healthy() => Some(Arc::clone(conn)),
            Some(_) => {
                endpoint.connection = None;
                metrics::record_reconnect(&endpoint.address);
                None
            }
            None => None,
        }
    }

    pub fn store_connection(&self, idx: usize, connection: Arc<dyn ArchiveTransport>) {
        if let Some(endpoint) = self.inner.lock().endpoints.get_mut(idx) {
            endpoint.connection = Some(connection);
        }
    }

    pub fn mark_success(&self, idx: usize) {
        let mut inner = self.inner.lock();
        let Some(endpoint) = inner.endpoints.get_mut(idx) else {
            return;
        };
        if matches!(endpoint.liveness, Liveness::Down { .. }) {
            info!(endpoint = %endpoint.address, "Archive endpoint recovered");
        }
        endpoint.liveness = Liveness::Up;
        endpoint.consecutive_failures = 0;
        metrics::set_endpoint_up(&endpoint.address, true);
    }

    pub fn mark_failure(&self, idx: usize, now: Instant) {
        let mut inner = self.inner.lock();
        let Some(endpoint) = inner.endpoints.get_mut(idx) else {
            return;
        };
        endpoint.consecutive_failures += 1;
        endpoint.liveness = Liveness::Down {
            retry_after: now + self.retry_after,
        };
        if endpoint.consecutive_failures >= RECONNECT_AFTER_FAILURES && endpoint.connection.take().is_some() {
            metrics::record_reconnect(&endpoint.address);
        }
        warn!(
            endpoint = %endpoint.address,
            failures = endpoint.consecutive_failures,
            retry_after_ms = self.retry_after.as_millis() as u64,
            "Archive endpoint marked down"
        );
        metrics::set_endpoint_up(&endpoint.address, false);
    }

    /// Drop the connection for `idx` regardless of failure count.
    pub fn discard_connection(&self, idx: usize) {
        if let Some(endpoint) = self.inner.lock().endpoints.get_mut(idx) {
            if endpoint.connection.take().is_some() {
                metrics::record_reconnect(&endpoint.address);
            }
        }
    }

    pub fn snapshot(&self) -> Vec<EndpointStatus> {
        self.inner
            .lock()
            .endpoints
            .iter()
            .map(|e| EndpointStatus {
                address: e.address.clone(),
                up: e.liveness == Liveness::Up,
                consecutive_failures: e.consecutive_failures,
                connected: e.connection.is_some(),
            })
            .collect()
    }
}
