//! Durable archive tier.
//!
//! # Architecture
//!
//! ```text
//! ArchiveClient ──► EndpointTable (round-robin, Up/Down, retry-after)
//!       │
//!       └──► ArchiveConnector ──► ArchiveTransport ──► endpoint
//!              (TcpConnector | InMemoryArchive::connector)
//! ```
//!
//! Requests and replies use the JSON envelope in [`protocol`].

pub mod client;
pub mod endpoint;
pub mod memory;
pub mod protocol;
pub mod transport;

pub use client::{ArchiveClient, ArchiveTimeouts, BundleReceipt, DestroyReceipt};
pub use endpoint::EndpointStatus;
pub use memory::InMemoryArchive;
pub use transport::{ArchiveConnector, ArchiveTransport, TcpConnector, TransportError};

use thiserror::Error;

use crate::blob::BlobKey;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    /// Every endpoint failed at the network level.
    #[error("archive unreachable for {method} after {attempts} attempt(s): {last_error}")]
    Unreachable {
        method: String,
        attempts: usize,
        last_error: String,
    },

    /// The archive answered with an error.
    #[error("archive rejected {method}: {message}")]
    Remote { method: String, message: String },

    #[error("blob not found in archive: {0}")]
    NotFound(BlobKey),

    /// The archive answered with something that could not be decoded.
    #[error("malformed {method} response: {detail}")]
    Protocol { method: String, detail: String },
}
