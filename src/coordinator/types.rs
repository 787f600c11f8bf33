//! Public types for the tier engine coordinator.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::blob::KeyError;
use crate::resolver::ResolveError;
use crate::storage::traits::CacheError;

/// Machine-readable failure category carried on an error [`StepOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unreachable,
    RemoteError,
    CacheUnavailable,
    UnknownScheme,
    UnresolvedReference,
    MissingBlobNames,
    NotFound,
    Protocol,
    InvalidParams,
    UnknownAction,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::RemoteError => "remote_error",
            Self::CacheUnavailable => "cache_unavailable",
            Self::UnknownScheme => "unknown_scheme",
            Self::UnresolvedReference => "unresolved_reference",
            Self::MissingBlobNames => "missing_blob_names",
            Self::NotFound => "not_found",
            Self::Protocol => "protocol",
            Self::InvalidParams => "invalid_params",
            Self::UnknownAction => "unknown_action",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can stop an action.
///
/// Never escapes [`TierEngine::execute`](super::TierEngine::execute): it is
/// folded into an error outcome at the action boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("invalid blob key: {0}")]
    Key(#[from] KeyError),

    #[error("evict needs at least one blob name")]
    MissingBlobNames,

    #[error("invalid parameters for {action}: {reason}")]
    InvalidParams { action: String, reason: String },

    #[error("unknown action: {0}")]
    UnknownAction(String),
}

impl EngineError {
    pub fn invalid_params(action: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidParams {
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Archive(ArchiveError::Unreachable { .. }) => ErrorKind::Unreachable,
            Self::Archive(ArchiveError::Remote { .. }) => ErrorKind::RemoteError,
            Self::Archive(ArchiveError::NotFound(_)) => ErrorKind::NotFound,
            Self::Archive(ArchiveError::Protocol { .. }) => ErrorKind::Protocol,
            Self::Cache(CacheError::Unavailable { .. }) => ErrorKind::CacheUnavailable,
            Self::Resolve(ResolveError::UnknownScheme { .. }) => ErrorKind::UnknownScheme,
            Self::Resolve(ResolveError::UnresolvedReference { .. }) => ErrorKind::UnresolvedReference,
            Self::Key(_) | Self::InvalidParams { .. } => ErrorKind::InvalidParams,
            Self::MissingBlobNames => ErrorKind::MissingBlobNames,
            Self::UnknownAction(_) => ErrorKind::UnknownAction,
        }
    }
}

/// Result of one action. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    /// Human-readable summary
    pub text: String,
    /// Structured result (counts, keys, flags)
    pub data: Value,
    pub reward: f64,
    /// Set iff the action failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Retrieved bytes (retrieve only)
    #[serde(skip)]
    pub payload: Option<Vec<u8>>,
}

impl StepOutcome {
    pub(crate) fn success(text: String, data: Value, reward: f64, payload: Option<Vec<u8>>) -> Self {
        Self {
            text,
            data,
            reward,
            error_kind: None,
            payload,
        }
    }

    /// Error outcome. `data` keeps whatever partial results the action had,
    /// plus the error message under `"error"`.
    pub(crate) fn failure(action: &str, error: &EngineError, data: Value, reward: f64) -> Self {
        let mut data = match data {
            Value::Object(map) => Value::Object(map),
            _ => json!({}),
        };
        if let Value::Object(map) = &mut data {
            map.insert("error".to_string(), Value::String(error.to_string()));
        }
        Self {
            text: format!("{} failed: {}", action, error),
            data,
            reward,
            error_kind: Some(error.kind()),
            payload: None,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }
}
