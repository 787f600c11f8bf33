//! Action vocabulary and parameter parsing.
//!
//! `execute("retrieve", {"tag": "docs", "name": "a.csv"})` arrives as a name
//! plus a JSON object; [`Action::parse`] turns that into a closed enum so the
//! coordinator matches exhaustively.
//!
//! Accepted names: `ingest` (`assimilate`), `query`, `retrieve`, `list`
//! (`list_blobs`), `evict` (`prune`), `destroy`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::types::EngineError;
use crate::blob::BlobKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Ingest {
        sources: Vec<String>,
        tag: String,
        /// Archive format; engine default when `None`
        format: Option<String>,
    },
    Query {
        tag_pattern: String,
        name_pattern: String,
    },
    Retrieve {
        key: BlobKey,
        /// Read straight from the archive without consulting the cache
        skip_cache: bool,
    },
    List {
        tag: String,
    },
    Evict {
        tag: String,
        names: Vec<String>,
    },
    Destroy {
        tags: Vec<String>,
    },
}

/// A string or a list of strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

fn wildcard() -> String {
    "*".to_string()
}

#[derive(Deserialize)]
struct IngestParams {
    #[serde(alias = "src", alias = "sources")]
    source: OneOrMany,
    #[serde(alias = "dst")]
    tag: String,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Deserialize)]
struct QueryParams {
    #[serde(default = "wildcard")]
    tag_pattern: String,
    #[serde(default = "wildcard", alias = "blob_pattern")]
    name_pattern: String,
}

#[derive(Deserialize)]
struct RetrieveParams {
    tag: String,
    #[serde(alias = "blob_name")]
    name: String,
    #[serde(default)]
    skip_cache: bool,
}

#[derive(Deserialize)]
struct ListParams {
    tag: String,
}

#[derive(Deserialize)]
struct EvictParams {
    tag: String,
    #[serde(default, alias = "blob_names")]
    names: Vec<String>,
}

#[derive(Deserialize)]
struct DestroyParams {
    #[serde(alias = "tag")]
    tags: OneOrMany,
}

impl Action {
    /// Canonical action name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ingest { .. } => "ingest",
            Self::Query { .. } => "query",
            Self::Retrieve { .. } => "retrieve",
            Self::List { .. } => "list",
            Self::Evict { .. } => "evict",
            Self::Destroy { .. } => "destroy",
        }
    }

    pub fn parse(name: &str, params: Map<String, Value>) -> Result<Self, EngineError> {
        match name {
            "ingest" | "assimilate" => {
                let p: IngestParams = decode("ingest", params)?;
                let sources = p.source.into_vec();
                if sources.is_empty() || sources.iter().any(String::is_empty) {
                    return Err(EngineError::invalid_params("ingest", "source must be non-empty"));
                }
                Ok(Self::Ingest {
                    sources,
                    tag: non_empty("ingest", "tag", p.tag)?,
                    format: p.format.filter(|f| !f.is_empty()),
                })
            }
            "query" => {
                let p: QueryParams = decode("query", params)?;
                Ok(Self::Query {
                    tag_pattern: p.tag_pattern,
                    name_pattern: p.name_pattern,
                })
            }
            "retrieve" => {
                let p: RetrieveParams = decode("retrieve", params)?;
                let key = BlobKey::new(p.tag, p.name).map_err(|e| EngineError::invalid_params("retrieve", e))?;
                Ok(Self::Retrieve {
                    key,
                    skip_cache: p.skip_cache,
                })
            }
            "list" | "list_blobs" => {
                let p: ListParams = decode("list", params)?;
                Ok(Self::List {
                    tag: non_empty("list", "tag", p.tag)?,
                })
            }
            "evict" | "prune" => {
                let p: EvictParams = decode("evict", params)?;
                Ok(Self::Evict {
                    tag: non_empty("evict", "tag", p.tag)?,
                    names: p.names,
                })
            }
            "destroy" => {
                let p: DestroyParams = decode("destroy", params)?;
                let tags = p.tags.into_vec();
                if tags.is_empty() || tags.iter().any(String::is_empty) {
                    return Err(EngineError::invalid_params("destroy", "tags must be non-empty"));
                }
                Ok(Self::Destroy { tags })
            }
            other => Err(EngineError::UnknownAction(other.to_string())),
        }
    }
}

fn decode<T: DeserializeOwned>(action: &str, params: Map<String, Value>) -> Result<T, EngineError> {
    serde_json::from_value(Value::Object(params)).map_err(|e| EngineError::invalid_params(action, e))
}

fn non_empty(action: &str, field: &str, value: String) -> Result<String, EngineError> {
    if value.is_empty() {
        return Err(EngineError::invalid_params(action, format!("{} must be non-empty", field)));
    }
    Ok(value)
}
