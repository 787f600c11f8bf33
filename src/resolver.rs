//! Source reference expansion.
//!
//! Turns a `scheme::location` reference into the concrete items the archive
//! can transfer:
//!
//! | Reference | Result |
//! |---|---|
//! | `file::/a/b.csv`, `hdf5::/a/run.h5` | the item itself |
//! | `folder::/a` | every regular file below `/a`, named by relative path |
//! | `mem::tag/name` | the cached payload, spilled to a local file |
//!
//! Nothing is memoized; every ingest resolves afresh.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::blob::{BlobKey, ItemRef, ItemScheme};
use crate::cache::CacheTier;

const SEPARATOR: &str = "::";

/// Byte limit on the readable part of a spill file name.
const SPILL_NAME_BYTES: usize = 96;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown scheme '{scheme}' in source reference '{reference}'")]
    UnknownScheme { scheme: String, reference: String },

    #[error("cannot resolve '{reference}': {reason}")]
    UnresolvedReference { reference: String, reason: String },
}

impl ResolveError {
    fn unresolved(reference: &str, reason: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

pub struct UriResolver {
    cache: Option<Arc<CacheTier>>,
    spill_dir: PathBuf,
}

impl UriResolver {
    /// `cache` backs `mem::` references; without it they are rejected.
    pub fn new(cache: Option<Arc<CacheTier>>, spill_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            spill_dir: spill_dir.into(),
        }
    }

    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    /// Resolve several references into one flat list, in order.
    ///
    /// On failure, spill files written for earlier references are removed.
    pub async fn resolve_all<S: AsRef<str>>(&self, sources: &[S]) -> Result<Vec<ItemRef>, ResolveError> {
        let mut items = Vec::new();
        for source in sources {
            match self.resolve(source.as_ref()).await {
                Ok(resolved) => items.extend(resolved),
                Err(e) => {
                    self.release_spills(&items).await;
                    return Err(e);
                }
            }
        }
        Ok(items)
    }

    /// Delete the spill files among `items`. Other items are left alone.
    /// Returns how many were removed.
    pub async fn release_spills(&self, items: &[ItemRef]) -> usize {
        let mut removed = 0;
        for item in items.iter().filter(|i| i.path.starts_with(&self.spill_dir)) {
            match tokio::fs::remove_file(&item.path).await {
                Ok(()) => removed += 1,
                Err(e) => debug!(path = %item.path.display(), error = %e, "Spill file not removed"),
            }
        }
        removed
    }

    pub async fn resolve(&self, source: &str) -> Result<Vec<ItemRef>, ResolveError> {
        let Some((scheme, location)) = source.split_once(SEPARATOR) else {
            return Err(ResolveError::UnknownScheme {
                scheme: String::new(),
                reference: source.to_string(),
            });
        };

        match scheme {
            "file" => passthrough(source, ItemScheme::File, location),
            "hdf5" => passthrough(source, ItemScheme::Hdf5, location),
            "folder" => self.resolve_folder(source, location).await,
            "mem" => self.resolve_mem(source, location).await,
            other => Err(ResolveError::UnknownScheme {
                scheme: other.to_string(),
                reference: source.to_string(),
            }),
        }
    }

    async fn resolve_folder(&self, source: &str, location: &str) -> Result<Vec<ItemRef>, ResolveError> {
        let root = PathBuf::from(location);
        let walk_root = root.clone();
        let items = tokio::task::spawn_blocking(move || walk_folder(&walk_root))
            .await
            .map_err(|e| ResolveError::unresolved(source, format!("directory walk aborted: {}", e)))?
            .map_err(|reason| ResolveError::unresolved(source, reason))?;

        if items.is_empty() {
            warn!(folder = %root.display(), "Folder reference resolved to zero files");
        } else {
            debug!(folder = %root.display(), files = items.len(), "Folder reference expanded");
        }
        Ok(items)
    }

    async fn resolve_mem(&self, source: &str, location: &str) -> Result<Vec<ItemRef>, ResolveError> {
        let Some(cache) = &self.cache else {
            return Err(ResolveError::unresolved(source, "mem:: references need a cache tier"));
        };
        let Some((tag, name)) = location.split_once('/') else {
            return Err(ResolveError::unresolved(source, "expected mem::<tag>/<name>"));
        };
        let key = BlobKey::new(tag, name).map_err(|e| ResolveError::unresolved(source, e.to_string()))?;

        let data = match cache.get(&key).await {
            Ok(Some(data)) => data,
            Ok(None) => return Err(ResolveError::unresolved(source, "blob is not in the cache")),
            Err(e) => return Err(ResolveError::unresolved(source, e.to_string())),
        };

        let path = self.spill_dir.join(spill_file_name(&key));
        tokio::fs::create_dir_all(&self.spill_dir)
            .await
            .map_err(|e| ResolveError::unresolved(source, format!("cannot create spill dir: {}", e)))?;
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| ResolveError::unresolved(source, format!("cannot write spill file: {}", e)))?;

        debug!(key = %key, path = %path.display(), bytes = data.len(), "Cached blob spilled for ingest");
        Ok(vec![ItemRef::named(ItemScheme::File, path, key.name())])
    }
}

fn passthrough(source: &str, scheme: ItemScheme, location: &str) -> Result<Vec<ItemRef>, ResolveError> {
    if location.is_empty() {
        return Err(ResolveError::unresolved(source, "empty path"));
    }
    Ok(vec![ItemRef::new(scheme, location)])
}

/// Regular files below `root`, sorted by name within each directory.
fn walk_folder(root: &Path) -> Result<Vec<ItemRef>, String> {
    if !root.is_dir() {
        return Err(format!("{} is not a directory", root.display()));
    }
    let mut items = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| e.to_string())?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        items.push(ItemRef::named(ItemScheme::File, path, relative_name(relative)));
    }
    Ok(items)
}

/// `/`-joined relative path, independent of the platform separator.
fn relative_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `{digest}_{readable name}`; the digest covers the whole key so distinct
/// keys never share a file.
fn spill_file_name(key: &BlobKey) -> String {
    let digest = Sha256::new()
        .chain_update(key.tag().as_bytes())
        .chain_update([0u8])
        .chain_update(key.name().as_bytes())
        .finalize();
    let mut readable = String::with_capacity(SPILL_NAME_BYTES);
    for c in format!("{}__{}", key.tag(), key.name()).chars() {
        let c = if matches!(c, '/' | '\\') { '_' } else { c };
        if readable.len() + c.len_utf8() > SPILL_NAME_BYTES {
            break;
        }
        readable.push(c);
    }
    format!("{}_{}", &hex::encode(digest)[..16], readable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryNode;
    use crate::storage::traits::CacheNode;
    use std::time::Duration;

    fn cache() -> Arc<CacheTier> {
        let nodes: Vec<Arc<dyn CacheNode>> = vec![Arc::new(InMemoryNode::default())];
        Arc::new(CacheTier::new(nodes, "test", Duration::from_secs(60), Duration::from_secs(1)))
    }

    fn resolver(spill: &Path) -> UriResolver {
        UriResolver::new(Some(cache()), spill)
    }

    #[tokio::test]
    async fn test_passthrough_schemes() {
        let spill = tempfile::tempdir().unwrap();
        let r = resolver(spill.path());

        let items = r.resolve("file::/data/test.csv").await.unwrap();
        assert_eq!(items, vec![ItemRef::new(ItemScheme::File, "/data/test.csv")]);

        let items = r.resolve("hdf5::/data/run.h5").await.unwrap();
        assert_eq!(items[0].scheme, ItemScheme::Hdf5);
        assert_eq!(items[0].name, "run.h5");

        assert!(matches!(
            r.resolve("file::").await,
            Err(ResolveError::UnresolvedReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_scheme_names_prefix() {
        let spill = tempfile::tempdir().unwrap();
        let r = resolver(spill.path());

        match r.resolve("s3::bucket/key").await {
            Err(ResolveError::UnknownScheme { scheme, .. }) => assert_eq!(scheme, "s3"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            r.resolve("/no/scheme").await,
            Err(ResolveError::UnknownScheme { .. })
        ));
    }

    #[tokio::test]
    async fn test_folder_expands_recursively_with_relative_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), b"b").unwrap();
        std::fs::write(dir.path().join("a.csv"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("a.csv"), b"nested").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let spill = tempfile::tempdir().unwrap();
        let items = resolver(spill.path())
            .resolve(&format!("folder::{}", dir.path().display()))
            .await
            .unwrap();

        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.csv", "sub/a.csv"]);
        assert!(items.iter().all(|i| i.scheme == ItemScheme::File));
    }

    #[tokio::test]
    async fn test_empty_folder_resolves_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let spill = tempfile::tempdir().unwrap();
        let items = resolver(spill.path())
            .resolve(&format!("folder::{}", dir.path().display()))
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_folder_on_a_file_is_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();

        let spill = tempfile::tempdir().unwrap();
        let r = resolver(spill.path());
        for target in [file, dir.path().join("missing")] {
            let result = r.resolve(&format!("folder::{}", target.display())).await;
            assert!(matches!(result, Err(ResolveError::UnresolvedReference { .. })));
        }
    }

    #[tokio::test]
    async fn test_mem_spills_cached_blob() {
        let spill = tempfile::tempdir().unwrap();
        let cache = cache();
        let key = BlobKey::new("docs", "nested/a.csv").unwrap();
        cache.put(&key, b"cached bytes", None).await.unwrap();

        let r = UriResolver::new(Some(Arc::clone(&cache)), spill.path());
        let items = r.resolve("mem::docs/nested/a.csv").await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "nested/a.csv");
        assert_eq!(items[0].path.parent(), Some(spill.path()));
        assert!(items[0].path.to_string_lossy().ends_with("_docs__nested_a.csv"));
        assert_eq!(std::fs::read(&items[0].path).unwrap(), b"cached bytes");

        assert_eq!(r.release_spills(&items).await, 1);
        assert!(!items[0].path.exists());
    }

    #[tokio::test]
    async fn test_spill_names_do_not_collide() {
        let spill = tempfile::tempdir().unwrap();
        let cache = cache();
        let left = BlobKey::new("a__b", "c").unwrap();
        let right = BlobKey::new("a", "b__c").unwrap();
        cache.put(&left, b"left", None).await.unwrap();
        cache.put(&right, b"right", None).await.unwrap();

        let r = UriResolver::new(Some(Arc::clone(&cache)), spill.path());
        let l = r.resolve("mem::a__b/c").await.unwrap();
        let rr = r.resolve("mem::a/b__c").await.unwrap();

        assert_ne!(l[0].path, rr[0].path);
        assert_eq!(std::fs::read(&l[0].path).unwrap(), b"left");
        assert_eq!(std::fs::read(&rr[0].path).unwrap(), b"right");
    }

    #[tokio::test]
    async fn test_release_spills_ignores_other_items() {
        let spill = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("keep.csv");
        std::fs::write(&plain, b"keep").unwrap();

        let cache = cache();
        cache.put(&BlobKey::new("t", "n").unwrap(), b"x", None).await.unwrap();
        let r = UriResolver::new(Some(cache), spill.path());

        let items = r
            .resolve_all(&[format!("file::{}", plain.display()), "mem::t/n".to_string()])
            .await
            .unwrap();
        assert_eq!(r.release_spills(&items).await, 1);
        assert!(plain.exists());
    }

    #[tokio::test]
    async fn test_failed_resolve_all_cleans_up_spills() {
        let spill = tempfile::tempdir().unwrap();
        let cache = cache();
        cache.put(&BlobKey::new("t", "n").unwrap(), b"x", None).await.unwrap();
        let r = UriResolver::new(Some(cache), spill.path());

        assert!(r.resolve_all(&["mem::t/n", "bogus::y"]).await.is_err());
        assert_eq!(std::fs::read_dir(spill.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_mem_miss_and_malformed_are_unresolved() {
        let spill = tempfile::tempdir().unwrap();
        let r = resolver(spill.path());

        for source in ["mem::docs/absent", "mem::no-slash", "mem::/name", "mem::tag/"] {
            assert!(
                matches!(r.resolve(source).await, Err(ResolveError::UnresolvedReference { .. })),
                "{} should not resolve",
                source
            );
        }

        let no_cache = UriResolver::new(None, spill.path());
        assert!(matches!(
            no_cache.resolve("mem::docs/a").await,
            Err(ResolveError::UnresolvedReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_all_flattens_in_order() {
        let spill = tempfile::tempdir().unwrap();
        let r = resolver(spill.path());
        let items = r
            .resolve_all(&["file::/x/one.csv", "hdf5::/x/two.h5"])
            .await
            .unwrap();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["one.csv", "two.h5"]);

        assert!(r.resolve_all(&["file::/x/one.csv", "bogus::y"]).await.is_err());
    }
}
