//! Content-addressed cache for preprocessed extractor state.
//!
//! Keys are an xxh3-128 digest of everything that determines the cached
//! value (normalised config, query and document ids together with their
//! text), so two runs that would compute the same state share one entry and
//! an edited topic or document produces a new key. Presence of a key is the
//! only validity check.

use crate::error::PipelineError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;
use xxhash_rust::xxh3::Xxh3;

/// Cache key: a namespace plus a content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    digest: u128,
}

impl CacheKey {
    /// Starts a key builder for `namespace`.
    pub fn builder(namespace: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            namespace: namespace.to_string(),
            hasher: Xxh3::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Lowercase hex digest.
    pub fn hex(&self) -> String {
        format!("{:032x}", self.digest)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:032x}", self.namespace, self.digest)
    }
}

/// Feeds key material into the digest.
///
/// Every field is length-prefixed, so `["ab", "c"]` and `["a", "bc"]` hash
/// differently.
pub struct CacheKeyBuilder {
    namespace: String,
    hasher: Xxh3,
}

impl CacheKeyBuilder {
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn str(self, s: &str) -> Self {
        self.bytes(s.as_bytes())
    }

    /// Adds a config value via its JSON form.
    pub fn config<T: Serialize>(self, config: &T) -> Result<Self, PipelineError> {
        let json = serde_json::to_vec(config)?;
        Ok(self.bytes(&json))
    }

    /// Adds a set of ids in sorted order.
    pub fn ids<'a, I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ids: Vec<&str> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        self.hasher.update(&(ids.len() as u64).to_le_bytes());
        for id in ids {
            self = self.str(id);
        }
        self
    }

    /// Adds an id with its content. `None` (e.g. a document absent from the
    /// collection) hashes differently from any text, including `""`.
    pub fn entry(self, id: &str, content: Option<&str>) -> Self {
        let key = self.str(id);
        match content {
            Some(text) => key.bytes(&[1]).str(text),
            None => key.bytes(&[0]),
        }
    }

    pub fn finish(self) -> CacheKey {
        CacheKey {
            namespace: self.namespace,
            digest: self.hasher.digest128(),
        }
    }
}

/// Byte store addressed by [`CacheKey`].
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, PipelineError>;

    fn put(&self, key: &CacheKey, value: &[u8]) -> Result<(), PipelineError>;
}

// ============================================================================
// Disk store
// ============================================================================

/// Stores each entry as `<root>/<namespace>/<digest>`.
#[derive(Debug, Clone)]
pub struct DiskCacheStore {
    root: PathBuf,
}

impl DiskCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.namespace()).join(key.hex())
    }
}

impl CacheStore for DiskCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, PipelineError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => {
                debug!("Cache hit {}", key);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::io(&path, e)),
        }
    }

    fn put(&self, key: &CacheKey, value: &[u8]) -> Result<(), PipelineError> {
        write_atomic(&self.path_for(key), value)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<CacheKey, Vec<u8>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, PipelineError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| PipelineError::Serialization("cache lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &CacheKey, value: &[u8]) -> Result<(), PipelineError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| PipelineError::Serialization("cache lock poisoned".to_string()))?;
        entries.insert(key.clone(), value.to_vec());
        Ok(())
    }
}

/// Writes `bytes` to `path` via a uniquely named temp file in the same
/// directory, fsync and rename.
///
/// Concurrent writers of the same path each get their own temp file, so the
/// file at `path` is always one writer's complete output.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let mut file = temp_file_for(path)?;
    file.write_all(bytes).map_err(|e| PipelineError::io(file.path(), e))?;
    persist(file, path)
}

/// Creates the temp file that [`persist`] will move to `path`, creating the
/// parent directory if missing.
pub(crate) fn temp_file_for(path: &Path) -> Result<NamedTempFile, PipelineError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))
}

/// Syncs `file` and renames it over `path`.
pub(crate) fn persist(file: NamedTempFile, path: &Path) -> Result<(), PipelineError> {
    file.as_file()
        .sync_all()
        .map_err(|e| PipelineError::io(file.path(), e))?;
    file.persist(path).map_err(|e| PipelineError::io(path, e.error))?;
    Ok(())
}
