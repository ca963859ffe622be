//! Storage backend abstraction for audit documents.
//!
//! This module defines the object storage contract that the audit index
//! store is built on:
//! - Conditional writes with preconditions (append-only ledgers rely on
//!   `DoesNotExist`)
//! - Object metadata including `last_modified` and a version token
//! - Prefix listing
//!
//! The version token is an opaque `String` so backends can use whatever
//! their native notion of a generation is.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if object does not exist.
    DoesNotExist,
    /// Write only if object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns current version token.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

impl WriteResult {
    /// Returns true if the write was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Object version token for CAS operations.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for object storage.
///
/// All storage backends (memory, local filesystem) implement this trait.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads entire object.
    ///
    /// Returns `Error::NotFound` if object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes with optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if precondition not met.
    /// Never returns error for precondition failure - that's a normal result.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object.
    ///
    /// Succeeds even if object doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix.
    ///
    /// **Ordering**: Results are returned in arbitrary order. Callers requiring
    /// deterministic order should sort by `path`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// In-memory storage backend.
///
/// Thread-safe via `RwLock`. Used by tests and by short-lived embedded
/// deployments that do not need durability across restarts.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            version: self.version.to_string(),
            last_modified: Some(self.last_modified),
        }
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| Error::lock_poisoned())?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| Error::lock_poisoned())?;

        let current = objects.get(path);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(obj) if obj.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: obj.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |o| o.version + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(objects);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| Error::lock_poisoned())?
            .remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::lock_poisoned())?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::lock_poisoned())?;
        Ok(objects.get(path).map(|obj| obj.meta(path)))
    }
}

/// Directory under the root that holds in-flight temporary files.
const TMP_DIR: &str = ".vigil-tmp";

/// Local filesystem storage backend.
///
/// Object keys map to files below `root` (`/` separated). Writes go to a
/// temporary file first and are then published atomically: `DoesNotExist`
/// publishes with a hard link (which fails if the target exists), other
/// preconditions publish with a rename. Version tokens are the file's
/// modification time in nanoseconds.
///
/// Conditional writes are serialized through an async mutex, so CAS is only
/// safe within a single process.
#[derive(Debug)]
pub struct LocalFsBackend {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
    tmp_counter: AtomicU64,
}

impl LocalFsBackend {
    /// Opens (creating if needed) a backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(TMP_DIR)).map_err(|e| {
            Error::storage_with_source(format!("failed to create {}", root.display()), e)
        })?;
        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidInput(format!("invalid object key: {key:?}")));
        }
        if key.starts_with(TMP_DIR) {
            return Err(Error::InvalidInput(format!("reserved object key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    fn tmp_path(&self) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(TMP_DIR)
            .join(format!("{}-{n}", std::process::id()))
    }

    async fn meta_for(&self, key: &str, file: &Path) -> Result<Option<ObjectMeta>> {
        match tokio::fs::metadata(file).await {
            Ok(meta) if meta.is_file() => Ok(Some(fs_meta(key, &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(format!("stat {key}"), e)),
        }
    }

    async fn write_tmp(&self, data: &[u8]) -> Result<PathBuf> {
        use tokio::io::AsyncWriteExt;

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| Error::storage_with_source("create temp file", e))?;
        file.write_all(data)
            .await
            .map_err(|e| Error::storage_with_source("write temp file", e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::storage_with_source("sync temp file", e))?;
        Ok(tmp)
    }
}

fn fs_meta(key: &str, meta: &std::fs::Metadata) -> ObjectMeta {
    let modified = meta.modified().ok().map(DateTime::<Utc>::from);
    let version = modified
        .and_then(|m| m.timestamp_nanos_opt())
        .map_or_else(|| "0".to_string(), |n| n.to_string());
    ObjectMeta {
        path: key.to_string(),
        size: meta.len(),
        version,
        last_modified: modified,
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object not found: {path}")))
            }
            Err(e) => Err(Error::storage_with_source(format!("read {path}"), e)),
        }
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage_with_source(format!("mkdir for {path}"), e))?;
        }

        let _guard = self.write_lock.lock().await;
        let current = self.meta_for(path, &file).await?;

        match (&precondition, &current) {
            (WritePrecondition::DoesNotExist, Some(meta)) => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: meta.version.clone(),
                });
            }
            (WritePrecondition::MatchesVersion(expected), Some(meta))
                if &meta.version != expected =>
            {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: meta.version.clone(),
                });
            }
            (WritePrecondition::MatchesVersion(_), None) => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: "0".to_string(),
                });
            }
            _ => {}
        }

        let tmp = self.write_tmp(&data).await?;
        let publish = match precondition {
            WritePrecondition::DoesNotExist => tokio::fs::hard_link(&tmp, &file).await,
            _ => tokio::fs::rename(&tmp, &file).await,
        };
        // hard_link leaves the temp file behind; rename already consumed it
        let _ = tokio::fs::remove_file(&tmp).await;

        match publish {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let current_version = self
                    .meta_for(path, &file)
                    .await?
                    .map_or_else(|| "0".to_string(), |m| m.version);
                return Ok(WriteResult::PreconditionFailed { current_version });
            }
            Err(e) => return Err(Error::storage_with_source(format!("publish {path}"), e)),
        }

        let meta = self
            .meta_for(path, &file)
            .await?
            .ok_or_else(|| Error::storage(format!("object vanished after write: {path}")))?;
        Ok(WriteResult::Success {
            version: meta.version,
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.resolve(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(format!("delete {path}"), e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        // Start from the deepest directory named by the prefix.
        let dir_part = prefix.rfind('/').map_or("", |i| &prefix[..i]);
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir_part)?
        };

        let mut results = Vec::new();
        let mut stack = vec![(start, dir_part.to_string())];
        while let Some((dir, key_prefix)) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::storage_with_source(
                        format!("list {}", dir.display()),
                        e,
                    ));
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage_with_source("read_dir entry", e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if key_prefix.is_empty() && name == TMP_DIR {
                    continue;
                }
                let key = if key_prefix.is_empty() {
                    name
                } else {
                    format!("{key_prefix}/{name}")
                };
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| Error::storage_with_source(format!("stat {key}"), e))?;
                if meta.is_dir() {
                    stack.push((entry.path(), key));
                } else if key.starts_with(prefix) {
                    results.push(fs_meta(&key, &meta));
                }
            }
        }
        Ok(results)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let file = self.resolve(path)?;
        self.meta_for(path, &file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("hello world");

        let result = backend
            .put("test/file.txt", data.clone(), WritePrecondition::None)
            .await
            .expect("put should succeed");

        assert!(matches!(result, WriteResult::Success { ref version } if version == "1"));

        let retrieved = backend
            .get("test/file.txt")
            .await
            .expect("get should succeed");
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_precondition_does_not_exist() {
        let backend = MemoryBackend::new();

        let result = backend
            .put(
                "new.txt",
                Bytes::from("data"),
                WritePrecondition::DoesNotExist,
            )
            .await
            .expect("should succeed");
        assert!(result.is_success());

        let result = backend
            .put(
                "new.txt",
                Bytes::from("data2"),
                WritePrecondition::DoesNotExist,
            )
            .await
            .expect("should succeed");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));
        assert_eq!(backend.get("new.txt").await.unwrap(), Bytes::from("data"));
    }

    #[tokio::test]
    async fn test_precondition_matches_version() {
        let backend = MemoryBackend::new();

        let WriteResult::Success {
            version: first_version,
        } = backend
            .put("gen.txt", Bytes::from("v1"), WritePrecondition::None)
            .await
            .expect("should succeed")
        else {
            panic!("expected success");
        };

        let result = backend
            .put(
                "gen.txt",
                Bytes::from("v2"),
                WritePrecondition::MatchesVersion(first_version.clone()),
            )
            .await
            .expect("should succeed");
        assert!(result.is_success());

        let result = backend
            .put(
                "gen.txt",
                Bytes::from("v3"),
                WritePrecondition::MatchesVersion(first_version),
            )
            .await
            .expect("should succeed");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MemoryBackend::new();

        for key in ["a/1.txt", "a/2.txt", "b/1.txt"] {
            backend
                .put(key, Bytes::from("x"), WritePrecondition::None)
                .await
                .unwrap();
        }

        assert_eq!(backend.list("a/").await.unwrap().len(), 2);
        assert_eq!(backend.list("b/").await.unwrap().len(), 1);
        assert_eq!(backend.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let backend = MemoryBackend::new();

        backend
            .put("del.txt", Bytes::from("data"), WritePrecondition::None)
            .await
            .unwrap();
        backend.delete("del.txt").await.expect("should succeed");
        backend.delete("del.txt").await.expect("second delete ok");
        assert!(backend.head("del.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_fs_roundtrip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::open(dir.path()).unwrap();

        backend
            .put(
                "indices/a/docs/1.json",
                Bytes::from("{}"),
                WritePrecondition::None,
            )
            .await
            .unwrap();
        backend
            .put(
                "indices/a/docs/2.json",
                Bytes::from("{}"),
                WritePrecondition::None,
            )
            .await
            .unwrap();
        backend
            .put("indices/b/_index.json", Bytes::from("{}"), WritePrecondition::None)
            .await
            .unwrap();

        let mut listed: Vec<_> = backend
            .list("indices/a/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.path)
            .collect();
        listed.sort();
        assert_eq!(listed, vec!["indices/a/docs/1.json", "indices/a/docs/2.json"]);

        let all = backend.list("").await.unwrap();
        assert_eq!(all.len(), 3, "temp directory must not be listed");
        assert_eq!(
            backend.get("indices/b/_index.json").await.unwrap(),
            Bytes::from("{}")
        );
    }

    #[tokio::test]
    async fn test_local_fs_does_not_exist_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::open(dir.path()).unwrap();

        let first = backend
            .put("ledger/x.json", Bytes::from("one"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(first.is_success());

        let second = backend
            .put("ledger/x.json", Bytes::from("two"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(!second.is_success());
        assert_eq!(backend.get("ledger/x.json").await.unwrap(), Bytes::from("one"));
    }

    #[tokio::test]
    async fn test_local_fs_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::open(dir.path()).unwrap();

        let err = backend
            .put("../escape.txt", Bytes::from("x"), WritePrecondition::None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(backend.get("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_local_fs_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::open(dir.path()).unwrap();

        assert!(matches!(
            backend.get("nope.json").await,
            Err(Error::NotFound(_))
        ));
        assert!(backend.head("nope.json").await.unwrap().is_none());
        assert!(backend.list("nope/").await.unwrap().is_empty());
    }
}
