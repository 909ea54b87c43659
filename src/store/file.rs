//! Filesystem-backed object store
//!
//! Layout: one directory per bucket under the root, the object key mapped
//! onto nested paths. Version tokens and in-flight writes live under a
//! reserved `.meta/` directory per bucket, so they never share a namespace
//! with object keys.
//!
//! ```text
//! <root>/
//!   <bucket>/
//!     subscriptions
//!     .meta/
//!       versions/subscriptions
//!       tmp/
//! ```

use super::{new_version, ObjectStore, PutCondition, StoredObject};
use crate::error::{PushError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Per-bucket directory holding version tokens and temp files
const META_DIR: &str = ".meta";

/// JSON-file style object store rooted at a directory
///
/// Writes are atomic (temp file + rename). Reads share a lock with writes so
/// a body is always returned with its own version token. The lock is
/// in-process; the store is not safe for concurrent writers across processes.
pub struct FileObjectStore {
    root: PathBuf,
    lock: RwLock<()>,
}

/// Filesystem locations of one object
struct ObjectPaths {
    data: PathBuf,
    version: PathBuf,
    tmp_dir: PathBuf,
}

impl FileObjectStore {
    /// Create a store rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: RwLock::new(()),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, bucket: &str, key: &str) -> Result<ObjectPaths> {
        let bucket_dir = self.root.join(safe_segment(bucket)?);

        let mut relative = PathBuf::new();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            relative.push(safe_segment(segment)?);
        }
        if relative.as_os_str().is_empty() {
            return Err(PushError::InvalidInput(format!("Empty object key '{}'", key)));
        }
        if relative.starts_with(META_DIR) {
            return Err(PushError::InvalidInput(format!(
                "Object key '{}' uses the reserved '{}' prefix",
                key, META_DIR
            )));
        }

        let meta = bucket_dir.join(META_DIR);
        Ok(ObjectPaths {
            data: bucket_dir.join(&relative),
            version: meta.join("versions").join(&relative),
            tmp_dir: meta.join("tmp"),
        })
    }

    async fn read_version(paths: &ObjectPaths) -> Result<Option<String>> {
        match fs::read_to_string(&paths.version).await {
            Ok(v) => Ok(Some(v.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Objects written by other tools have no version token
                if fs::try_exists(&paths.data).await.unwrap_or(false) {
                    Ok(Some(String::new()))
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(storage_error("read version of", &paths.data, e)),
        }
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        let paths = self.paths(bucket, key)?;
        let _guard = self.lock.read().await;

        let body = match fs::read(&paths.data).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read", &paths.data, e)),
        };
        let version = Self::read_version(&paths).await?.unwrap_or_default();

        Ok(Some(StoredObject {
            body: Bytes::from(body),
            version,
            content_type: mime_guess::from_path(&paths.data).first().map(|m| m.to_string()),
        }))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        condition: PutCondition,
    ) -> Result<String> {
        let paths = self.paths(bucket, key)?;
        let _guard = self.lock.write().await;

        let current = Self::read_version(&paths).await?;
        if !condition.holds(current.as_deref()) {
            return Err(PushError::Conflict {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        for dir in [paths.data.parent(), paths.version.parent(), Some(paths.tmp_dir.as_path())]
            .into_iter()
            .flatten()
        {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| storage_error("create directory", dir, e))?;
        }

        let version = new_version();
        let tmp_path = paths.tmp_dir.join(&version);
        write_synced(&tmp_path, &body).await?;
        fs::write(&paths.version, &version)
            .await
            .map_err(|e| storage_error("write version of", &paths.data, e))?;
        fs::rename(&tmp_path, &paths.data)
            .await
            .map_err(|e| storage_error("rename", &tmp_path, e))?;

        tracing::debug!(
            path = %paths.data.display(),
            content_type,
            version = %version,
            "Object stored"
        );
        Ok(version)
    }

    fn name(&self) -> &str {
        "file"
    }
}

async fn write_synced(path: &Path, body: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| storage_error("create", path, e))?;
    file.write_all(body)
        .await
        .map_err(|e| storage_error("write", path, e))?;
    file.sync_all()
        .await
        .map_err(|e| storage_error("sync", path, e))
}

fn safe_segment(segment: &str) -> Result<&str> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(segment),
        _ => Err(PushError::InvalidInput(format!(
            "Invalid path segment '{}'",
            segment
        ))),
    }
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> PushError {
    PushError::StorageUnavailable(format!("Failed to {} {}: {}", action, path.display(), e))
}
