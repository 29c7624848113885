//! Filesystem store rooted at a state directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;
use walkdir::WalkDir;

use crate::Location;
use crate::error::{StorageError, StorageResult};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for `key`. Keys are relative, `/`-separated and may
    /// not contain `.` or `..` components.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, part| path.join(part)))
    }

    pub async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<Location> {
        let path = self.path_for(key)?;
        let temp = temp_sibling(&path, "tmp");
        write_file(&temp, bytes).await?;
        self.commit(&temp, &path).await?;
        debug!(key, bytes = bytes.len(), "stored locally");
        Ok(Location::local(key, path))
    }

    /// Write `bytes` next to `key`'s final path without making it visible.
    pub(crate) async fn stage(&self, key: &str, bytes: &[u8]) -> StorageResult<PathBuf> {
        let path = self.path_for(key)?;
        let temp = temp_sibling(&path, "upload");
        write_file(&temp, bytes).await?;
        Ok(temp)
    }

    /// Move a staged temp file into place under `key`.
    pub(crate) async fn commit(&self, temp: &Path, final_path: &Path) -> StorageResult<()> {
        tokio::fs::rename(temp, final_path).await.map_err(|e| {
            StorageError::Io(format!("rename to {}: {e}", final_path.display()))
        })
    }

    pub async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(StorageError::Io(format!("read {}: {e}", path.display()))),
        }
    }

    /// Remove `key`. Removing a key that does not exist succeeds.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "removed locally");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(format!("remove {}: {e}", path.display()))),
        }
    }

    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    /// Keys starting with `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> StorageResult<Vec<Location>> {
        let dir = match prefix.rfind('/') {
            Some(idx) => self.path_for(&prefix[..idx])?,
            None => self.root.clone(),
        };
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut found = Vec::new();
            for entry in WalkDir::new(&dir) {
                let entry = entry.map_err(|e| StorageError::Io(e.to_string()))?;
                if !entry.file_type().is_file() || entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    found.push(Location::local(key, entry.path().to_path_buf()));
                }
            }
            found.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(found)
        })
        .await
        .map_err(|e| StorageError::Io(e.to_string()))?
    }
}

pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Hidden temp path in the same directory, so the final rename is atomic.
fn temp_sibling(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{tag}-{}-{n}", std::process::id()))
}

async fn write_file(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::Io(format!("create {}: {e}", parent.display())))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| StorageError::Io(format!("write {}: {e}", path.display())))
}
