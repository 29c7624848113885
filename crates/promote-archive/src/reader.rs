//! Read access to wherever an archive happens to live.

use std::future::Future;

use promote_storage::{LocalStorage, ObjectStorage, StorageBackend, StorageResult};

/// Anything archive objects can be read from by store key.
pub trait ObjectReader: Sync {
    fn read(&self, key: &str) -> impl Future<Output = StorageResult<Vec<u8>>> + Send;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

impl ObjectReader for LocalStorage {
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.get(key).await
    }

    fn describe(&self) -> String {
        format!("local store {}", self.root().display())
    }
}

impl ObjectReader for StorageBackend {
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.get(key).await
    }

    fn describe(&self) -> String {
        format!("{} storage", self.kind())
    }
}

/// Reads keys straight from the bucket, ignoring staged copies.
pub struct BucketReader<'a>(pub &'a ObjectStorage);

impl ObjectReader for BucketReader<'_> {
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.0.get_remote(key).await
    }

    fn describe(&self) -> String {
        self.0.url_for("")
    }
}

/// Objects of one archive read from a bucket URL recorded in a rollback
/// index, bypassing any staged copies.
pub struct RemoteArchive<'a> {
    store: &'a ObjectStorage,
    archive_prefix: String,
    base_url: String,
}

impl<'a> RemoteArchive<'a> {
    /// `base_url` is the archive's remote URL, ending in `/`.
    pub fn new(store: &'a ObjectStorage, archive_key: &str, base_url: &str) -> Self {
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Self {
            store,
            archive_prefix: promote_core::layout::archive_prefix(archive_key),
            base_url,
        }
    }
}

impl ObjectReader for RemoteArchive<'_> {
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        match key.strip_prefix(&self.archive_prefix) {
            Some(relative) => self.store.get_url(&format!("{}{relative}", self.base_url)).await,
            None => self.store.get_remote(key).await,
        }
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}
