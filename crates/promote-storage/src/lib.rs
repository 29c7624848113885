//! promote-storage — where bundles, metadata and archives live.
//!
//! - **`local`**: filesystem store rooted at the state directory
//! - **`object_store`**: S3-compatible bucket with a local staged copy of every object

pub mod error;
pub mod local;
pub mod object_store;

use std::path::PathBuf;

use promote_core::{CredentialProvider, CredentialVars, Credentials, PromoteConfig, StorageKind};

pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use object_store::{ObjectStorage, ObjectStoreClient};

/// Where a stored object can be read back from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub key: String,
    pub local_path: Option<PathBuf>,
    pub remote_url: Option<String>,
}

impl Location {
    pub fn local(key: impl Into<String>, path: PathBuf) -> Self {
        Self {
            key: key.into(),
            local_path: Some(path),
            remote_url: None,
        }
    }

    /// Remote URL when there is one, otherwise the local path.
    pub fn uri(&self) -> String {
        match (&self.remote_url, &self.local_path) {
            (Some(url), _) => url.clone(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => self.key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Local(LocalStorage),
    ObjectStore(ObjectStorage),
}

impl StorageBackend {
    pub fn from_config(config: &PromoteConfig, provider: &dyn CredentialProvider) -> StorageResult<Self> {
        let local = LocalStorage::new(&config.deployment.state_dir);
        match config.deployment.storage {
            StorageKind::Local => Ok(StorageBackend::Local(local)),
            StorageKind::ObjectStore => Ok(StorageBackend::ObjectStore(ObjectStorage::new(
                object_store_client(config, provider)?,
                local,
            ))),
        }
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            StorageBackend::Local(_) => StorageKind::Local,
            StorageBackend::ObjectStore(_) => StorageKind::ObjectStore,
        }
    }

    /// The local store: the whole store for `Local`, the staging area for
    /// `ObjectStore`.
    pub fn local(&self) -> &LocalStorage {
        match self {
            StorageBackend::Local(store) => store,
            StorageBackend::ObjectStore(store) => store.staging(),
        }
    }

    pub async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<Location> {
        match self {
            StorageBackend::Local(store) => store.put(key, bytes).await,
            StorageBackend::ObjectStore(store) => store.put(key, bytes).await,
        }
    }

    pub async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        match self {
            StorageBackend::Local(store) => store.get(key).await,
            StorageBackend::ObjectStore(store) => store.get(key).await,
        }
    }

    /// Remove `key`. Removing a key that does not exist succeeds.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        match self {
            StorageBackend::Local(store) => store.delete(key).await,
            StorageBackend::ObjectStore(store) => store.delete(key).await,
        }
    }

    pub async fn list(&self, prefix: &str) -> StorageResult<Vec<Location>> {
        match self {
            StorageBackend::Local(store) => store.list(prefix).await,
            StorageBackend::ObjectStore(store) => store.list(prefix).await,
        }
    }
}

/// Object store client from `[object_store]`, with keys resolved up front.
pub fn object_store_client(
    config: &PromoteConfig,
    provider: &dyn CredentialProvider,
) -> StorageResult<ObjectStoreClient> {
    let store = config.object_store.as_ref().ok_or_else(|| {
        promote_core::CoreError::InvalidConfig("[object_store] is not configured".into())
    })?;
    let credentials = Credentials::resolve(
        provider,
        &CredentialVars {
            username_env: store.access_key_env.clone(),
            password_env: store.secret_key_env.clone(),
        },
    )?;
    Ok(ObjectStoreClient::from_config(store, credentials))
}
