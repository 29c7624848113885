//! S3-compatible object store driven through the `aws s3` command line.
//!
//! Every object written remotely also lands in a local staging store, and
//! only after the upload succeeded.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use promote_core::Credentials;
use promote_core::config::ObjectStoreConfig;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::Location;
use crate::error::{StorageError, StorageResult};
use crate::local::{LocalStorage, validate_key};

const NOT_FOUND_MARKERS: [&str; 4] = ["(404)", "Not Found", "NoSuchKey", "does not exist"];
const TRANSPORT_MARKERS: [&str; 3] = [
    "Could not connect",
    "Connect timeout",
    "EndpointConnectionError",
];

#[derive(Debug, Clone)]
pub struct ObjectStoreClient {
    pub program: String,
    pub bucket: String,
    pub prefix: String,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub credentials: Credentials,
    pub timeout: Duration,
}

impl ObjectStoreClient {
    pub fn from_config(config: &ObjectStoreConfig, credentials: Credentials) -> Self {
        Self {
            program: config.program.clone(),
            bucket: config.bucket.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
            endpoint_url: config.endpoint_url.clone(),
            region: config.region.clone(),
            credentials,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// `s3://` URL of a store key.
    pub fn url_for(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}/{key}", self.bucket)
        } else {
            format!("s3://{}/{}/{key}", self.bucket, self.prefix)
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(endpoint) = &self.endpoint_url {
            command.arg("--endpoint-url").arg(endpoint);
        }
        if let Some(region) = &self.region {
            command.arg("--region").arg(region);
        }
        command
            .env("AWS_ACCESS_KEY_ID", &self.credentials.username)
            .env("AWS_SECRET_ACCESS_KEY", self.credentials.password())
            .arg("s3");
        command
    }

    pub async fn upload(&self, file: &Path, url: &str) -> StorageResult<()> {
        let mut command = self.command();
        command.arg("cp").arg(file).arg(url).arg("--only-show-errors");
        self.run(command, "upload", url).await.map(|_| ())
    }

    pub async fn download(&self, url: &str, file: &Path) -> StorageResult<()> {
        let mut command = self.command();
        command.arg("cp").arg(url).arg(file).arg("--only-show-errors");
        self.run(command, "download", url).await.map(|_| ())
    }

    pub async fn remove(&self, url: &str) -> StorageResult<()> {
        let mut command = self.command();
        command.arg("rm").arg(url).arg("--only-show-errors");
        match self.run(command, "remove", url).await {
            Ok(_) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Store keys (relative to the configured prefix) under `key_prefix`.
    pub async fn list(&self, key_prefix: &str) -> StorageResult<Vec<String>> {
        let url = self.url_for(key_prefix);
        let mut command = self.command();
        command.arg("ls").arg(&url).arg("--recursive");

        let stdout = match self.run(command, "list", &url).await {
            Ok(stdout) => stdout,
            // `aws s3 ls` exits non-zero when nothing matches.
            Err(StorageError::Remote { .. }) | Err(StorageError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let bucket_prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let mut keys: Vec<String> = stdout
            .lines()
            .filter_map(|line| line.split_whitespace().last())
            .filter_map(|object| object.strip_prefix(&bucket_prefix))
            .filter(|key| key.starts_with(key_prefix))
            .map(str::to_string)
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn run(&self, mut command: Command, operation: &str, url: &str) -> StorageResult<String> {
        debug!(operation, url, "object store call");
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = command.spawn().map_err(|e| StorageError::Remote {
            operation: operation.to_string(),
            message: format!("cannot start {}: {e}", self.program),
        })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(StorageError::Io(format!("{operation} {url}: {e}"))),
            Err(_) => {
                return Err(StorageError::Timeout {
                    operation: format!("object store {operation}"),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }
        if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
            return Err(StorageError::NotFound(url.to_string()));
        }
        if output.status.code() == Some(255) || TRANSPORT_MARKERS.iter().any(|m| stderr.contains(m)) {
            return Err(StorageError::Transport(stderr));
        }
        Err(StorageError::Remote {
            operation: operation.to_string(),
            message: stderr,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStorage {
    client: ObjectStoreClient,
    staging: LocalStorage,
}

impl ObjectStorage {
    pub fn new(client: ObjectStoreClient, staging: LocalStorage) -> Self {
        Self { client, staging }
    }

    pub fn client(&self) -> &ObjectStoreClient {
        &self.client
    }

    pub fn staging(&self) -> &LocalStorage {
        &self.staging
    }

    pub fn url_for(&self, key: &str) -> String {
        self.client.url_for(key)
    }

    pub async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<Location> {
        let final_path = self.staging.path_for(key)?;
        let temp = self.staging.stage(key, bytes).await?;
        let url = self.client.url_for(key);

        if let Err(e) = self.client.upload(&temp, &url).await {
            discard(&temp).await;
            return Err(e);
        }
        self.staging.commit(&temp, &final_path).await?;
        info!(key, url = %url, "stored in object store");
        Ok(Location {
            key: key.to_string(),
            local_path: Some(final_path),
            remote_url: Some(url),
        })
    }

    /// Staged copy first, then the bucket. Fetched objects are staged.
    pub async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        match self.staging.get(key).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let bytes = self.get_remote(key).await?;
        let temp = self.staging.stage(key, &bytes).await?;
        self.staging.commit(&temp, &self.staging.path_for(key)?).await?;
        Ok(bytes)
    }

    /// Read `key` from the bucket, ignoring any staged copy.
    pub async fn get_remote(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        self.get_url(&self.client.url_for(key)).await
    }

    /// Read an object by full `s3://` URL.
    pub async fn get_url(&self, url: &str) -> StorageResult<Vec<u8>> {
        let temp = self.staging.stage(".downloads/object", &[]).await?;
        let result = match self.client.download(url, &temp).await {
            Ok(()) => tokio::fs::read(&temp)
                .await
                .map_err(|e| StorageError::Io(format!("read {}: {e}", temp.display()))),
            Err(e) => Err(e),
        };
        discard(&temp).await;
        result
    }

    /// Remove `key` from the bucket, then its staged copy.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.client.remove(&self.client.url_for(key)).await?;
        self.staging.delete(key).await
    }

    pub async fn list(&self, prefix: &str) -> StorageResult<Vec<Location>> {
        let keys = self.client.list(prefix).await?;
        Ok(keys
            .into_iter()
            .map(|key| {
                let local_path = self.staging.path_for(&key).ok().filter(|p| p.exists());
                Location {
                    remote_url: Some(self.client.url_for(&key)),
                    local_path,
                    key,
                }
            })
            .collect())
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove temp file");
        }
    }
}
