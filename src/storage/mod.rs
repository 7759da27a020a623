//! Object storage for backup artifacts.
//!
//! Every operation targets the single configured bucket. Keys are the bare
//! artifact keys; any folder prefix is the implementation's business.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::errors::Result;

#[cfg(test)]
pub mod memory;
pub mod s3;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, replacing any existing object.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()>;

    /// Download `key` into `local_path`, creating parent directories.
    async fn download(&self, key: &str, local_path: &Path) -> Result<()>;

    /// Every key in the bucket, with pagination fully drained.
    async fn list(&self) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Upload unless `key` is already present. Returns whether a transfer happened.
    async fn upload_if_missing(&self, local_path: &Path, key: &str) -> Result<bool> {
        if self.exists(key).await? {
            debug!(key = %key, "already in storage, skipping upload");
            return Ok(false);
        }
        self.upload(local_path, key).await?;
        Ok(true)
    }
}
