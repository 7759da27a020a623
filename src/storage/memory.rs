// In-memory bucket used by the workflow tests.
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::ObjectStore;
use crate::errors::{AppError, Result};

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_deletes: Mutex<HashSet<String>>,
    fail_uploads: Mutex<bool>,
    uploads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for key in keys {
            let key = key.into();
            store.put(&key, key.as_bytes());
        }
        store
    }

    pub fn put(&self, key: &str, content: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), content.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn fail_deletes_of(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_uploads(&self) {
        *self.fail_uploads.lock().unwrap() = true;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        if *self.fail_uploads.lock().unwrap() {
            return Err(AppError::storage("upload", key, "bucket unreachable"));
        }
        let content = tokio::fs::read(local_path).await?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.put(key, &content);
        Ok(())
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let content = self
            .get(key)
            .ok_or_else(|| AppError::NotFound(format!("'{}' is not in storage", key)))?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, content).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.keys())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(AppError::storage("delete", key, "access denied"));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}
