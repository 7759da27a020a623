// dbbackup/src/storage/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::operation::list_objects_v2::ListObjectsV2Output;
use s3::primitives::ByteStream;
use std::future::Future;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::ObjectStore;
use crate::config::StorageConfig;
use crate::errors::{AppError, Result};

/// S3-compatible bucket (AWS, DigitalOcean Spaces, Scaleway, MinIO...).
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    folder_prefix: Option<String>,
}

impl S3Store {
    pub async fn connect(storage: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(storage.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &storage.access_key_id,
                storage.secret_access_key.expose(),
                None, // session_token
                None, // expiry
                "Static",
            ));
        if let Some(endpoint) = &storage.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(storage.force_path_style)
            .build();

        Self {
            client: s3::Client::from_conf(s3_config),
            bucket: storage.bucket_name.clone(),
            folder_prefix: storage.folder_prefix.clone(),
        }
    }

    fn object_key(&self, key: &str) -> String {
        object_key(self.folder_prefix.as_deref(), key)
    }
}

fn object_key(folder_prefix: Option<&str>, key: &str) -> String {
    match folder_prefix {
        Some(prefix) => format!("{}/{}", prefix, key),
        None => key.to_string(),
    }
}

fn strip_folder_prefix<'a>(folder_prefix: Option<&str>, object_key: &'a str) -> Option<&'a str> {
    match folder_prefix {
        Some(prefix) => object_key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/')),
        None => Some(object_key),
    }
}

/// Requests pages until the listing is no longer truncated and returns every
/// key, folder prefix removed. `fetch_page` receives the continuation token.
async fn drain_pages<F, Fut>(folder_prefix: Option<&str>, mut fetch_page: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListObjectsV2Output>>,
{
    let mut keys = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let page = fetch_page(continuation_token.take()).await?;
        keys.extend(
            page.contents()
                .iter()
                .filter_map(|object| object.key())
                .filter_map(|object_key| strip_folder_prefix(folder_prefix, object_key))
                .map(str::to_string),
        );

        match page.next_continuation_token() {
            Some(token) if page.is_truncated().unwrap_or(false) => {
                continuation_token = Some(token.to_string());
            }
            _ => break,
        }
    }
    Ok(keys)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let object_key = self.object_key(key);
        debug!(bucket = %self.bucket, key = %object_key, file = %local_path.display(), "uploading");

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| AppError::UploadFailed {
                key: key.to_string(),
                reason: format!("cannot read {}: {}", local_path.display(), e),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::UploadFailed {
                key: key.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        info!(bucket = %self.bucket, key = %object_key, "uploaded");
        Ok(())
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let object_key = self.object_key(key);
        debug!(bucket = %self.bucket, key = %object_key, file = %local_path.display(), "downloading");

        if let Some(parent_dir) = local_path.parent() {
            tokio::fs::create_dir_all(parent_dir).await?;
        }

        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|service_err| service_err.is_no_such_key())
                    .unwrap_or(false);
                if not_found {
                    AppError::NotFound(format!("'{}' is not in bucket {}", key, self.bucket))
                } else {
                    AppError::storage("download", key, DisplayErrorContext(&e))
                }
            })?;

        let mut output_file = File::create(local_path).await?;
        let mut total_bytes_downloaded = 0;
        while let Some(bytes_chunk) = object
            .body
            .try_next()
            .await
            .map_err(|e| AppError::storage("download", key, e))?
        {
            output_file.write_all(&bytes_chunk).await?;
            total_bytes_downloaded += bytes_chunk.len();
        }
        output_file.flush().await?;

        info!(key = %object_key, bytes = total_bytes_downloaded, "downloaded");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let list_prefix = self.folder_prefix.as_ref().map(|p| format!("{}/", p));
        let client = &self.client;
        let bucket = self.bucket.as_str();

        let keys = drain_pages(self.folder_prefix.as_deref(), |token| {
            let request = client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(list_prefix.clone())
                .set_continuation_token(token);
            async move {
                request
                    .send()
                    .await
                    .map_err(|e| AppError::storage("list", bucket, DisplayErrorContext(&e)))
            }
        })
        .await?;

        debug!(bucket = %self.bucket, count = keys.len(), "listed objects");
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| AppError::storage("delete", key, DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|service_err| service_err.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(AppError::storage("exists", key, DisplayErrorContext(&e)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_with_and_without_prefix() {
        assert_eq!(object_key(None, "2024-01-01T00:00_db.sqlite"), "2024-01-01T00:00_db.sqlite");
        assert_eq!(
            object_key(Some("shop"), "media/img/a.png"),
            "shop/media/img/a.png"
        );
    }

    fn page(keys: &[&str], truncated: bool, next_token: Option<&str>) -> ListObjectsV2Output {
        let mut builder = ListObjectsV2Output::builder()
            .is_truncated(truncated)
            .set_next_continuation_token(next_token.map(str::to_string));
        for key in keys {
            builder = builder.contents(s3::types::Object::builder().key(*key).build());
        }
        builder.build()
    }

    #[tokio::test]
    async fn test_list_follows_truncated_pages() -> anyhow::Result<()> {
        let mut pages = vec![
            page(&["shop/2024-01-01T00:00_db.sqlite", "shop/media/a.png"], true, Some("page-2")),
            page(&["shop/2024-01-15T00:00_db.sqlite"], false, None),
        ]
        .into_iter();
        let mut tokens = Vec::new();

        let keys = drain_pages(Some("shop"), |token| {
            tokens.push(token);
            let next = pages.next();
            async move { next.ok_or_else(|| AppError::NotFound("no page left".to_string())) }
        })
        .await?;

        assert_eq!(
            keys,
            vec![
                "2024-01-01T00:00_db.sqlite",
                "media/a.png",
                "2024-01-15T00:00_db.sqlite",
            ]
        );
        assert_eq!(tokens, vec![None, Some("page-2".to_string())]);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_stops_on_untruncated_page_with_token() -> anyhow::Result<()> {
        let last = page(&["a"], false, Some("stale"));
        let mut calls = 0;

        let keys = drain_pages(None, |_| {
            calls += 1;
            let next = last.clone();
            async move { Ok(next) }
        })
        .await?;

        assert_eq!(keys, vec!["a"]);
        assert_eq!(calls, 1);
        Ok(())
    }

    #[test]
    fn test_strip_folder_prefix() {
        assert_eq!(
            strip_folder_prefix(Some("shop"), "shop/2024-01-01T00:00_db.sqlite"),
            Some("2024-01-01T00:00_db.sqlite")
        );
        assert_eq!(strip_folder_prefix(Some("shop"), "shopfront/x"), None);
        assert_eq!(strip_folder_prefix(None, "anything"), Some("anything"));
    }
}
