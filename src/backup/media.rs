//! File-by-file media synchronisation with the bucket.
//!
//! Each file below the media root is stored under `media/<relative path>`.
//! Files whose key already exists are skipped, so re-runs only transfer new
//! files. A file changed locally after its first upload keeps the stale copy.

use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::errors::{AppError, Result};
use crate::storage::ObjectStore;

pub const MEDIA_PREFIX: &str = "media/";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub skipped: usize,
}

pub fn media_key(media_root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(media_root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(format!("{}{}", MEDIA_PREFIX, parts.join("/")))
}

/// Local destination for a media key, or `None` when the key would escape
/// the media root.
fn local_media_path(media_root: &Path, key: &str) -> Option<PathBuf> {
    let relative = Path::new(key.strip_prefix(MEDIA_PREFIX)?);
    if relative.as_os_str().is_empty()
        || !relative.components().all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(media_root.join(relative))
}

pub async fn sync_media_folder(store: &dyn ObjectStore, media_root: &Path) -> Result<SyncReport> {
    if !media_root.is_dir() {
        return Err(AppError::NotFound(format!(
            "media root {} is not a directory",
            media_root.display()
        )));
    }

    let mut report = SyncReport::default();
    for entry in WalkDir::new(media_root).sort_by_file_name() {
        let entry = entry.map_err(|e| AppError::Archive(format!("Failed to walk {}: {}", media_root.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = media_key(media_root, entry.path()) else {
            continue;
        };
        if store.upload_if_missing(entry.path(), &key).await? {
            report.uploaded.push(key);
        } else {
            report.skipped += 1;
        }
    }

    info!(
        uploaded = report.uploaded.len(),
        skipped = report.skipped,
        "media folder synced"
    );
    Ok(report)
}

pub async fn list_media_keys(store: &dyn ObjectStore) -> Result<Vec<String>> {
    let mut keys: Vec<String> = store
        .list()
        .await?
        .into_iter()
        .filter(|key| key.starts_with(MEDIA_PREFIX))
        .collect();
    keys.sort();
    Ok(keys)
}

/// Downloads every synced media file back below `media_root`.
pub async fn download_media_folder(store: &dyn ObjectStore, media_root: &Path) -> Result<usize> {
    let mut restored = 0;
    for key in list_media_keys(store).await? {
        match local_media_path(media_root, &key) {
            Some(path) => {
                store.download(&key, &path).await?;
                restored += 1;
            }
            None => warn!(key = %key, "skipping media key outside the media root"),
        }
    }
    info!(restored, media_root = %media_root.display(), "media folder restored");
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_media_key_layout() {
        let root = Path::new("/srv/media");
        assert_eq!(
            media_key(root, &root.join("avatars").join("a.png")),
            Some("media/avatars/a.png".to_string())
        );
        assert_eq!(media_key(root, root), None);
    }

    #[test]
    fn test_local_media_path_refuses_traversal() {
        let root = Path::new("/srv/media");
        assert_eq!(
            local_media_path(root, "media/avatars/a.png"),
            Some(PathBuf::from("/srv/media/avatars/a.png"))
        );
        assert_eq!(local_media_path(root, "media/../etc/passwd"), None);
        assert_eq!(local_media_path(root, "media/"), None);
        assert_eq!(local_media_path(root, "2024-01-01T00:00_db.sqlite"), None);
    }

    #[tokio::test]
    async fn test_second_sync_uploads_nothing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let media = dir.path().join("media");
        fs::create_dir_all(media.join("docs"))?;
        fs::write(media.join("a.txt"), b"a")?;
        fs::write(media.join("docs/b.pdf"), b"b")?;
        let store = MemoryStore::new();

        let first = sync_media_folder(&store, &media).await?;
        assert_eq!(first.uploaded, vec!["media/a.txt", "media/docs/b.pdf"]);
        assert_eq!(store.upload_count(), 2);

        let second = sync_media_folder(&store, &media).await?;
        assert!(second.uploaded.is_empty());
        assert_eq!(second.skipped, 2);
        assert_eq!(store.upload_count(), 2);

        fs::write(media.join("c.txt"), b"c")?;
        let third = sync_media_folder(&store, &media).await?;
        assert_eq!(third.uploaded, vec!["media/c.txt"]);
        assert_eq!(store.upload_count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_download_media_folder() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = MemoryStore::new();
        store.put("media/docs/b.pdf", b"pdf");
        store.put("media/a.txt", b"txt");
        store.put("2024-01-01T00:00_db.sqlite", b"db");

        let target = dir.path().join("restored");
        assert_eq!(download_media_folder(&store, &target).await?, 2);
        assert_eq!(fs::read(target.join("docs/b.pdf"))?, b"pdf");
        assert_eq!(fs::read(target.join("a.txt"))?, b"txt");
        assert!(!target.join("2024-01-01T00:00_db.sqlite").exists());
        Ok(())
    }
}
