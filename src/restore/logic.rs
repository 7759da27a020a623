// dbbackup/src/restore/logic.rs
use std::path::Path;
use tracing::{info, warn};

use crate::backup::archive::extract_zip_archive;
use crate::backup::logic::work_dir;
use crate::engine::DatabaseAdapter;
use crate::errors::{AppError, Result};
use crate::storage::ObjectStore;
use crate::utils::naming::{format_key, parse_key, parse_timestamp, ArtifactKind};
use crate::utils::retention::{list_artifacts, select_latest};

pub const LATEST: &str = "latest";

/// Which artifact a recovery should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreTarget {
    Latest,
    Key(String),
}

impl RestoreTarget {
    /// `None` and `"latest"` both mean the most recent artifact.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None | Some(LATEST) => RestoreTarget::Latest,
            Some(key) => RestoreTarget::Key(key.to_string()),
        }
    }
}

pub async fn resolve_target(store: &dyn ObjectStore, kind: ArtifactKind, target: &RestoreTarget) -> Result<String> {
    match target {
        RestoreTarget::Key(key) => {
            if parse_key(key, kind).is_err() {
                warn!(key = %key, expected = %kind, "explicit key does not look like an artifact of this kind");
            }
            if !store.exists(key).await? {
                return Err(AppError::NotFound(format!("'{}' is not in storage", key)));
            }
            Ok(key.clone())
        }
        RestoreTarget::Latest => {
            let artifacts = list_artifacts(store, kind).await?;
            let latest = select_latest(&artifacts)?;
            info!(key = %latest.key, "latest artifact selected");
            Ok(latest.key.clone())
        }
    }
}

/// Resolve, download, then hand the file to the engine.
///
/// A failed engine restore leaves the database as the tool left it. Nothing
/// is rolled back here.
pub async fn recover_database(
    db: &dyn DatabaseAdapter,
    store: &dyn ObjectStore,
    target: &RestoreTarget,
) -> Result<String> {
    let key = resolve_target(store, db.kind(), target).await?;

    let work_dir = work_dir()?;
    let local_path = work_dir.path().join(format!("download{}", db.kind().suffix()));
    store.download(&key, &local_path).await?;
    info!(key = %key, path = %local_path.display(), "artifact downloaded");

    db.restore(&local_path).await?;
    info!(key = %key, engine = db.engine_name(), "database recovered");
    Ok(key)
}

pub async fn recover_zipped_media(
    store: &dyn ObjectStore,
    media_root: &Path,
    target: &RestoreTarget,
) -> Result<String> {
    let key = resolve_target(store, ArtifactKind::MediaZip, target).await?;

    let work_dir = work_dir()?;
    let local_path = work_dir.path().join("media.zip");
    store.download(&key, &local_path).await?;
    extract_zip_archive(&local_path, media_root)?;

    info!(key = %key, media_root = %media_root.display(), "media recovered");
    Ok(key)
}

/// Recovers the database artifact and the media zip sharing one timestamp.
///
/// `timestamp` is `YYYY-MM-DDTHH:MM`; `None` or `"latest"` picks the newest
/// database artifact. Both keys are checked before anything is restored.
pub async fn recover_db_and_media(
    db: &dyn DatabaseAdapter,
    store: &dyn ObjectStore,
    media_root: &Path,
    timestamp: Option<&str>,
) -> Result<(String, String)> {
    let kind = db.kind();
    let db_key = match timestamp {
        None | Some(LATEST) => resolve_target(store, kind, &RestoreTarget::Latest).await?,
        Some(stamp) => {
            let at = parse_timestamp(stamp)
                .ok_or_else(|| AppError::NotFound(format!("'{}' is not a backup timestamp", stamp)))?;
            resolve_target(store, kind, &RestoreTarget::Key(format_key(at, kind))).await?
        }
    };
    let at = parse_key(&db_key, kind).map_err(|e| AppError::NotFound(e.to_string()))?;
    let media_key = resolve_target(
        store,
        ArtifactKind::MediaZip,
        &RestoreTarget::Key(format_key(at, ArtifactKind::MediaZip)),
    )
    .await?;

    let db_key = recover_database(db, store, &RestoreTarget::Key(db_key)).await?;
    let media_key = recover_zipped_media(store, media_root, &RestoreTarget::Key(media_key)).await?;
    Ok((db_key, media_key))
}
