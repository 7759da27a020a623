// dbbackup/src/backup/logic.rs
use chrono::NaiveDateTime;
use std::path::Path;
use tracing::{debug, error, info};

use crate::backup::archive::create_zip_archive;
use crate::engine::DatabaseAdapter;
use crate::errors::{AppError, Result};
use crate::storage::ObjectStore;
use crate::utils::bookmark::Bookmark;
use crate::utils::naming::{format_key, ArtifactKind};
use crate::utils::retention::{list_artifacts, prune, PruneReport};

const WORK_DIR_PREFIX: &str = "dbbackup_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    Idle,
    Dumping,
    Uploading,
    Pruning,
    BookmarkUpdated,
    Failed,
}

/// What a completed backup produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupReport {
    pub key: String,
    pub prune: PruneReport,
}

pub(crate) fn work_dir() -> Result<tempfile::TempDir> {
    Ok(tempfile::Builder::new().prefix(WORK_DIR_PREFIX).tempdir()?)
}

/// Uploads one artifact. Any storage error is reported as `UploadFailed`
/// for that key.
pub async fn upload_artifact(store: &dyn ObjectStore, local_path: &Path, key: &str) -> Result<()> {
    store.upload(local_path, key).await.map_err(|e| match e {
        e @ AppError::UploadFailed { .. } => e,
        other => AppError::UploadFailed {
            key: key.to_string(),
            reason: other.to_string(),
        },
    })?;
    info!(key = %key, "artifact uploaded");
    Ok(())
}

/// Lists the artifacts of `kind` and removes the stale ones.
///
/// A failed listing is an error. Failed deletions are logged per key by
/// [`prune`] and otherwise only show up in the report.
pub async fn prune_kind(
    store: &dyn ObjectStore,
    kind: ArtifactKind,
    keep_days: u32,
    now: NaiveDateTime,
) -> Result<PruneReport> {
    let artifacts = list_artifacts(store, kind).await?;
    Ok(prune(store, &artifacts, keep_days, now).await)
}

/// Dump, upload, prune, then move the bookmark.
///
/// A failing stage skips every later one, so the bookmark only moves once
/// the new artifact is in the bucket. Prune failures do not stop it.
pub struct BackupWorkflow<'a> {
    db: &'a dyn DatabaseAdapter,
    store: &'a dyn ObjectStore,
    bookmark: &'a Bookmark,
    keep_days: u32,
    stage: BackupStage,
}

impl<'a> BackupWorkflow<'a> {
    pub fn new(
        db: &'a dyn DatabaseAdapter,
        store: &'a dyn ObjectStore,
        bookmark: &'a Bookmark,
        keep_days: u32,
    ) -> Self {
        Self {
            db,
            store,
            bookmark,
            keep_days,
            stage: BackupStage::Idle,
        }
    }

    pub fn stage(&self) -> BackupStage {
        self.stage
    }

    fn enter(&mut self, next: BackupStage) {
        debug!(from = ?self.stage, to = ?next, "backup stage");
        self.stage = next;
    }

    pub async fn run(&mut self, now: NaiveDateTime) -> Result<BackupReport> {
        match self.run_stages(now).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(stage = ?self.stage, engine = self.db.engine_name(), error = %e, "backup failed");
                self.enter(BackupStage::Failed);
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self, now: NaiveDateTime) -> Result<BackupReport> {
        let work_dir = work_dir()?;

        self.enter(BackupStage::Dumping);
        let dump_path = self.db.dump(work_dir.path()).await?;

        self.enter(BackupStage::Uploading);
        let key = format_key(now, self.db.kind());
        upload_artifact(self.store, &dump_path, &key).await?;

        self.enter(BackupStage::Pruning);
        let prune = prune_kind(self.store, self.db.kind(), self.keep_days, now).await?;

        self.bookmark.write(now)?;
        self.enter(BackupStage::BookmarkUpdated);

        info!(
            key = %key,
            engine = self.db.engine_name(),
            pruned = prune.deleted.len(),
            "database backup complete"
        );
        Ok(BackupReport { key, prune })
    }
}

/// Zips the whole media folder into one `<ts>_media.zip` artifact, uploads it
/// and prunes older media zips with the same retention.
pub async fn backup_zipped_media(
    store: &dyn ObjectStore,
    media_root: &Path,
    keep_days: u32,
    now: NaiveDateTime,
) -> Result<BackupReport> {
    let work_dir = work_dir()?;
    let key = format_key(now, ArtifactKind::MediaZip);
    let archive_path = work_dir.path().join("media.zip");

    create_zip_archive(media_root, &archive_path)?;
    upload_artifact(store, &archive_path, &key).await?;
    let prune = prune_kind(store, ArtifactKind::MediaZip, keep_days, now).await?;

    info!(key = %key, pruned = prune.deleted.len(), "media backup complete");
    Ok(BackupReport { key, prune })
}
