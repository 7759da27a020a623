pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod logic;
pub(crate) mod media;

use chrono::NaiveDateTime;

use crate::config::AppConfig;
use crate::engine::DatabaseAdapter;
use crate::errors::Result;
use crate::storage::ObjectStore;
use crate::utils::bookmark::Bookmark;
pub use logic::BackupReport;
pub use media::SyncReport;

pub enum MediaBackup {
    Synced(SyncReport),
    Zipped(BackupReport),
}

/// Public entry point for the database backup workflow.
pub async fn run_backup_flow(
    app_config: &AppConfig,
    db: &dyn DatabaseAdapter,
    store: &dyn ObjectStore,
    now: NaiveDateTime,
) -> Result<BackupReport> {
    let bookmark = Bookmark::in_dir(&app_config.state_dir);
    logic::BackupWorkflow::new(db, store, &bookmark, app_config.keep_days)
        .run(now)
        .await
}

pub async fn run_media_backup(
    app_config: &AppConfig,
    store: &dyn ObjectStore,
    zipped: bool,
    now: NaiveDateTime,
) -> Result<MediaBackup> {
    let media_root = app_config.media_root()?;
    if zipped {
        logic::backup_zipped_media(store, media_root, app_config.keep_days, now)
            .await
            .map(MediaBackup::Zipped)
    } else {
        media::sync_media_folder(store, media_root).await.map(MediaBackup::Synced)
    }
}

/// Database backup then zipped media backup, both keyed with `now`.
/// The media step only runs once the database backup has succeeded.
pub async fn run_db_and_media_backup(
    app_config: &AppConfig,
    db: &dyn DatabaseAdapter,
    store: &dyn ObjectStore,
    now: NaiveDateTime,
) -> Result<(BackupReport, BackupReport)> {
    let media_root = app_config.media_root()?;
    let db_report = run_backup_flow(app_config, db, store, now).await?;
    let media_report = logic::backup_zipped_media(store, media_root, app_config.keep_days, now).await?;
    Ok((db_report, media_report))
}
