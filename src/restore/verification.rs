// dbbackup/src/restore/verification.rs
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use std::path::Path;
use tracing::debug;

use crate::errors::{AppError, Result};

/// Checks that a downloaded SQLite artifact is a sound database before it
/// replaces the live file. The artifact is opened read-only.
pub async fn verify_sqlite_artifact(artifact: &Path) -> Result<()> {
    let restore_failed = |reason: String| AppError::RestoreFailed {
        engine: "sqlite",
        reason,
    };

    let options = SqliteConnectOptions::new()
        .filename(artifact)
        .read_only(true)
        .create_if_missing(false);
    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .map_err(|e| restore_failed(format!("cannot open downloaded artifact: {}", e)))?;

    let verdict: String = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| restore_failed(format!("integrity check could not run: {}", e)))?;
    conn.close().await.ok();

    if verdict != "ok" {
        return Err(restore_failed(format!(
            "downloaded artifact failed integrity check: {}",
            verdict
        )));
    }

    debug!(artifact = %artifact.display(), "artifact passed quick_check");
    Ok(())
}
