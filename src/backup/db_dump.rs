// dbbackup/src/backup/db_dump.rs
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::engine::PostgresTarget;
use crate::errors::{AppError, Result};
use crate::utils::find_executable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgDumpFormat {
    /// One SQL script with INSERT statements, portable across minor versions.
    PlainInserts,
    /// pg_restore-compatible compressed archive.
    Custom,
}

impl PgDumpFormat {
    fn engine_name(self) -> &'static str {
        match self {
            PgDumpFormat::PlainInserts => "postgres-plain",
            PgDumpFormat::Custom => "postgres-compressed",
        }
    }
}

/// Online-consistent copy of a live SQLite file.
///
/// `VACUUM INTO` reads from a single snapshot and never takes the write lock,
/// so the running application keeps writing while the copy is made.
pub async fn dump_sqlite(db_path: &Path, dump_path: &Path) -> Result<()> {
    let dump_failed = |reason: String| AppError::DumpFailed {
        engine: "sqlite",
        reason,
    };

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(false);
    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .map_err(|e| dump_failed(format!("cannot open {}: {}", db_path.display(), e)))?;

    let dest = dump_path
        .to_str()
        .ok_or_else(|| dump_failed(format!("non UTF-8 dump path {}", dump_path.display())))?;
    let vacuum_sql = format!("VACUUM INTO '{}'", dest.replace('\'', "''"));

    sqlx::query(&vacuum_sql)
        .execute(&mut conn)
        .await
        .map_err(|e| dump_failed(format!("VACUUM INTO failed: {}", e)))?;
    conn.close()
        .await
        .map_err(|e| dump_failed(format!("closing {}: {}", db_path.display(), e)))?;

    info!(source = %db_path.display(), dump = %dump_path.display(), "sqlite snapshot written");
    Ok(())
}

pub fn pg_dump_command(
    pg_dump_path: &Path,
    target: &PostgresTarget,
    format: PgDumpFormat,
    dump_path: &Path,
) -> Command {
    let mut cmd = Command::new(pg_dump_path);
    match format {
        PgDumpFormat::PlainInserts => {
            cmd.arg("--format=plain").arg("--inserts");
        }
        PgDumpFormat::Custom => {
            cmd.arg("--format=custom");
        }
    }
    target.apply_connection_args(&mut cmd);
    cmd.arg("--file").arg(dump_path).arg(&target.name);
    cmd
}

/// Dumps the configured PostgreSQL database with pg_dump.
pub fn dump_postgres(target: &PostgresTarget, format: PgDumpFormat, dump_path: &Path) -> Result<()> {
    let engine = format.engine_name();
    let pg_dump_path: PathBuf =
        find_executable("pg_dump").map_err(|reason| AppError::DumpFailed { engine, reason })?;
    debug!(pg_dump = %pg_dump_path.display(), database = %target.name, "running pg_dump");

    let output = pg_dump_command(&pg_dump_path, target, format, dump_path)
        .output()
        .map_err(|e| AppError::DumpFailed {
            engine,
            reason: format!("failed to execute pg_dump: {}", e),
        })?;

    if !output.status.success() {
        return Err(AppError::DumpFailed {
            engine,
            reason: format!(
                "pg_dump for database {} failed with status: {}\nStderr: {}",
                target.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    info!(database = %target.name, dump = %dump_path.display(), "pg_dump completed");
    Ok(())
}
