// dbbackup/src/restore/db_restore.rs
use regex::Regex;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, PgConnection, SqliteConnection};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::backup::db_dump;
use crate::engine::PostgresTarget;
use crate::errors::{AppError, Result};
use crate::utils::find_executable;

/// `<db>-wal` and `<db>-shm`, the sidecar files of a WAL-mode database.
fn sqlite_sidecars(db: &Path) -> [PathBuf; 2] {
    ["-wal", "-shm"].map(|suffix| {
        let mut name = db.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    })
}

/// Merges the write-ahead log into the main file and truncates it, so the
/// connections the application keeps open hold no pending frames.
async fn checkpoint_live_db(live_db: &Path) -> Result<()> {
    let options = SqliteConnectOptions::new()
        .filename(live_db)
        .create_if_missing(false);
    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .map_err(|e| sqlite_restore_failed(format!("cannot open {}: {}", live_db.display(), e)))?;

    let (busy, log_frames, checkpointed): (i64, i64, i64) = sqlx::query_as("PRAGMA wal_checkpoint(TRUNCATE)")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| sqlite_restore_failed(format!("checkpointing {}: {}", live_db.display(), e)))?;
    conn.close()
        .await
        .map_err(|e| sqlite_restore_failed(format!("closing {}: {}", live_db.display(), e)))?;

    if busy != 0 {
        warn!(db = %live_db.display(), log_frames, checkpointed, "live database busy, checkpoint incomplete");
    }
    Ok(())
}

fn sqlite_restore_failed(reason: String) -> AppError {
    AppError::RestoreFailed {
        engine: "sqlite",
        reason,
    }
}

/// Replaces the live SQLite file with a downloaded artifact.
///
/// The live database is checkpointed, then snapshotted into `safety_copy`
/// with `VACUUM INTO`, replacing the copy left by any earlier restore. The
/// safety copy is never removed here. Stale `-wal`/`-shm` files are deleted
/// after the swap so SQLite cannot replay the old frames over the artifact.
pub async fn restore_sqlite(live_db: &Path, safety_copy: &Path, artifact: &Path) -> Result<()> {
    let io_failed = |step: &str, e: std::io::Error| sqlite_restore_failed(format!("{}: {}", step, e));

    if live_db.exists() {
        checkpoint_live_db(live_db).await?;

        if let Some(parent) = safety_copy.parent() {
            fs::create_dir_all(parent).map_err(|e| io_failed("creating safety copy directory", e))?;
        }
        match fs::remove_file(safety_copy) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_failed("removing previous safety copy", e)),
        }
        db_dump::dump_sqlite(live_db, safety_copy)
            .await
            .map_err(|e| sqlite_restore_failed(format!("saving safety copy: {}", e)))?;
        info!(safety_copy = %safety_copy.display(), "live database saved before recovery");
    } else {
        warn!(db = %live_db.display(), "no live database to save, restoring onto an empty path");
    }

    fs::copy(artifact, live_db).map_err(|e| io_failed("replacing live database", e))?;
    for sidecar in sqlite_sidecars(live_db) {
        match fs::remove_file(&sidecar) {
            Ok(()) => debug!(file = %sidecar.display(), "stale sidecar removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_failed("removing stale sidecar", e)),
        }
    }
    fs::remove_file(artifact).map_err(|e| io_failed("discarding downloaded copy", e))?;

    info!(db = %live_db.display(), "sqlite database restored");
    Ok(())
}

fn owner_clause() -> &'static Regex {
    static OWNER_TO: OnceLock<Regex> = OnceLock::new();
    OWNER_TO.get_or_init(|| {
        Regex::new(r#"OWNER TO ("[^"]+"|[^\s;]+)(\s*);"#).expect("owner clause pattern is valid")
    })
}

/// Points every `OWNER TO <role> ;` clause at the configured user, so a dump
/// taken on another server loads without the original role existing here.
pub fn rewrite_owner(sql: &str, user: &str) -> String {
    owner_clause()
        .replace_all(sql, |caps: &regex::Captures| format!("OWNER TO {}{};", user, &caps[2]))
        .into_owned()
}

/// Drops every table of the public schema so the plain script loads onto a
/// clean slate. Returns the number of tables dropped.
pub async fn drop_public_tables(target: &PostgresTarget) -> Result<usize> {
    let restore_failed = |reason: String| AppError::RestoreFailed {
        engine: "postgres-plain",
        reason,
    };

    let mut conn = PgConnection::connect_with(&target.connect_options())
        .await
        .map_err(|e| restore_failed(format!("cannot connect to database {}: {}", target.name, e)))?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = 'public'",
    )
    .fetch_all(&mut conn)
    .await
    .map_err(|e| restore_failed(format!("listing public tables: {}", e)))?;

    for table in &tables {
        let drop_sql = format!(
            r#"DROP TABLE IF EXISTS public."{}" CASCADE"#,
            table.replace('"', "\"\"")
        );
        sqlx::query(&drop_sql)
            .execute(&mut conn)
            .await
            .map_err(|e| restore_failed(format!("dropping table {}: {}", table, e)))?;
    }
    conn.close()
        .await
        .map_err(|e| restore_failed(format!("closing connection: {}", e)))?;

    info!(database = %target.name, dropped = tables.len(), "public schema cleared");
    Ok(tables.len())
}

pub fn psql_command(psql_path: &Path, target: &PostgresTarget, sql_file: &Path) -> Command {
    let mut cmd = Command::new(psql_path);
    cmd.arg("-X") // Do not read psqlrc
        .arg("-q")
        .arg("-v")
        .arg("ON_ERROR_STOP=1");
    target.apply_connection_args(&mut cmd);
    cmd.arg("--dbname").arg(&target.name).arg("--file").arg(sql_file);
    cmd
}

pub fn pg_restore_command(
    pg_restore_path: &Path,
    target: &PostgresTarget,
    jobs: Option<u32>,
    archive: &Path,
) -> Command {
    let mut cmd = Command::new(pg_restore_path);
    cmd.arg("--clean").arg("--if-exists").arg("--no-owner");
    if let Some(jobs) = jobs {
        cmd.arg("--jobs").arg(jobs.to_string());
    }
    target.apply_connection_args(&mut cmd);
    cmd.arg("--dbname").arg(&target.name).arg(archive);
    cmd
}

fn check_tool_output(engine: &'static str, tool: &str, output: Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(AppError::RestoreFailed {
        engine,
        reason: format!(
            "{} failed with status: {}\nStderr: {}",
            tool,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    })
}

/// Rewrites the downloaded script in place with [`rewrite_owner`].
pub fn reassign_script_owner(sql_file: &Path, user: &str) -> Result<()> {
    let io_failed = |step: &str, e: std::io::Error| AppError::RestoreFailed {
        engine: "postgres-plain",
        reason: format!("{} {}: {}", step, sql_file.display(), e),
    };
    let sql = fs::read_to_string(sql_file).map_err(|e| io_failed("reading", e))?;
    fs::write(sql_file, rewrite_owner(&sql, user)).map_err(|e| io_failed("rewriting", e))?;
    Ok(())
}

/// Rewrites ownership, clears the public schema, then replays the script.
/// A failure part-way leaves the database as the failed step left it.
pub async fn restore_postgres_plain(target: &PostgresTarget, sql_file: &Path) -> Result<()> {
    const ENGINE: &str = "postgres-plain";
    let psql_path = find_executable("psql").map_err(|reason| AppError::RestoreFailed {
        engine: ENGINE,
        reason,
    })?;

    if let Some(user) = &target.user {
        reassign_script_owner(sql_file, user)?;
    }

    drop_public_tables(target).await?;

    let output = psql_command(&psql_path, target, sql_file)
        .output()
        .map_err(|e| AppError::RestoreFailed {
            engine: ENGINE,
            reason: format!("failed to execute psql: {}", e),
        })?;
    check_tool_output(ENGINE, "psql", output)?;

    info!(database = %target.name, "plain dump applied");
    Ok(())
}

pub fn restore_postgres_compressed(target: &PostgresTarget, jobs: Option<u32>, archive: &Path) -> Result<()> {
    const ENGINE: &str = "postgres-compressed";
    let pg_restore_path = find_executable("pg_restore").map_err(|reason| AppError::RestoreFailed {
        engine: ENGINE,
        reason,
    })?;

    let output = pg_restore_command(&pg_restore_path, target, jobs, archive)
        .output()
        .map_err(|e| AppError::RestoreFailed {
            engine: ENGINE,
            reason: format!("failed to execute pg_restore: {}", e),
        })?;
    check_tool_output(ENGINE, "pg_restore", output)?;

    info!(database = %target.name, "custom-format archive restored");
    Ok(())
}
