//! Database engines the tool can dump and restore.
//!
//! The engine is picked once from the configuration; everything downstream
//! talks to it through [`DatabaseAdapter`].

pub mod credentials;
#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

use crate::backup::db_dump;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::restore::{db_restore, verification};
use crate::utils::naming::ArtifactKind;
use credentials::PgCredentials;

/// Safety copy of the live SQLite file taken right before a restore.
pub const SAFETY_COPY_FILE_NAME: &str = "db_before_recovery";

#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn engine_name(&self) -> &'static str;

    /// Suffix family of the artifacts this engine produces.
    fn kind(&self) -> ArtifactKind;

    /// Write a fresh dump into `work_dir` and return its path.
    async fn dump(&self, work_dir: &Path) -> Result<PathBuf>;

    /// Load a fully downloaded dump into the live database.
    async fn restore(&self, dump_path: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteTarget {
    pub db_path: PathBuf,
    pub safety_copy_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PostgresTarget {
    pub name: String,
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub credentials: PgCredentials,
}

impl PostgresTarget {
    /// Connection flags shared by pg_dump, psql and pg_restore. The database
    /// name is passed separately because each tool wants it differently.
    pub fn apply_connection_args(&self, cmd: &mut Command) {
        if let Some(host) = &self.host {
            cmd.arg("--host").arg(host);
        }
        if let Some(port) = self.port {
            cmd.arg("--port").arg(port.to_string());
        }
        if let Some(user) = &self.user {
            cmd.arg("--username").arg(user);
        }
        self.credentials.supply(cmd);
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new().database(&self.name);
        if let Some(host) = &self.host {
            options = options.host(host);
        }
        if let Some(port) = self.port {
            options = options.port(port);
        }
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = self.credentials.password() {
            options = options.password(password.expose());
        }
        options
    }
}

#[derive(Debug, Clone)]
pub enum DbEngine {
    Sqlite(SqliteTarget),
    /// Plain SQL script made of INSERT statements.
    PostgresPlain(PostgresTarget),
    /// Custom-format archive; `jobs` is the parallel worker hint.
    PostgresCompressed { target: PostgresTarget, jobs: Option<u32> },
}

impl DbEngine {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let db = &config.database;
        let engine = db.engine.to_lowercase();

        if engine.contains("sqlite") || engine.contains("spatialite") {
            return Ok(DbEngine::Sqlite(SqliteTarget {
                db_path: PathBuf::from(&db.name),
                safety_copy_path: config.state_dir.join(SAFETY_COPY_FILE_NAME),
            }));
        }

        if engine.contains("postgres") || engine.contains("postgis") {
            let target = PostgresTarget {
                name: db.name.clone(),
                user: db.user.clone(),
                host: db.host.clone(),
                port: db.port,
                credentials: PgCredentials::new(db.password.clone()),
            };
            return Ok(if config.postgres_compressed {
                DbEngine::PostgresCompressed {
                    target,
                    jobs: config.dump_jobs,
                }
            } else {
                DbEngine::PostgresPlain(target)
            });
        }

        Err(AppError::UnsupportedEngine(db.engine.clone()))
    }
}

#[async_trait]
impl DatabaseAdapter for DbEngine {
    fn engine_name(&self) -> &'static str {
        match self {
            DbEngine::Sqlite(_) => "sqlite",
            DbEngine::PostgresPlain(_) => "postgres-plain",
            DbEngine::PostgresCompressed { .. } => "postgres-compressed",
        }
    }

    fn kind(&self) -> ArtifactKind {
        match self {
            DbEngine::Sqlite(_) => ArtifactKind::SqliteDb,
            DbEngine::PostgresPlain(_) => ArtifactKind::PostgresDump,
            DbEngine::PostgresCompressed { .. } => ArtifactKind::PostgresBackup,
        }
    }

    async fn dump(&self, work_dir: &Path) -> Result<PathBuf> {
        let dump_path = work_dir.join(format!("dump{}", self.kind().suffix()));
        info!(engine = self.engine_name(), path = %dump_path.display(), "dumping database");

        match self {
            DbEngine::Sqlite(target) => db_dump::dump_sqlite(&target.db_path, &dump_path).await?,
            DbEngine::PostgresPlain(target) => {
                db_dump::dump_postgres(target, db_dump::PgDumpFormat::PlainInserts, &dump_path)?
            }
            DbEngine::PostgresCompressed { target, .. } => {
                db_dump::dump_postgres(target, db_dump::PgDumpFormat::Custom, &dump_path)?
            }
        }
        Ok(dump_path)
    }

    async fn restore(&self, dump_path: &Path) -> Result<()> {
        info!(engine = self.engine_name(), path = %dump_path.display(), "restoring database");

        match self {
            DbEngine::Sqlite(target) => {
                verification::verify_sqlite_artifact(dump_path).await?;
                db_restore::restore_sqlite(&target.db_path, &target.safety_copy_path, dump_path).await
            }
            DbEngine::PostgresPlain(target) => db_restore::restore_postgres_plain(target, dump_path).await,
            DbEngine::PostgresCompressed { target, jobs } => {
                db_restore::restore_postgres_compressed(target, *jobs, dump_path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawJsonConfig;
    use serde_json::json;

    fn config_for(engine: &str, compressed: bool) -> AppConfig {
        let raw: RawJsonConfig = serde_json::from_value(json!({
            "database": { "engine": engine, "name": "app", "user": "app_user" },
            "s3_storage": {
                "bucket_name": "b", "region": "r",
                "access_key_id": "k", "secret_access_key": "s"
            },
            "postgres_compressed": compressed,
            "dump_jobs": 3,
            "state_dir": "/var/lib/app"
        }))
        .unwrap();
        AppConfig::from_raw(raw).unwrap()
    }

    #[test]
    fn test_sqlite_family_engines() {
        for engine in ["django.db.backends.sqlite3", "django.contrib.gis.db.backends.spatialite"] {
            let db = DbEngine::from_config(&config_for(engine, false)).unwrap();
            assert_eq!(db.kind(), ArtifactKind::SqliteDb);
            match db {
                DbEngine::Sqlite(target) => {
                    assert_eq!(target.db_path, PathBuf::from("app"));
                    assert_eq!(
                        target.safety_copy_path,
                        PathBuf::from("/var/lib/app/db_before_recovery")
                    );
                }
                other => panic!("unexpected engine {:?}", other),
            }
        }
    }

    #[test]
    fn test_postgres_family_engines() {
        let plain = DbEngine::from_config(&config_for("django.db.backends.postgresql", false)).unwrap();
        assert_eq!(plain.kind(), ArtifactKind::PostgresDump);
        assert_eq!(plain.engine_name(), "postgres-plain");

        let compressed =
            DbEngine::from_config(&config_for("django.contrib.gis.db.backends.postgis", true)).unwrap();
        assert_eq!(compressed.kind(), ArtifactKind::PostgresBackup);
        assert!(matches!(compressed, DbEngine::PostgresCompressed { jobs: Some(3), .. }));
    }

    #[test]
    fn test_unsupported_engine() {
        let err = DbEngine::from_config(&config_for("django.db.backends.mysql", false)).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedEngine(name) if name == "django.db.backends.mysql"));
    }

    #[test]
    fn test_connection_args_never_carry_password() {
        let target = PostgresTarget {
            name: "app".into(),
            user: Some("app_user".into()),
            host: Some("db".into()),
            port: Some(5433),
            credentials: PgCredentials::new(Some(crate::config::Secret::new("pw"))),
        };
        let mut cmd = Command::new("psql");
        target.apply_connection_args(&mut cmd);

        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["--host", "db", "--port", "5433", "--username", "app_user", "--no-password"]
        );
    }
}
