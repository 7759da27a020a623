// dbbackup/src/config/mod.rs
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};

pub const DEFAULT_KEEP_DAYS: u32 = 31;

const ENV_DB_PASSWORD: &str = "BACKUP_DB_PASSWORD";
const ENV_S3_ACCESS_KEY_ID: &str = "BACKUP_S3_ACCESS_KEY_ID";
const ENV_S3_SECRET_ACCESS_KEY: &str = "BACKUP_S3_SECRET_ACCESS_KEY";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDatabaseConfig {
    pub engine: Option<String>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
    pub force_path_style: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub database: Option<JsonDatabaseConfig>,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub keep_days: Option<u32>,
    pub postgres_compressed: Option<bool>,
    pub dump_jobs: Option<u32>,
    pub media_root: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

/// A credential that must never reach logs or process listings.
#[derive(Clone, PartialEq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Framework-style engine string, e.g. `django.db.backends.postgresql`.
    pub engine: String,
    /// Database name, or the database file path for SQLite.
    pub name: String,
    pub user: Option<String>,
    pub password: Option<Secret>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: Secret,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
    /// `bucket` in the URL path instead of the host name (MinIO and other
    /// self-hosted endpoints).
    pub force_path_style: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub keep_days: u32,
    pub postgres_compressed: bool,
    /// Parallel worker hint for the compressed PostgreSQL format.
    pub dump_jobs: Option<u32>,
    pub media_root: Option<PathBuf>,
    /// Directory holding the bookmark and the SQLite safety copy.
    pub state_dir: PathBuf,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let mut raw = RawJsonConfig::from_json_file(config_path)?;
        raw.apply_env_overrides(|name| env::var(name).ok());
        AppConfig::from_raw(raw)
    }

    /// Validates a raw configuration. Fails before any resource is touched.
    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let state_dir = raw.state_dir();
        let db_raw = raw
            .database
            .ok_or_else(|| AppError::ConfigurationMissing("database".to_string()))?;
        let s3_raw = raw
            .s3_storage
            .ok_or_else(|| AppError::ConfigurationMissing("s3_storage".to_string()))?;

        let database = DatabaseConfig {
            engine: required(db_raw.engine, "database.engine")?,
            name: required(db_raw.name, "database.name")?,
            user: non_empty(db_raw.user),
            password: non_empty(db_raw.password).map(Secret::new),
            host: non_empty(db_raw.host),
            port: db_raw.port,
        };

        let storage = StorageConfig {
            bucket_name: required(s3_raw.bucket_name, "s3_storage.bucket_name")?,
            region: required(s3_raw.region, "s3_storage.region")?,
            access_key_id: required(s3_raw.access_key_id, "s3_storage.access_key_id")?,
            secret_access_key: Secret::new(required(
                s3_raw.secret_access_key,
                "s3_storage.secret_access_key",
            )?),
            endpoint_url: non_empty(s3_raw.endpoint_url),
            folder_prefix: non_empty(s3_raw.folder_prefix)
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            force_path_style: s3_raw.force_path_style.unwrap_or(false),
        };

        Ok(AppConfig {
            database,
            storage,
            keep_days: raw.keep_days.unwrap_or(DEFAULT_KEEP_DAYS),
            postgres_compressed: raw.postgres_compressed.unwrap_or(false),
            dump_jobs: raw.dump_jobs.filter(|jobs| *jobs > 0),
            media_root: raw.media_root.filter(|p| !p.as_os_str().is_empty()),
            state_dir,
        })
    }

    pub fn media_root(&self) -> Result<&Path> {
        self.media_root
            .as_deref()
            .ok_or_else(|| AppError::ConfigurationMissing("media_root".to_string()))
    }
}

impl RawJsonConfig {
    /// Parses the file without validating it.
    pub fn from_json_file(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)?;
        Ok(serde_json::from_str(&config_content)?)
    }

    /// Directory holding the bookmark, `.` unless configured.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Secrets from the environment (or `.env`) win over the JSON file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup(ENV_DB_PASSWORD) {
            self.database.get_or_insert_with(Default::default).password = Some(password);
        }
        if let Some(key_id) = lookup(ENV_S3_ACCESS_KEY_ID) {
            self.s3_storage.get_or_insert_with(Default::default).access_key_id = Some(key_id);
        }
        if let Some(secret) = lookup(ENV_S3_SECRET_ACCESS_KEY) {
            self.s3_storage.get_or_insert_with(Default::default).secret_access_key = Some(secret);
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    non_empty(value).ok_or_else(|| AppError::ConfigurationMissing(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_config() -> serde_json::Value {
        json!({
            "database": {
                "engine": "django.db.backends.postgresql",
                "name": "shop",
                "user": "shop_user",
                "password": "hunter2",
                "host": "db.internal",
                "port": 5433
            },
            "s3_storage": {
                "bucket_name": "backups",
                "region": "fr-par",
                "access_key_id": "AKIA",
                "secret_access_key": "shh",
                "endpoint_url": "https://s3.fr-par.scw.cloud",
                "folder_prefix": "/shop/"
            },
            "postgres_compressed": true,
            "dump_jobs": 4
        })
    }

    #[test]
    fn test_full_config_is_accepted() -> anyhow::Result<()> {
        let raw: RawJsonConfig = serde_json::from_value(full_config())?;
        let config = AppConfig::from_raw(raw)?;

        assert_eq!(config.database.name, "shop");
        assert_eq!(config.database.port, Some(5433));
        assert_eq!(config.database.password, Some(Secret::new("hunter2")));
        assert_eq!(config.storage.folder_prefix.as_deref(), Some("shop"));
        assert_eq!(config.keep_days, DEFAULT_KEEP_DAYS);
        assert!(config.postgres_compressed);
        assert_eq!(config.dump_jobs, Some(4));
        assert_eq!(config.state_dir, PathBuf::from("."));
        assert!(!config.storage.force_path_style);
        Ok(())
    }

    #[test]
    fn test_path_style_addressing_for_self_hosted_endpoints() -> anyhow::Result<()> {
        let mut value = full_config();
        value["s3_storage"]["endpoint_url"] = json!("http://minio:9000");
        value["s3_storage"]["force_path_style"] = json!(true);
        let config = AppConfig::from_raw(serde_json::from_value(value)?)?;

        assert!(config.storage.force_path_style);
        assert_eq!(config.storage.endpoint_url.as_deref(), Some("http://minio:9000"));
        Ok(())
    }

    #[test]
    fn test_state_dir_readable_without_full_config() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "state_dir": "/var/lib/shop" }"#)?;

        let raw = RawJsonConfig::from_json_file(&path)?;
        assert_eq!(raw.state_dir(), PathBuf::from("/var/lib/shop"));
        assert!(AppConfig::from_raw(raw).is_err());
        assert_eq!(RawJsonConfig::default().state_dir(), PathBuf::from("."));
        Ok(())
    }

    #[test]
    fn test_missing_bucket_is_reported_by_name() -> anyhow::Result<()> {
        let mut value = full_config();
        value["s3_storage"]["bucket_name"] = json!("");
        let raw: RawJsonConfig = serde_json::from_value(value)?;

        match AppConfig::from_raw(raw) {
            Err(AppError::ConfigurationMissing(name)) => assert_eq!(name, "s3_storage.bucket_name"),
            other => panic!("expected ConfigurationMissing, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_missing_database_section() {
        let raw = RawJsonConfig::default();
        assert!(matches!(
            AppConfig::from_raw(raw),
            Err(AppError::ConfigurationMissing(name)) if name == "database"
        ));
    }

    #[test]
    fn test_env_overrides_secrets() -> anyhow::Result<()> {
        let mut raw: RawJsonConfig = serde_json::from_value(full_config())?;
        raw.apply_env_overrides(|name| match name {
            "BACKUP_DB_PASSWORD" => Some("from-env".to_string()),
            "BACKUP_S3_SECRET_ACCESS_KEY" => Some("env-secret".to_string()),
            _ => None,
        });
        let config = AppConfig::from_raw(raw)?;

        assert_eq!(config.database.password, Some(Secret::new("from-env")));
        assert_eq!(config.storage.secret_access_key.expose(), "env-secret");
        assert_eq!(config.storage.access_key_id, "AKIA");
        Ok(())
    }

    #[test]
    fn test_secret_debug_is_redacted() -> anyhow::Result<()> {
        let raw: RawJsonConfig = serde_json::from_value(full_config())?;
        let config = AppConfig::from_raw(raw)?;
        let rendered = format!("{:?}", config);

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("shh"));
        Ok(())
    }

    #[test]
    fn test_media_root_required_when_asked_for() -> anyhow::Result<()> {
        let raw: RawJsonConfig = serde_json::from_value(full_config())?;
        let config = AppConfig::from_raw(raw)?;
        assert!(matches!(config.media_root(), Err(AppError::ConfigurationMissing(_))));
        Ok(())
    }
}
