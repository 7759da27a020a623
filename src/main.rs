//! Database and media backup tool
//!
//! Dumps the configured database to an S3 bucket under timestamped keys,
//! prunes old artifacts and restores them on demand.

// dbbackup/src/main.rs
mod backup;
mod config;
mod engine;
mod errors;
mod restore;
mod storage;
mod utils;

use anyhow::{Context, Result};
use chrono::Local;
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use backup::MediaBackup;
use config::{AppConfig, RawJsonConfig};
use engine::{DatabaseAdapter, DbEngine};
use restore::RestoreTarget;
use storage::s3::S3Store;
use utils::bookmark::Bookmark;
use utils::naming::{format_timestamp, ArtifactKind};
use utils::retention::{list_artifacts, PruneReport};

const COMMAND_HELP: &str = "
usage:
     `dbbackup backup`
         to back up the current database
  or `dbbackup list`
         to list already backed up files
  or `dbbackup recover YYYY-MM-DDTHH:MM_db.sqlite`
         to recover from a specific file
  or `dbbackup recover [latest]`
         to recover from the most recent file

other actions: backup_media, backup_db_and_media, list_media, recover_media,
recover_db_and_media [YYYY-MM-DDTHH:MM|latest], last_backup
use --zipped with the *_media actions to work with one zip per backup
";

#[derive(Parser, Debug)]
#[command(name = "dbbackup")]
#[command(about = "Back up a database and its media to S3, prune old backups, recover them")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, env = "BACKUP_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Store media as one zip archive per backup instead of file by file
    #[arg(long)]
    zipped: bool,

    action: Option<Action>,

    /// Artifact key, `latest`, or a `YYYY-MM-DDTHH:MM` timestamp
    target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    #[value(name = "backup", alias = "backup_db")]
    Backup,
    #[value(name = "backup_media")]
    BackupMedia,
    #[value(name = "backup_db_and_media")]
    BackupDbAndMedia,
    #[value(name = "list")]
    List,
    #[value(name = "list_media")]
    ListMedia,
    #[value(name = "recover")]
    Recover,
    #[value(name = "recover_media")]
    RecoverMedia,
    #[value(name = "recover_db_and_media")]
    RecoverDbAndMedia,
    #[value(name = "last_backup")]
    LastBackup,
}

impl Action {
    /// Actions that dump, list or restore the configured database.
    fn needs_database(self) -> bool {
        matches!(
            self,
            Action::Backup | Action::BackupDbAndMedia | Action::List | Action::Recover | Action::RecoverDbAndMedia
        )
    }

    fn needs_storage(self) -> bool {
        self != Action::LastBackup
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_args(None, std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            eprintln!("{}", e);
            return usage_error();
        }
    };
    let Some(action) = cli.action else {
        return usage_error();
    };

    init_logging();

    match run_app(&cli, action).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

/// Loads `.env` (or `env_file`) before parsing so env-backed flags such as
/// `BACKUP_CONFIG` see its values. Variables already set are not overridden.
fn parse_args<I, T>(env_file: Option<&Path>, args: I) -> std::result::Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match env_file {
        Some(path) => dotenv::from_path(path).ok(),
        None => dotenv::dotenv().ok().map(|_| ()),
    };
    Cli::try_parse_from(args)
}

fn usage_error() -> ExitCode {
    println!("{}", COMMAND_HELP);
    ExitCode::from(1)
}

/// Logs go to stderr so stdout only carries listings.
fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_app(cli: &Cli, action: Action) -> Result<()> {
    if !action.needs_storage() {
        return print_last_backup(&cli.config);
    }

    let app_config = AppConfig::load_from_json(&cli.config)
        .with_context(|| format!("Failed to load application configuration from {}", cli.config.display()))?;

    if action.needs_database() {
        let db = DbEngine::from_config(&app_config).context("Unsupported database configuration")?;
        let store = S3Store::connect(&app_config.storage).await;
        run_database_action(cli, action, &app_config, &db, &store).await?;
        info!(action = ?action, engine = db.engine_name(), "done");
    } else {
        let store = S3Store::connect(&app_config.storage).await;
        run_media_action(cli, action, &app_config, &store).await?;
        info!(action = ?action, "done");
    }
    Ok(())
}

/// Only needs `state_dir`, so the rest of the configuration is not validated.
fn print_last_backup(config_path: &Path) -> Result<()> {
    let raw = RawJsonConfig::from_json_file(config_path)
        .with_context(|| format!("Failed to read configuration from {}", config_path.display()))?;
    let bookmark = Bookmark::in_dir(&raw.state_dir());
    match bookmark.read().context("Failed to read the last backup bookmark")? {
        Some(at) => println!("{}", format_timestamp(at)),
        None => println!("no backup recorded in {}", bookmark.path().display()),
    }
    Ok(())
}

async fn run_database_action(
    cli: &Cli,
    action: Action,
    app_config: &AppConfig,
    db: &DbEngine,
    store: &S3Store,
) -> Result<()> {
    let now = Local::now().naive_local();
    let target = cli.target.as_deref();

    match action {
        Action::Backup => {
            let report = backup::run_backup_flow(app_config, db, store, now)
                .await
                .context("Backup process failed")?;
            report_prune(&report.prune);
            println!("backed up {}", report.key);
        }
        Action::BackupDbAndMedia => {
            let (db_report, media_report) = backup::run_db_and_media_backup(app_config, db, store, now)
                .await
                .context("Database and media backup failed")?;
            report_prune(&db_report.prune);
            report_prune(&media_report.prune);
            println!("backed up {} and {}", db_report.key, media_report.key);
        }
        Action::List => {
            for artifact in list_artifacts(store, db.kind()).await.context("Failed to list backups")? {
                println!("{}", artifact.key);
            }
        }
        Action::Recover => {
            let key = restore::recover_database(db, store, &RestoreTarget::from_arg(target))
                .await
                .context("Restore process failed")?;
            println!("recovered {}", key);
        }
        Action::RecoverDbAndMedia => {
            let media_root = app_config.media_root()?;
            let (db_key, media_key) = restore::recover_db_and_media(db, store, media_root, target)
                .await
                .context("Database and media restore failed")?;
            println!("recovered {} and {}", db_key, media_key);
        }
        other => anyhow::bail!("{:?} does not use the database", other),
    }
    Ok(())
}

async fn run_media_action(cli: &Cli, action: Action, app_config: &AppConfig, store: &S3Store) -> Result<()> {
    let now = Local::now().naive_local();

    match action {
        Action::BackupMedia => match backup::run_media_backup(app_config, store, cli.zipped, now)
            .await
            .context("Media backup failed")?
        {
            MediaBackup::Synced(report) => println!(
                "synced media: {} uploaded, {} already stored",
                report.uploaded.len(),
                report.skipped
            ),
            MediaBackup::Zipped(report) => {
                report_prune(&report.prune);
                println!("backed up {}", report.key);
            }
        },
        Action::ListMedia => {
            let keys: Vec<String> = if cli.zipped {
                list_artifacts(store, ArtifactKind::MediaZip)
                    .await
                    .context("Failed to list media archives")?
                    .into_iter()
                    .map(|artifact| artifact.key)
                    .collect()
            } else {
                backup::media::list_media_keys(store)
                    .await
                    .context("Failed to list media files")?
            };
            for key in keys {
                println!("{}", key);
            }
        }
        Action::RecoverMedia => {
            let restored = restore::run_media_recovery(
                app_config,
                store,
                cli.zipped,
                &RestoreTarget::from_arg(cli.target.as_deref()),
            )
            .await
            .context("Media restore failed")?;
            println!("recovered {}", restored);
        }
        other => anyhow::bail!("{:?} is not a media action", other),
    }
    Ok(())
}

/// The backup itself succeeded. Per-key failures were already logged while
/// pruning, so this is the one summary line.
fn report_prune(report: &PruneReport) {
    if let Err(e) = report.clone().into_result() {
        warn!("{}", e);
    }
}
