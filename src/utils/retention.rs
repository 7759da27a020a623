//! Retention and selection over artifact keys.

use chrono::{Duration, NaiveDateTime};
use tracing::{info, warn};

use crate::errors::{AppError, PruneFailure, Result};
use crate::storage::ObjectStore;
use crate::utils::naming::{parse_key, ArtifactKind};

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub key: String,
    pub timestamp: NaiveDateTime,
}

/// Outcome of a prune pass. Failed deletions do not stop the others.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub failed: Vec<PruneFailure>,
}

impl PruneReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<String>> {
        if self.failed.is_empty() {
            Ok(self.deleted)
        } else {
            Err(AppError::PruneFailed {
                failures: self.failed,
            })
        }
    }
}

/// Keeps the keys that parse as `kind`, oldest first.
pub fn collect_artifacts<I, S>(keys: I, kind: ArtifactKind) -> Vec<Artifact>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut artifacts: Vec<Artifact> = keys
        .into_iter()
        .filter_map(|key| {
            let key = key.as_ref();
            parse_key(key, kind).ok().map(|timestamp| Artifact {
                key: key.to_string(),
                timestamp,
            })
        })
        .collect();
    artifacts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.key.cmp(&b.key)));
    artifacts
}

/// Lists the bucket and keeps the artifacts of `kind`, oldest first.
pub async fn list_artifacts(store: &dyn ObjectStore, kind: ArtifactKind) -> Result<Vec<Artifact>> {
    let keys = store.list().await?;
    Ok(collect_artifacts(keys, kind))
}

pub fn select_latest(artifacts: &[Artifact]) -> Result<&Artifact> {
    artifacts
        .last()
        .ok_or_else(|| AppError::NotFound("no backup artifacts in storage".to_string()))
}

/// Artifacts strictly older than the window; one exactly on the boundary stays.
pub fn select_stale(artifacts: &[Artifact], keep_days: u32, now: NaiveDateTime) -> Vec<&Artifact> {
    let window = Duration::days(i64::from(keep_days));
    artifacts
        .iter()
        .filter(|artifact| now - artifact.timestamp > window)
        .collect()
}

pub async fn prune(
    store: &dyn ObjectStore,
    artifacts: &[Artifact],
    keep_days: u32,
    now: NaiveDateTime,
) -> PruneReport {
    let mut report = PruneReport::default();
    for artifact in select_stale(artifacts, keep_days, now) {
        match store.delete(&artifact.key).await {
            Ok(()) => {
                info!(key = %artifact.key, "removed stale backup");
                report.deleted.push(artifact.key.clone());
            }
            Err(e) => {
                warn!(key = %artifact.key, error = %e, "could not remove stale backup");
                report.failed.push(PruneFailure {
                    key: artifact.key.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    report
}
