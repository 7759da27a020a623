//! Artifact key naming.
//!
//! Every artifact key is a minute-resolution timestamp followed by a suffix
//! identifying the payload, e.g. `2024-01-15T00:00_db.sqlite`. Two backups
//! taken within the same minute share a key and the later upload wins.

use chrono::NaiveDateTime;
use std::fmt;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Payload type and engine encoded in an artifact key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    SqliteDb,
    PostgresDump,
    PostgresBackup,
    MediaZip,
}

impl ArtifactKind {
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::SqliteDb => "_db.sqlite",
            ArtifactKind::PostgresDump => "_postgres_dump.sql",
            ArtifactKind::PostgresBackup => "_postgres_backup.dump",
            ArtifactKind::MediaZip => "_media.zip",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix().trim_start_matches('_'))
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("'{key}' is not a {kind} artifact")]
pub struct NotAnArtifact {
    pub key: String,
    pub kind: ArtifactKind,
}

pub fn format_key(now: NaiveDateTime, kind: ArtifactKind) -> String {
    format!("{}{}", now.format(DATE_FORMAT), kind.suffix())
}

pub fn parse_key(key: &str, kind: ArtifactKind) -> Result<NaiveDateTime, NotAnArtifact> {
    let not_an_artifact = || NotAnArtifact {
        key: key.to_string(),
        kind,
    };
    let stamp = key.strip_suffix(kind.suffix()).ok_or_else(not_an_artifact)?;
    parse_timestamp(stamp).ok_or_else(not_an_artifact)
}

/// Parses a bare `YYYY-MM-DDTHH:MM` timestamp.
pub fn parse_timestamp(stamp: &str) -> Option<NaiveDateTime> {
    // chrono tolerates unpadded fields; keys are always fully padded
    if stamp.len() != "YYYY-MM-DDTHH:MM".len() {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, DATE_FORMAT).ok()
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(DATE_FORMAT).to_string()
}
