use chrono::NaiveDateTime;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::Result;
use crate::utils::naming::{format_timestamp, parse_timestamp};

pub const BOOKMARK_FILE_NAME: &str = "last_backup";

/// Timestamp of the last fully successful backup. One value, no history.
#[derive(Debug, Clone)]
pub struct Bookmark {
    path: PathBuf,
}

impl Bookmark {
    pub fn in_dir(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(BOOKMARK_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, at: NaiveDateTime) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, format_timestamp(at))?;
        debug!(path = %self.path.display(), "bookmark updated");
        Ok(())
    }

    /// `None` when no backup has completed yet or the file holds garbage.
    pub fn read(&self) -> Result<Option<NaiveDateTime>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(parse_timestamp(content.trim())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
