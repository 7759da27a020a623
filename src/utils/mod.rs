pub mod bookmark;
pub mod naming;
pub mod retention;

use std::path::PathBuf;
use which::which;

/// Finds a PostgreSQL client tool (`pg_dump`, `psql`, `pg_restore`) in the system PATH.
pub fn find_executable(tool: &str) -> Result<PathBuf, String> {
    which(tool).map_err(|_| {
        format!(
            "{} executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.",
            tool
        )
    })
}
