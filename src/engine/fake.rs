// Scripted database adapter used by the workflow tests.
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::DatabaseAdapter;
use crate::errors::{AppError, Result};
use crate::utils::naming::ArtifactKind;

pub const SNAPSHOT: &[u8] = b"snapshot";

pub struct FakeDb {
    kind: ArtifactKind,
    fail_dump: bool,
    restored: Mutex<Vec<Vec<u8>>>,
}

impl FakeDb {
    pub fn new(kind: ArtifactKind) -> Self {
        Self {
            kind,
            fail_dump: false,
            restored: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_dump(kind: ArtifactKind) -> Self {
        Self {
            fail_dump: true,
            ..Self::new(kind)
        }
    }

    /// Contents of every file handed to `restore`, in call order.
    pub fn restored(&self) -> Vec<Vec<u8>> {
        self.restored.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseAdapter for FakeDb {
    fn engine_name(&self) -> &'static str {
        "fake"
    }

    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    async fn dump(&self, work_dir: &Path) -> Result<PathBuf> {
        if self.fail_dump {
            return Err(AppError::DumpFailed {
                engine: "fake",
                reason: "tool exited with status 1".to_string(),
            });
        }
        let path = work_dir.join(format!("dump{}", self.kind.suffix()));
        tokio::fs::write(&path, SNAPSHOT).await?;
        Ok(path)
    }

    async fn restore(&self, dump_path: &Path) -> Result<()> {
        let content = tokio::fs::read(dump_path).await?;
        self.restored.lock().unwrap().push(content);
        Ok(())
    }
}
