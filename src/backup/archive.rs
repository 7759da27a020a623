// dbbackup/src/backup/archive.rs
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::{AppError, Result};

/// Archive path of `path` relative to `root`, always `/`-separated.
fn archive_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Creates a zip archive holding every file and directory below `source_dir`.
///
/// Paths inside the archive are relative to `source_dir`.
pub fn create_zip_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(AppError::Archive(format!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        )));
    }
    if let Some(parent) = archive_dest_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let zip_err = |e: zip::result::ZipError| AppError::Archive(e.to_string());
    let mut zip = ZipWriter::new(File::create(archive_dest_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut file_count = 0usize;

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| AppError::Archive(format!("Failed to walk {}: {}", source_dir.display(), e)))?;
        let Some(name) = archive_name(source_dir, entry.path()) else {
            continue; // the root itself
        };

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(zip_err)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options).map_err(zip_err)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut zip)?;
            file_count += 1;
        }
    }

    zip.finish().map_err(zip_err)?;
    info!(
        source = %source_dir.display(),
        archive = %archive_dest_path.display(),
        files = file_count,
        "zip archive created"
    );
    Ok(())
}

/// Extracts a zip archive into `extract_to_dir`, overwriting existing files.
/// Entries escaping the destination are refused by the zip reader.
pub fn extract_zip_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<()> {
    if !archive_path.is_file() {
        return Err(AppError::Archive(format!(
            "Archive for extraction is not a file: {}",
            archive_path.display()
        )));
    }
    fs::create_dir_all(extract_to_dir)?;

    let mut archive =
        ZipArchive::new(File::open(archive_path)?).map_err(|e| AppError::Archive(e.to_string()))?;
    archive
        .extract(extract_to_dir)
        .map_err(|e| AppError::Archive(format!("Failed to unpack {}: {}", archive_path.display(), e)))?;

    info!(
        archive = %archive_path.display(),
        destination = %extract_to_dir.display(),
        entries = archive.len(),
        "zip archive extracted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_archive_then_extract_preserves_tree() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let media = dir.path().join("media");
        fs::create_dir_all(media.join("avatars/2024"))?;
        fs::create_dir_all(media.join("empty"))?;
        fs::write(media.join("logo.png"), b"png")?;
        fs::write(media.join("avatars/2024/alice.jpg"), b"jpg")?;

        let archive = dir.path().join("out").join("2024-01-01T00:00_media.zip");
        create_zip_archive(&media, &archive)?;

        let restored = dir.path().join("restored");
        extract_zip_archive(&archive, &restored)?;

        assert_eq!(fs::read(restored.join("logo.png"))?, b"png");
        assert_eq!(fs::read(restored.join("avatars/2024/alice.jpg"))?, b"jpg");
        assert!(restored.join("empty").is_dir());
        Ok(())
    }

    #[test]
    fn test_missing_source_directory() {
        let dir = tempdir().unwrap();
        let err = create_zip_archive(&dir.path().join("nope"), &dir.path().join("a.zip")).unwrap_err();
        assert!(matches!(err, AppError::Archive(_)));
    }

    #[test]
    fn test_archive_name_uses_forward_slashes() {
        let root = Path::new("/srv/media");
        assert_eq!(
            archive_name(root, &root.join("a").join("b.txt")),
            Some("a/b.txt".to_string())
        );
        assert_eq!(archive_name(root, root), None);
    }
}
