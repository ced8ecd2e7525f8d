//! Archive staging: extraction and wipe of the working directory.
//!
//! Extraction overwrites existing entries, so staging the same archive twice
//! is harmless. The orchestrator only invokes it when the server entry point
//! is absent or a newer version was just fetched (after a wipe of the target
//! directory).

use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, info};

use crate::core::{LaunchError, Result};

/// Extract every entry of `archive` into `target_dir`, overwriting existing
/// files and creating directories as needed.
///
/// Zip decompression is synchronous, so the work runs on the blocking pool.
pub async fn stage(archive: &Path, target_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(target_dir).await?;

    let archive = archive.to_path_buf();
    let target: PathBuf = target_dir.to_path_buf();
    let archive_display = archive.display().to_string();

    task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::open(&archive).map_err(|e| LaunchError::Stage {
            path: archive.display().to_string(),
            reason: format!("failed to open archive: {e}"),
        })?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| LaunchError::Stage {
            path: archive.display().to_string(),
            reason: format!("not a readable zip archive: {e}"),
        })?;
        zip.extract(&target).map_err(|e| LaunchError::Stage {
            path: target.display().to_string(),
            reason: format!("extraction failed: {e}"),
        })?;
        Ok(())
    })
    .await
    .map_err(|e| LaunchError::Stage {
        path: archive_display.clone(),
        reason: format!("extraction task failed: {e}"),
    })??;

    info!("extracted {} into {}", archive_display, target_dir.display());
    Ok(())
}

/// Recursively delete a file or directory tree, post-order.
///
/// A missing path is a no-op success; staged trees may have been cleaned up
/// out of band.
pub async fn remove_recursive(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
        Ok(meta) => {
            if meta.is_dir() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                tokio::fs::remove_file(path).await?;
            }
        }
    }
    debug!("removed {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn stage_extracts_nested_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("dist.zip");
        write_archive(
            &archive,
            &[
                ("server/index.mjs", b"console.log('hi')"),
                ("server/assets/app.css", b"body{}"),
            ],
        );

        let target = dir.path().join("dist");
        stage(&archive, &target).await.unwrap();

        assert!(target.join("server/index.mjs").exists());
        assert!(target.join("server/assets/app.css").exists());
    }

    #[tokio::test]
    async fn stage_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("dist.zip");
        write_archive(&archive, &[("server/index.mjs", b"v1")]);

        let target = dir.path().join("dist");
        stage(&archive, &target).await.unwrap();
        stage(&archive, &target).await.unwrap();

        let content = tokio::fs::read(target.join("server/index.mjs")).await.unwrap();
        assert_eq!(content, b"v1");
    }

    #[tokio::test]
    async fn stage_overwrites_existing_entries() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("dist");

        let old = dir.path().join("old.zip");
        write_archive(&old, &[("server/index.mjs", b"old")]);
        stage(&old, &target).await.unwrap();

        let new = dir.path().join("new.zip");
        write_archive(&new, &[("server/index.mjs", b"new")]);
        stage(&new, &target).await.unwrap();

        let content = tokio::fs::read(target.join("server/index.mjs")).await.unwrap();
        assert_eq!(content, b"new");
    }

    #[tokio::test]
    async fn stage_rejects_garbage_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("dist.zip");
        tokio::fs::write(&archive, b"this is not a zip").await.unwrap();

        let err = stage(&archive, &dir.path().join("dist")).await.unwrap_err();
        assert!(matches!(err, LaunchError::Stage { .. }));
    }

    #[tokio::test]
    async fn remove_recursive_deletes_trees_and_files() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("dist");
        tokio::fs::create_dir_all(tree.join("server/nested")).await.unwrap();
        tokio::fs::write(tree.join("server/nested/file.txt"), b"x").await.unwrap();

        remove_recursive(&tree).await.unwrap();
        assert!(!tree.exists());

        let file = dir.path().join("single.txt");
        tokio::fs::write(&file, b"x").await.unwrap();
        remove_recursive(&file).await.unwrap();
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn remove_recursive_of_missing_path_is_noop() {
        let dir = TempDir::new().unwrap();
        remove_recursive(&dir.path().join("nothing-here")).await.unwrap();
    }
}
