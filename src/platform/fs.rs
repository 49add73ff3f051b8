use crate::types::backup::FileInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Host file access used by backups and exports.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Write `content`, creating parent folders. Returns the written path.
    async fn write_file(&self, path: &Path, content: &str) -> io::Result<PathBuf>;

    async fn read_file(&self, path: &Path) -> io::Result<String>;

    /// Regular files directly inside `dir`; a missing folder lists as empty.
    async fn list_files(&self, dir: &Path) -> io::Result<Vec<FileInfo>>;

    async fn delete_file(&self, path: &Path) -> io::Result<()>;

    async fn file_exists(&self, path: &Path) -> io::Result<bool>;

    /// Reveal a folder in the OS shell.
    async fn open_folder(&self, dir: &Path) -> io::Result<()>;
}

/// [`FileSystem`] over the local disk.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn write_file(&self, path: &Path, content: &str) -> io::Result<PathBuf> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        debug!(path = %path.display(), bytes = content.len(), "file written");
        Ok(path.to_path_buf())
    }

    async fn read_file(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn list_files(&self, dir: &Path) -> io::Result<Vec<FileInfo>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            files.push(FileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                created: meta.created().ok().map(DateTime::<Utc>::from),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn delete_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn file_exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn open_folder(&self, dir: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let opener = if cfg!(target_os = "windows") {
            "explorer"
        } else if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        let status = tokio::process::Command::new(opener).arg(dir).status().await?;
        if !status.success() {
            warn!(path = %dir.display(), opener, %status, "folder opener exited with an error");
        }
        info!(path = %dir.display(), "opened folder");
        Ok(())
    }
}
