//! Local filesystem adapter.
//!
//! Writes are atomic (temp file, fsync, rename) so a reader never observes
//! a partially written file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};
use walkdir::WalkDir;

use cloudio_common::{BackendKind, Metadata, StorageError, StoragePath, StorageResult};

use super::{PathStatus, StorageBackend};

#[derive(Debug, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn not_found(path: &StoragePath, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(err)
    }
}

/// `/`-joined path of `path` below `base`.
fn relative_to(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

async fn list_children(dir: &Path, exclude_folders: bool) -> StorageResult<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            if !exclude_folders {
                names.push(format!("{}/", name));
            }
        } else {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn walk(dir: &Path, exclude_folders: bool) -> StorageResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::Backend(e.into()))?;
        let Some(relative) = relative_to(dir, entry.path()) else {
            continue;
        };
        if entry.file_type().is_dir() {
            if !exclude_folders {
                names.push(format!("{}/", relative));
            }
        } else {
            names.push(relative);
        }
    }
    Ok(names)
}

async fn write_atomic(dest: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path: PathBuf = dest.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    tokio::fs::write(&tmp_path, data).await?;
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&tmp_path)
        .await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp_path, dest).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn stat(&self, path: &StoragePath) -> StorageResult<PathStatus> {
        match tokio::fs::metadata(path.local_path()).await {
            Ok(meta) => Ok(PathStatus {
                is_file: meta.is_file(),
                is_dir: meta.is_dir(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(PathStatus::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn listdir(
        &self,
        path: &StoragePath,
        recursive: bool,
        exclude_folders: bool,
    ) -> StorageResult<Vec<String>> {
        let status = self.stat(path).await?;
        if !status.exists() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if !status.is_dir {
            return Err(StorageError::NotADirectory(path.to_string()));
        }

        let dir = path.local_path();
        if recursive {
            tokio::task::spawn_blocking(move || walk(&dir, exclude_folders))
                .await
                .map_err(|e| StorageError::Backend(e.into()))?
        } else {
            list_children(&dir, exclude_folders).await
        }
    }

    async fn remove(&self, path: &StoragePath) -> StorageResult<()> {
        let status = self.stat(path).await?;
        let local = path.local_path();
        if status.is_dir {
            tokio::fs::remove_dir_all(&local).await?;
        } else if status.is_file {
            tokio::fs::remove_file(&local).await?;
        } else {
            return Err(StorageError::NotFound(path.to_string()));
        }
        info!(path = %path, "Removed");
        Ok(())
    }

    async fn read(&self, path: &StoragePath) -> StorageResult<Bytes> {
        let data = tokio::fs::read(path.local_path())
            .await
            .map_err(|e| not_found(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, path: &StoragePath, data: Bytes, metadata: &Metadata) -> StorageResult<()> {
        if !metadata.is_empty() {
            debug!(path = %path, "Local files carry no user metadata; ignoring it");
        }
        write_atomic(&path.local_path(), &data).await?;
        debug!(path = %path, bytes = data.len(), "Local write complete");
        Ok(())
    }

    async fn upload_file(&self, path: &StoragePath, local: &Path) -> StorageResult<()> {
        let dest = path.local_path();
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &dest).await?;
        Ok(())
    }
}
