//! Native filesystem operations

use async_trait::async_trait;
use kiln_errors::PlatformError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::filesystem::FilesystemOperations;

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFilesystemOperations;

impl NativeFilesystemOperations {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn fs_error(operation: &str, path: &Path, err: &std::io::Error) -> PlatformError {
    if err.kind() == ErrorKind::PermissionDenied {
        PlatformError::PermissionDenied {
            operation: operation.to_string(),
            message: format!("{}: {err}", path.display()),
        }
    } else {
        PlatformError::FilesystemOperationFailed {
            operation: operation.to_string(),
            message: format!("{}: {err}", path.display()),
        }
    }
}

#[async_trait]
impl FilesystemOperations for NativeFilesystemOperations {
    async fn create_dir_all(&self, path: &Path) -> Result<(), PlatformError> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| fs_error("create_dir_all", path, &e))
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<(), PlatformError> {
        let metadata = match fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(fs_error("remove_dir_all", path, &e)),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        };

        match result {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(fs_error("remove_dir_all", path, &e)),
            _ => Ok(()),
        }
    }

    async fn remove_file(&self, path: &Path) -> Result<(), PlatformError> {
        fs::remove_file(path)
            .await
            .map_err(|e| fs_error("remove_file", path, &e))
    }

    async fn rename(&self, src: &Path, dst: &Path) -> Result<(), PlatformError> {
        fs::rename(src, dst).await.map_err(|e| {
            PlatformError::FilesystemOperationFailed {
                operation: "rename".to_string(),
                message: format!("{} -> {}: {e}", src.display(), dst.display()),
            }
        })
    }

    async fn read_and_follow_link(&self, path: &Path) -> Result<PathBuf, PlatformError> {
        fs::canonicalize(path)
            .await
            .map_err(|e| fs_error("read_and_follow_link", path, &e))
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), PlatformError> {
        fs::symlink(target, link)
            .await
            .map_err(|e| fs_error("symlink", link, &e))
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf, PlatformError> {
        fs::read_link(path)
            .await
            .map_err(|e| fs_error("read_link", path, &e))
    }

    async fn read_prefix(&self, path: &Path, limit: usize) -> Result<Vec<u8>, PlatformError> {
        let file = fs::File::open(path)
            .await
            .map_err(|e| fs_error("open", path, &e))?;

        let mut buffer = Vec::with_capacity(limit);
        file.take(u64::try_from(limit).unwrap_or(u64::MAX))
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| fs_error("read", path, &e))?;
        Ok(buffer)
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), PlatformError> {
        fs::write(path, contents)
            .await
            .map_err(|e| fs_error("write_file", path, &e))
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>, PlatformError> {
        let mut entries = fs::read_dir(path)
            .await
            .map_err(|e| fs_error("list_dir", path, &e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| fs_error("list_dir", path, &e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn is_dir(&self, path: &Path) -> bool {
        fs::metadata(path).await.is_ok_and(|m| m.is_dir())
    }
}
