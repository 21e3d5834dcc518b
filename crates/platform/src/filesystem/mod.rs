//! Filesystem operations used by the unpacker, bundles and format sniffing

use async_trait::async_trait;
use kiln_errors::PlatformError;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait FilesystemOperations: Send + Sync {
    /// Create directory and all parent directories
    async fn create_dir_all(&self, path: &Path) -> Result<(), PlatformError>;

    /// Remove whatever is at `path`, recursively; a missing path is not an error
    async fn remove_dir_all(&self, path: &Path) -> Result<(), PlatformError>;

    /// Remove a single file or symlink
    async fn remove_file(&self, path: &Path) -> Result<(), PlatformError>;

    /// Rename `src` to `dst`, replacing a file or empty directory at `dst`
    async fn rename(&self, src: &Path, dst: &Path) -> Result<(), PlatformError>;

    /// Resolve every symbolic link in `path` into an absolute real path
    async fn read_and_follow_link(&self, path: &Path) -> Result<PathBuf, PlatformError>;

    /// Create a symlink at `link` pointing at `target`
    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), PlatformError>;

    async fn read_link(&self, path: &Path) -> Result<PathBuf, PlatformError>;

    /// Read at most `limit` bytes from the start of a file
    async fn read_prefix(&self, path: &Path, limit: usize) -> Result<Vec<u8>, PlatformError>;

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), PlatformError>;

    /// Names of the entries of a directory, sorted
    async fn list_dir(&self, path: &Path) -> Result<Vec<String>, PlatformError>;

    /// Check if a path exists, following symlinks
    async fn exists(&self, path: &Path) -> bool;

    async fn is_dir(&self, path: &Path) -> bool;
}
