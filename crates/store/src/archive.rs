//! Tarball compression and decompression
//!
//! Tar work is synchronous and runs under `spawn_blocking`; compression
//! layers go through `async-compression` around a scratch tar file.

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder, ZstdDecoder};
use async_compression::tokio::write::GzipEncoder;
use async_trait::async_trait;
use kiln_errors::StorageError;
use kiln_platform::FilesystemOperations;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};

use crate::format::{ArchiveFormat, CompressionFormat, SNIFF_LEN};

/// Options applied when producing an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressOptions {
    /// Write a plain tar instead of gzip
    pub no_compression: bool,
}

#[async_trait]
pub trait ArchiveCompressor: Send + Sync {
    /// Expand `archive` into the existing directory `target`
    async fn decompress(&self, archive: &Path, target: &Path) -> Result<(), StorageError>;

    /// Archive the contents of `source` into a new temporary file
    async fn compress(
        &self,
        source: &Path,
        options: CompressOptions,
    ) -> Result<PathBuf, StorageError>;

    /// Remove an archive produced by [`ArchiveCompressor::compress`]
    async fn cleanup(&self, archive: &Path) -> Result<(), StorageError>;
}

/// Tar-based compressor writing its archives under a scratch directory
pub struct TarballCompressor {
    filesystem: Arc<dyn FilesystemOperations>,
    tmp_dir: PathBuf,
}

impl TarballCompressor {
    pub fn new(filesystem: Arc<dyn FilesystemOperations>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            filesystem,
            tmp_dir: tmp_dir.into(),
        }
    }

    #[must_use]
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    async fn ensure_tmp_dir(&self) -> Result<(), StorageError> {
        self.filesystem
            .create_dir_all(&self.tmp_dir)
            .await
            .map_err(StorageError::from)
    }

    /// Inflate a compressed archive into a scratch tar file
    async fn inflate(
        &self,
        archive: &Path,
        format: CompressionFormat,
    ) -> Result<tempfile::TempPath, StorageError> {
        self.ensure_tmp_dir().await?;
        let scratch = tempfile::Builder::new()
            .prefix("kiln-inflate-")
            .suffix(".tar")
            .tempfile_in(&self.tmp_dir)
            .map_err(|e| archive_error("creating scratch tar", &e))?
            .into_temp_path();

        let input = File::open(archive)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, archive))?;
        let reader = BufReader::new(input);
        let mut output = File::create(&scratch)
            .await
            .map_err(|e| archive_error("opening scratch tar", &e))?;

        let copied = match format {
            CompressionFormat::Gzip => {
                let mut decoder = GzipDecoder::new(reader);
                decoder.multiple_members(true);
                copy_all(&mut decoder, &mut output).await
            }
            CompressionFormat::Bzip2 => copy_all(&mut BzDecoder::new(reader), &mut output).await,
            CompressionFormat::Xz => copy_all(&mut XzDecoder::new(reader), &mut output).await,
            CompressionFormat::Zstd => copy_all(&mut ZstdDecoder::new(reader), &mut output).await,
        };
        copied.map_err(|e| archive_error(&format!("decompressing {format:?} archive"), &e))?;

        output
            .flush()
            .await
            .map_err(|e| archive_error("flushing scratch tar", &e))?;
        Ok(scratch)
    }
}

async fn copy_all<R>(reader: &mut R, output: &mut File) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    tokio::io::copy(reader, output).await
}

fn archive_error(context: &str, err: &dyn std::fmt::Display) -> StorageError {
    StorageError::ArchiveFailed {
        message: format!("{context}: {err}"),
    }
}

#[async_trait]
impl ArchiveCompressor for TarballCompressor {
    async fn decompress(&self, archive: &Path, target: &Path) -> Result<(), StorageError> {
        let header = self
            .filesystem
            .read_prefix(archive, SNIFF_LEN)
            .await
            .map_err(StorageError::from)?;

        // Anything that is not a known compression container goes straight to tar
        let inflated = match ArchiveFormat::from_header(&header) {
            ArchiveFormat::Compressed(format) => Some(self.inflate(archive, format).await?),
            ArchiveFormat::Tar | ArchiveFormat::Unknown => None,
        };
        let tar_path = inflated
            .as_ref()
            .map_or_else(|| archive.to_path_buf(), |scratch| scratch.to_path_buf());

        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_tar(&tar_path, &target))
            .await
            .map_err(|e| archive_error("extract task failed", &e))??;

        // Scratch tar is deleted when `inflated` drops
        drop(inflated);
        Ok(())
    }

    async fn compress(
        &self,
        source: &Path,
        options: CompressOptions,
    ) -> Result<PathBuf, StorageError> {
        self.ensure_tmp_dir().await?;

        let id = uuid::Uuid::new_v4();
        let tar_path = self.tmp_dir.join(format!("kiln-archive-{id}.tar"));

        let src = source.to_path_buf();
        let out = tar_path.clone();
        tokio::task::spawn_blocking(move || write_tar(&src, &out))
            .await
            .map_err(|e| archive_error("create task failed", &e))??;

        if options.no_compression {
            return Ok(tar_path);
        }

        let tgz_path = self.tmp_dir.join(format!("kiln-archive-{id}.tgz"));
        let gzipped = gzip_file(&tar_path, &tgz_path).await;
        let _ = self.filesystem.remove_dir_all(&tar_path).await;
        if let Err(err) = gzipped {
            let _ = self.filesystem.remove_dir_all(&tgz_path).await;
            return Err(err);
        }
        Ok(tgz_path)
    }

    async fn cleanup(&self, archive: &Path) -> Result<(), StorageError> {
        self.filesystem
            .remove_dir_all(archive)
            .await
            .map_err(StorageError::from)
    }
}

async fn gzip_file(input: &Path, output: &Path) -> Result<(), StorageError> {
    let input_file = File::open(input)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, input))?;
    let output_file = File::create(output)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, output))?;

    let mut encoder = GzipEncoder::new(output_file);
    let mut reader = BufReader::new(input_file);
    tokio::io::copy(&mut reader, &mut encoder)
        .await
        .map_err(|e| archive_error("compressing archive", &e))?;
    encoder
        .shutdown()
        .await
        .map_err(|e| archive_error("finishing gzip stream", &e))?;
    Ok(())
}

/// Unpack a plain tar file into `dest`, refusing entries that escape it
fn unpack_tar(tar_path: &Path, dest: &Path) -> Result<(), StorageError> {
    let file =
        std::fs::File::open(tar_path).map_err(|e| StorageError::from_io_with_path(&e, tar_path))?;
    let mut archive = tar::Archive::new(file);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(false);

    let entries = archive
        .entries()
        .map_err(|e| archive_error("reading archive", &e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error("reading archive entry", &e))?;
        let path = entry
            .path()
            .map_err(|e| archive_error("reading entry path", &e))?
            .into_owned();

        if path.components().any(|c| c == Component::ParentDir) {
            return Err(StorageError::UnsafeArchiveEntry {
                entry: path.display().to_string(),
            });
        }

        entry
            .unpack_in(dest)
            .map_err(|e| archive_error(&format!("unpacking {}", path.display()), &e))?;
    }

    Ok(())
}

/// Write a deterministic tar of the contents of `src`, rooted at `.`
fn write_tar(src: &Path, out: &Path) -> Result<(), StorageError> {
    let file = std::fs::File::create(out).map_err(|e| StorageError::from_io_with_path(&e, out))?;
    let mut builder = tar::Builder::new(std::io::BufWriter::new(file));
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    let root = Path::new(".");
    builder
        .append_dir(root, src)
        .map_err(|e| archive_error("adding root directory", &e))?;
    add_dir_to_tar(&mut builder, src, root)?;

    let mut writer = builder
        .into_inner()
        .map_err(|e| archive_error("finishing archive", &e))?;
    std::io::Write::flush(&mut writer).map_err(|e| archive_error("flushing archive", &e))?;
    Ok(())
}

/// Recursively add directory contents to tar, in name order
fn add_dir_to_tar<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    src: &Path,
    prefix: &Path,
) -> Result<(), StorageError> {
    let mut entries = std::fs::read_dir(src)
        .map_err(|e| StorageError::from_io_with_path(&e, src))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::from_io_with_path(&e, src))?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        let tar_path = prefix.join(entry.file_name());
        let metadata = std::fs::symlink_metadata(&path)
            .map_err(|e| StorageError::from_io_with_path(&e, &path))?;

        if metadata.is_dir() {
            builder
                .append_dir(&tar_path, &path)
                .map_err(|e| archive_error(&format!("adding {}", tar_path.display()), &e))?;
            add_dir_to_tar(builder, &path, &tar_path)?;
        } else if metadata.is_file() {
            builder
                .append_path_with_name(&path, &tar_path)
                .map_err(|e| archive_error(&format!("adding {}", tar_path.display()), &e))?;
        } else if metadata.is_symlink() {
            let target = std::fs::read_link(&path)
                .map_err(|e| StorageError::from_io_with_path(&e, &path))?;

            let mut header = tar::Header::new_gnu();
            header.set_metadata_in_mode(&metadata, tar::HeaderMode::Deterministic);
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder
                .append_link(&mut header, &tar_path, &target)
                .map_err(|e| archive_error(&format!("adding {}", tar_path.display()), &e))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_platform::NativeFilesystemOperations;
    use tempfile::tempdir;

    fn compressor(tmp: &Path) -> TarballCompressor {
        TarballCompressor::new(Arc::new(NativeFilesystemOperations::new()), tmp)
    }

    #[tokio::test]
    async fn test_compress_entries_are_relative_and_sorted() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("bin")).unwrap();
        std::fs::write(src.join("b.txt"), b"b").unwrap();
        std::fs::write(src.join("a.txt"), b"a").unwrap();
        std::fs::write(src.join("bin/tool"), b"#!/bin/sh\n").unwrap();

        let c = compressor(&temp.path().join("tmp"));
        let tar = c
            .compress(&src, CompressOptions { no_compression: true })
            .await
            .unwrap();

        let mut archive = tar::Archive::new(std::fs::File::open(&tar).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec![".", "a.txt", "b.txt", "bin", "bin/tool"]);
    }

    #[tokio::test]
    async fn test_entries_unpack_at_their_archived_paths() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("pkg-1.0/lib")).unwrap();
        std::fs::write(src.join("pkg-1.0/lib/a.so"), b"so").unwrap();

        let c = compressor(&temp.path().join("tmp"));
        let archive = c.compress(&src, CompressOptions::default()).await.unwrap();

        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        c.decompress(&archive, &dest).await.unwrap();

        assert_eq!(std::fs::read(dest.join("pkg-1.0/lib/a.so")).unwrap(), b"so");
        assert!(!dest.join("lib").exists());
    }

    #[tokio::test]
    async fn test_failed_gzip_leaves_no_scratch_files() {
        let temp = tempdir().unwrap();
        let tmp = temp.path().join("tmp");
        let bogus = temp.path().join("bogus.tgz");
        std::fs::write(&bogus, [0x1F, 0x8B, 0x00, 0x01, 0x02]).unwrap();

        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        let err = compressor(&tmp)
            .decompress(&bogus, &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::ArchiveFailed { .. }));
        assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 0);
    }
}
