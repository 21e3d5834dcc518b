//! Archive format sniffing from leading magic bytes
//!
//! Compression signatures are checked before the tar magic: a compressed
//! stream can carry `ustar` bytes anywhere once inflated, but never at the
//! fixed header offset of its compressed form.

use kiln_platform::FilesystemOperations;
use std::path::Path;
use std::sync::Arc;

/// Bytes read from the start of a file when sniffing
pub const SNIFF_LEN: usize = 512;

/// Offset of the POSIX tar magic inside the first header block
pub const TAR_MAGIC_OFFSET: usize = 257;

pub const TAR_MAGIC: &[u8] = b"ustar";

/// Compressed container formats recognised by their leading signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl CompressionFormat {
    pub const ALL: [Self; 4] = [Self::Gzip, Self::Bzip2, Self::Xz, Self::Zstd];

    /// Signature expected at offset zero
    #[must_use]
    pub fn magic(self) -> &'static [u8] {
        match self {
            Self::Gzip => &[0x1F, 0x8B],
            Self::Bzip2 => &[0x42, 0x5A, 0x68],
            Self::Xz => &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00],
            Self::Zstd => &[0x28, 0xB5, 0x2F, 0xFD],
        }
    }

    #[must_use]
    pub fn detect(header: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| header.starts_with(format.magic()))
    }
}

/// Classification of a file's leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Compressed(CompressionFormat),
    /// Plain tar stream
    Tar,
    Unknown,
}

impl ArchiveFormat {
    /// Classify a header buffer; shorter buffers simply fail the length checks
    #[must_use]
    pub fn from_header(header: &[u8]) -> Self {
        if let Some(format) = CompressionFormat::detect(header) {
            return Self::Compressed(format);
        }

        let magic_end = TAR_MAGIC_OFFSET + TAR_MAGIC.len();
        if header.len() >= magic_end && &header[TAR_MAGIC_OFFSET..magic_end] == TAR_MAGIC {
            return Self::Tar;
        }

        Self::Unknown
    }
}

/// Classifies files as compressed archives or plain tar streams
#[derive(Clone)]
pub struct FormatSniffer {
    filesystem: Arc<dyn FilesystemOperations>,
}

impl FormatSniffer {
    pub fn new(filesystem: Arc<dyn FilesystemOperations>) -> Self {
        Self { filesystem }
    }

    /// Classify the file at `path`; unreadable files are [`ArchiveFormat::Unknown`]
    pub async fn classify(&self, path: &Path) -> ArchiveFormat {
        match self.filesystem.read_prefix(path, SNIFF_LEN).await {
            Ok(header) => ArchiveFormat::from_header(&header),
            Err(_) => ArchiveFormat::Unknown,
        }
    }

    /// True only for a readable file that starts like an uncompressed tar
    pub async fn is_uncompressed_tar(&self, path: &Path) -> bool {
        self.classify(path).await == ArchiveFormat::Tar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_header() -> Vec<u8> {
        let mut header = vec![0u8; SNIFF_LEN];
        header[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5].copy_from_slice(b"ustar");
        header
    }

    #[test]
    fn test_compression_signatures_win_over_tar_magic() {
        for format in CompressionFormat::ALL {
            let mut header = tar_header();
            header[..format.magic().len()].copy_from_slice(format.magic());
            assert_eq!(
                ArchiveFormat::from_header(&header),
                ArchiveFormat::Compressed(format)
            );
        }
    }

    #[test]
    fn test_tar_magic_at_fixed_offset() {
        assert_eq!(ArchiveFormat::from_header(&tar_header()), ArchiveFormat::Tar);

        let mut shifted = vec![0u8; SNIFF_LEN];
        shifted[TAR_MAGIC_OFFSET + 1..TAR_MAGIC_OFFSET + 6].copy_from_slice(b"ustar");
        assert_eq!(ArchiveFormat::from_header(&shifted), ArchiveFormat::Unknown);
    }

    #[test]
    fn test_short_buffers_fall_through() {
        assert_eq!(ArchiveFormat::from_header(&[]), ArchiveFormat::Unknown);
        assert_eq!(ArchiveFormat::from_header(&[0x1F]), ArchiveFormat::Unknown);

        // Magic present but cut one byte short
        let header = &tar_header()[..TAR_MAGIC_OFFSET + 4];
        assert_eq!(ArchiveFormat::from_header(header), ArchiveFormat::Unknown);

        // Exactly long enough
        let header = &tar_header()[..TAR_MAGIC_OFFSET + 5];
        assert_eq!(ArchiveFormat::from_header(header), ArchiveFormat::Tar);
    }
}
