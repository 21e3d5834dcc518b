#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Archive handling for kiln
//!
//! [`TarballCompressor`] expands source archives and repackages compiled
//! output; [`FormatSniffer`] decides whether a file is already a plain tar
//! stream so the output can keep the same compression characteristic.

mod archive;
mod format;

pub use archive::{ArchiveCompressor, CompressOptions, TarballCompressor};
pub use format::{
    ArchiveFormat, CompressionFormat, FormatSniffer, SNIFF_LEN, TAR_MAGIC, TAR_MAGIC_OFFSET,
};
