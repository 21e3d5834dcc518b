#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Blob transfer for kiln
//!
//! Package archives come either from a pre-signed URL or from the local
//! content blobstore. [`BlobstoreDelegator`] picks the provider per request
//! and verifies checksums of everything it fetches.

mod blobstore;
mod client;

pub use blobstore::{
    BlobTransfer, BlobstoreDelegator, HttpBlobProvider, LocalBlobstore, UPLOAD_ALGORITHMS,
};
pub use client::{header_map, NetClient, NetConfig};
