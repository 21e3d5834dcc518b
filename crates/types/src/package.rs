//! Package, dependency and bundle identity definitions

use crate::{BlobId, Headers};
use kiln_hash::MultipleDigest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an on-disk bundle: a package name and version
pub trait BundleDefinition {
    fn bundle_name(&self) -> &str;
    fn bundle_version(&self) -> &str;
}

/// Where a package archive can be retrieved from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Blob addressed by id in the configured blobstore
    Blobstore(BlobId),
    /// Pre-signed URL fetched directly over HTTP
    SignedUrl(String),
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blobstore(id) => write!(f, "blob {id}"),
            Self::SignedUrl(_) => f.write_str("signed url"),
        }
    }
}

/// Why a source carries no usable locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorError {
    Missing,
    Ambiguous,
}

impl fmt::Display for LocatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("no blobstore reference"),
            Self::Ambiguous => f.write_str("both a blobstore id and a signed URL given"),
        }
    }
}

/// Source archive reference of a package or dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSource {
    /// Checksum of the archive, verified after retrieval
    pub checksum: MultipleDigest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blobstore_id: Option<BlobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
}

impl PackageSource {
    /// Source addressed by blobstore id
    #[must_use]
    pub fn from_blob(checksum: MultipleDigest, blob_id: impl Into<BlobId>) -> Self {
        Self {
            checksum,
            blobstore_id: Some(blob_id.into()),
            signed_url: None,
            headers: Headers::new(),
        }
    }

    /// Source addressed by signed URL
    #[must_use]
    pub fn from_signed_url(checksum: MultipleDigest, url: impl Into<String>) -> Self {
        Self {
            checksum,
            blobstore_id: None,
            signed_url: Some(url.into()),
            headers: Headers::new(),
        }
    }

    /// Resolve the single usable locator; empty strings count as absent.
    ///
    /// # Errors
    /// Returns [`LocatorError`] when neither or both locators are present.
    pub fn locator(&self) -> Result<SourceLocator, LocatorError> {
        let blob_id = self.blobstore_id.as_ref().filter(|id| !id.is_empty());
        let url = self
            .signed_url
            .as_deref()
            .filter(|url| !url.trim().is_empty());

        match (blob_id, url) {
            (Some(id), None) => Ok(SourceLocator::Blobstore(id.clone())),
            (None, Some(url)) => Ok(SourceLocator::SignedUrl(url.to_string())),
            (None, None) => Err(LocatorError::Missing),
            (Some(_), Some(_)) => Err(LocatorError::Ambiguous),
        }
    }
}

/// Destination of a compiled artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    /// Pre-signed upload URL; the local blobstore is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
}

impl UploadTarget {
    /// The signed URL, if one was supplied and is non-empty
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.signed_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }
}

/// A package to compile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Unique key of the package's compile directory
    pub name: String,
    pub version: String,
    pub source: PackageSource,
    #[serde(default)]
    pub upload: UploadTarget,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: PackageSource) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source,
            upload: UploadTarget::default(),
        }
    }

    #[must_use]
    pub fn with_upload(mut self, upload: UploadTarget) -> Self {
        self.upload = upload;
        self
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// A resolved, already compiled dependency of the package being compiled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub source: PackageSource,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: PackageSource) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source,
        }
    }
}

impl BundleDefinition for Dependency {
    fn bundle_name(&self) -> &str {
        &self.name
    }

    fn bundle_version(&self) -> &str {
        &self.version
    }
}

/// Identity of a package bundle created locally, without source content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPackage {
    pub name: String,
    pub version: String,
}

impl LocalPackage {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl From<&Package> for LocalPackage {
    fn from(pkg: &Package) -> Self {
        Self::new(pkg.name.clone(), pkg.version.clone())
    }
}

impl BundleDefinition for LocalPackage {
    fn bundle_name(&self) -> &str {
        &self.name
    }

    fn bundle_version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for LocalPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}
