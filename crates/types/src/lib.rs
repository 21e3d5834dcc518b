#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the kiln compilation agent
//!
//! This crate provides the compile request model shared by every layer:
//! packages, their source and upload locators, resolved dependencies and
//! the identity of on-disk bundles.

pub mod blob;
pub mod package;
pub mod request;

// Re-export commonly used types
pub use blob::{BlobId, Headers};
pub use kiln_hash::{Algorithm, Digest, MultipleDigest};
pub use package::{
    BundleDefinition, Dependency, LocalPackage, LocatorError, Package, PackageSource,
    SourceLocator, UploadTarget,
};
pub use request::{CompileRequest, CompiledPackage};

use serde::{Deserialize, Serialize};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Plain,
    #[default]
    Tty,
    Json,
}

impl clap::ValueEnum for OutputFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Plain, Self::Tty, Self::Json]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Plain => clap::builder::PossibleValue::new("plain"),
            Self::Tty => clap::builder::PossibleValue::new("tty"),
            Self::Json => clap::builder::PossibleValue::new("json"),
        })
    }
}
