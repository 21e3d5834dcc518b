#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! On-disk package bundles for kiln
//!
//! A bundle is the install/enable/disable/uninstall unit for one package
//! version. Installed content lives under
//! `<packages_dir>/<name>/<sha1(version)>`; enabling a bundle points the
//! symlink `<enable_dir>/<name>` at it.
//!
//! [`PackageApplier`] builds on the bundle collection to materialise compiled
//! dependencies on the node and to strip the node back to a known set.

mod applier;
mod collection;

pub use applier::{DependencyApplier, PackageApplier};
pub use collection::{
    version_key, BundleCollection, BundleLifecycle, FileBundle, FileBundleCollection,
};
