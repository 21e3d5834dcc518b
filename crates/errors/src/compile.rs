//! Package compilation error types
//!
//! Every variant corresponds to one step of the compile sequence, so a caller
//! can tell a request that never started apart from one that uploaded its
//! artifact but left the node's package environment dirty.

use std::borrow::Cow;
use std::fmt;

use crate::UserFacingError;
use thiserror::Error;

/// Step of the compile sequence an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileStep {
    Configuration,
    DependencyReset,
    DependencyInstall,
    Fetch,
    Decompress,
    BundleSetup,
    BundleEnable,
    ScriptExecution,
    Compress,
    Upload,
    BundleTeardown,
    FinalReset,
    Cleanup,
}

impl CompileStep {
    /// Stable snake_case identifier, used for event payloads and error codes
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::DependencyReset => "dependency_reset",
            Self::DependencyInstall => "dependency_install",
            Self::Fetch => "fetch",
            Self::Decompress => "decompress",
            Self::BundleSetup => "bundle_setup",
            Self::BundleEnable => "bundle_enable",
            Self::ScriptExecution => "script_execution",
            Self::Compress => "compress",
            Self::Upload => "upload",
            Self::BundleTeardown => "bundle_teardown",
            Self::FinalReset => "final_reset",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for CompileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of the bundle teardown failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStage {
    Disabling,
    Uninstalling,
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabling => f.write_str("disabling"),
            Self::Uninstalling => f.write_str("uninstalling"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("{reason} for package '{package}'")]
    Configuration { package: String, reason: String },

    #[error("removing packages: {message}")]
    DependencyReset { message: String },

    #[error("installing dependent package '{dependency}': {message}")]
    DependencyInstall { dependency: String, message: String },

    #[error("fetching package {package}: {message}")]
    Fetch { package: String, message: String },

    #[error("uncompressing package {package}: {message}")]
    Decompress { package: String, message: String },

    #[error("setting up new package bundle for {package}: {message}")]
    BundleSetup { package: String, message: String },

    #[error("enabling new package bundle for {package}: {message}")]
    BundleEnable { package: String, message: String },

    #[error("running packaging script for {package}: {message}")]
    ScriptExecution { package: String, message: String },

    #[error("compressing compiled package {package}: {message}")]
    Compress { package: String, message: String },

    #[error("uploading compiled package {package}: {message}")]
    Upload { package: String, message: String },

    #[error("{stage} compiled package {package}: {message}")]
    BundleTeardown {
        package: String,
        stage: TeardownStage,
        message: String,
    },

    #[error("removing packages after compiling {package}: {message}")]
    FinalReset { package: String, message: String },

    #[error("removing compile directory {path}: {message}")]
    Cleanup { path: String, message: String },
}

impl CompileError {
    /// The step this error originated from
    #[must_use]
    pub fn step(&self) -> CompileStep {
        match self {
            Self::Configuration { .. } => CompileStep::Configuration,
            Self::DependencyReset { .. } => CompileStep::DependencyReset,
            Self::DependencyInstall { .. } => CompileStep::DependencyInstall,
            Self::Fetch { .. } => CompileStep::Fetch,
            Self::Decompress { .. } => CompileStep::Decompress,
            Self::BundleSetup { .. } => CompileStep::BundleSetup,
            Self::BundleEnable { .. } => CompileStep::BundleEnable,
            Self::ScriptExecution { .. } => CompileStep::ScriptExecution,
            Self::Compress { .. } => CompileStep::Compress,
            Self::Upload { .. } => CompileStep::Upload,
            Self::BundleTeardown { .. } => CompileStep::BundleTeardown,
            Self::FinalReset { .. } => CompileStep::FinalReset,
            Self::Cleanup { .. } => CompileStep::Cleanup,
        }
    }

    /// True when the artifact reached the blobstore before the failure.
    ///
    /// Cleanup errors only surface when nothing else failed, so they also
    /// imply a completed upload.
    #[must_use]
    pub fn artifact_uploaded(&self) -> bool {
        matches!(
            self.step(),
            CompileStep::BundleTeardown | CompileStep::FinalReset | CompileStep::Cleanup
        )
    }

    /// True when the failure happened before any filesystem or network work
    #[must_use]
    pub fn before_any_io(&self) -> bool {
        matches!(self.step(), CompileStep::Configuration)
    }
}

impl UserFacingError for CompileError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Configuration { .. } => {
                Some("Supply either a blobstore id or a signed download URL for the package.")
            }
            Self::ScriptExecution { .. } => {
                Some("Inspect the packaging script output in the compilation log directory.")
            }
            Self::BundleTeardown { .. } | Self::FinalReset { .. } | Self::Cleanup { .. } => {
                Some("The artifact was uploaded but the node may hold stale packages; run `kiln reset`.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Upload { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self.step() {
            CompileStep::Configuration => "compile.configuration",
            CompileStep::DependencyReset => "compile.dependency_reset",
            CompileStep::DependencyInstall => "compile.dependency_install",
            CompileStep::Fetch => "compile.fetch",
            CompileStep::Decompress => "compile.decompress",
            CompileStep::BundleSetup => "compile.bundle_setup",
            CompileStep::BundleEnable => "compile.bundle_enable",
            CompileStep::ScriptExecution => "compile.script_execution",
            CompileStep::Compress => "compile.compress",
            CompileStep::Upload => "compile.upload",
            CompileStep::BundleTeardown => "compile.bundle_teardown",
            CompileStep::FinalReset => "compile.final_reset",
            CompileStep::Cleanup => "compile.cleanup",
        };
        Some(code)
    }
}
