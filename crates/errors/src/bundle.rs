//! Package bundle and dependency application error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BundleError {
    #[error("invalid bundle identity: {message}")]
    InvalidIdentity { message: String },

    #[error("installing bundle {name}/{version}: {message}")]
    InstallFailed {
        name: String,
        version: String,
        message: String,
    },

    #[error("bundle {name}/{version} is not installed")]
    NotInstalled { name: String, version: String },

    #[error("enabling bundle {name}/{version}: {message}")]
    EnableFailed {
        name: String,
        version: String,
        message: String,
    },

    #[error("disabling bundle {name}/{version}: {message}")]
    DisableFailed {
        name: String,
        version: String,
        message: String,
    },

    #[error("uninstalling bundle {name}/{version}: {message}")]
    UninstallFailed {
        name: String,
        version: String,
        message: String,
    },

    #[error("listing installed bundles under {path}: {message}")]
    ListFailed { path: String, message: String },

    #[error("applying package {package}: {message}")]
    ApplyFailed { package: String, message: String },
}

impl UserFacingError for BundleError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::DisableFailed { .. } | Self::UninstallFailed { .. } => {
                Some("Remove the stale bundle directory and symlink by hand, or run `kiln reset`.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::InvalidIdentity { .. } => "bundle.invalid_identity",
            Self::InstallFailed { .. } => "bundle.install_failed",
            Self::NotInstalled { .. } => "bundle.not_installed",
            Self::EnableFailed { .. } => "bundle.enable_failed",
            Self::DisableFailed { .. } => "bundle.disable_failed",
            Self::UninstallFailed { .. } => "bundle.uninstall_failed",
            Self::ListFailed { .. } => "bundle.list_failed",
            Self::ApplyFailed { .. } => "bundle.apply_failed",
        };
        Some(code)
    }
}
