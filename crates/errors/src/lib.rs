#![warn(mismatched_lifetime_syntaxes)]
#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the kiln compilation agent
//!
//! This crate provides fine-grained error types organized by domain.
//! All error types implement Clone so they can be carried through events.

use std::borrow::Cow;

use thiserror::Error;

pub mod bundle;
pub mod compile;
pub mod config;
pub mod network;
pub mod platform;
pub mod storage;

// Re-export all error types at the root
pub use bundle::BundleError;
pub use compile::{CompileError, CompileStep, TeardownStage};
pub use config::ConfigError;
pub use network::NetworkError;
pub use platform::PlatformError;
pub use storage::StorageError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
        path: Option<std::path::PathBuf>,
    },
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an Io error with an associated path
    pub fn io_with_path(err: &std::io::Error, path: impl Into<std::path::PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// The compile step that failed, when this error came out of the orchestrator
    #[must_use]
    pub fn compile_step(&self) -> Option<CompileStep> {
        match self {
            Self::Compile(err) => Some(err.step()),
            _ => None,
        }
    }

    /// Render the message of the deepest cause, without the domain prefix.
    ///
    /// Orchestration steps wrap collaborator errors by message, so this keeps
    /// the rendered chain free of repeated "storage error: " style prefixes.
    #[must_use]
    pub fn cause_message(&self) -> String {
        match self {
            Self::Network(err) => err.to_string(),
            Self::Storage(err) => err.to_string(),
            Self::Config(err) => err.to_string(),
            Self::Platform(err) => err.to_string(),
            Self::Bundle(err) => err.to_string(),
            Self::Compile(err) => err.to_string(),
            Self::Internal(message) | Self::Io { message, .. } => message.clone(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {err}"))
    }
}

/// Result type alias for kiln operations
pub type Result<T> = std::result::Result<T, Error>;

/// Minimal interface for rendering user-facing error information without
/// requiring heavyweight envelopes.
pub trait UserFacingError {
    /// Short message suitable for CLI output.
    fn user_message(&self) -> Cow<'_, str>;

    /// Optional remediation hint.
    fn user_hint(&self) -> Option<&'static str> {
        None
    }

    /// Whether retrying the same operation is likely to succeed.
    fn is_retryable(&self) -> bool {
        false
    }

    /// Stable error code for analytics / structured reporting.
    fn user_code(&self) -> Option<&'static str> {
        None
    }
}

impl UserFacingError for Error {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Error::Network(err) => err.user_message(),
            Error::Compile(err) => err.user_message(),
            Error::Io { message, .. } => Cow::Owned(message.clone()),
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Error::Network(err) => err.user_hint(),
            Error::Storage(err) => err.user_hint(),
            Error::Config(err) => err.user_hint(),
            Error::Bundle(err) => err.user_hint(),
            Error::Compile(err) => err.user_hint(),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(err) => err.is_retryable(),
            Error::Storage(err) => err.is_retryable(),
            Error::Compile(err) => err.is_retryable(),
            Error::Io { .. } => true,
            _ => false,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        match self {
            Error::Network(err) => err.user_code(),
            Error::Storage(err) => err.user_code(),
            Error::Config(err) => err.user_code(),
            Error::Platform(err) => err.user_code(),
            Error::Bundle(err) => err.user_code(),
            Error::Compile(err) => err.user_code(),
            Error::Internal(_) => Some("error.internal"),
            Error::Io { .. } => Some("error.io"),
        }
    }
}
