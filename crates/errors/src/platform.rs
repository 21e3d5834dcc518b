//! Platform-specific operation errors

use std::borrow::Cow;

use crate::{StorageError, UserFacingError};
use thiserror::Error;

/// Errors that can occur during filesystem and process operations
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("filesystem operation failed: {operation} - {message}")]
    FilesystemOperationFailed { operation: String, message: String },

    #[error("process execution failed: {command} - {message}")]
    ProcessExecutionFailed { command: String, message: String },

    #[error("command {command} exited with {}: {stderr}", exit_code.map_or_else(|| "signal".to_string(), |c| format!("status {c}")))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("permission denied: {operation} - {message}")]
    PermissionDenied { operation: String, message: String },
}

impl UserFacingError for PlatformError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::FilesystemOperationFailed { .. } => "platform.filesystem",
            Self::ProcessExecutionFailed { .. } => "platform.process",
            Self::CommandFailed { .. } => "platform.command_failed",
            Self::CommandNotFound { .. } => "platform.command_not_found",
            Self::PermissionDenied { .. } => "platform.permission_denied",
        };
        Some(code)
    }
}

impl From<PlatformError> for StorageError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::FilesystemOperationFailed { operation, message } => {
                if operation.contains("rename") || operation.contains("atomic") {
                    StorageError::AtomicRenameFailed { message }
                } else {
                    StorageError::IoError { message }
                }
            }
            PlatformError::PermissionDenied { message, .. } => {
                StorageError::PermissionDenied { path: message }
            }
            _ => StorageError::IoError {
                message: err.to_string(),
            },
        }
    }
}
