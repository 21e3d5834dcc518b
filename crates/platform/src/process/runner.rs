//! Command runner that keeps full process output on disk
//!
//! The complete stdout/stderr of each run land in
//! `<log_dir>/<task>.stdout.log` and `<log_dir>/<task>.stderr.log`; the
//! in-memory copy returned to the caller keeps only the tail.

use async_trait::async_trait;
use kiln_errors::PlatformError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::PlatformContext;
use crate::filesystem::FilesystemOperations;
use crate::process::{PlatformCommand, ProcessOperations};

/// Result of a successful command run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Either stream was cut to the configured tail length
    pub truncated: bool,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion under the log name `task`.
    ///
    /// # Errors
    /// Fails when the process cannot be spawned, its logs cannot be written,
    /// or it exits unsuccessfully.
    async fn run(
        &self,
        ctx: &PlatformContext,
        task: &str,
        cmd: PlatformCommand,
    ) -> Result<CommandResult, PlatformError>;
}

pub struct FileLoggingCommandRunner {
    process: Arc<dyn ProcessOperations>,
    filesystem: Arc<dyn FilesystemOperations>,
    log_dir: PathBuf,
    truncate_bytes: usize,
}

impl FileLoggingCommandRunner {
    pub fn new(
        process: Arc<dyn ProcessOperations>,
        filesystem: Arc<dyn FilesystemOperations>,
        log_dir: impl Into<PathBuf>,
        truncate_bytes: usize,
    ) -> Self {
        Self {
            process,
            filesystem,
            log_dir: log_dir.into(),
            truncate_bytes,
        }
    }

    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn log_path(&self, task: &str, stream: &str) -> PathBuf {
        self.log_dir.join(format!("{task}.{stream}.log"))
    }
}

/// Keep the last `limit` bytes of `bytes`
fn tail(bytes: &[u8], limit: usize) -> (String, bool) {
    if bytes.len() > limit {
        let start = bytes.len() - limit;
        (String::from_utf8_lossy(&bytes[start..]).into_owned(), true)
    } else {
        (String::from_utf8_lossy(bytes).into_owned(), false)
    }
}

#[async_trait]
impl CommandRunner for FileLoggingCommandRunner {
    async fn run(
        &self,
        ctx: &PlatformContext,
        task: &str,
        cmd: PlatformCommand,
    ) -> Result<CommandResult, PlatformError> {
        self.filesystem.create_dir_all(&self.log_dir).await?;

        let display = cmd.display();
        let output = self.process.execute_command(ctx, cmd).await?;

        self.filesystem
            .write_file(&self.log_path(task, "stdout"), &output.stdout)
            .await?;
        self.filesystem
            .write_file(&self.log_path(task, "stderr"), &output.stderr)
            .await?;

        let (stdout, stdout_truncated) = tail(&output.stdout, self.truncate_bytes);
        let (stderr, stderr_truncated) = tail(&output.stderr, self.truncate_bytes);

        if !output.status.success() {
            return Err(PlatformError::CommandFailed {
                command: display,
                exit_code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code: output.status.code(),
            truncated: stdout_truncated || stderr_truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Platform;
    use tempfile::tempdir;

    fn runner(log_dir: &Path, truncate_bytes: usize) -> FileLoggingCommandRunner {
        let platform = Platform::native();
        FileLoggingCommandRunner::new(
            platform.process(),
            platform.filesystem(),
            log_dir,
            truncate_bytes,
        )
    }

    #[test]
    fn test_tail_keeps_last_bytes() {
        assert_eq!(tail(b"abcdef", 3), ("def".to_string(), true));
        assert_eq!(tail(b"abc", 3), ("abc".to_string(), false));
    }

    #[tokio::test]
    async fn test_full_output_is_logged_and_result_truncated() {
        let temp = tempdir().unwrap();
        let log_dir = temp.path().join("compilation");
        let runner = runner(&log_dir, 4);

        let mut cmd = PlatformCommand::new("sh");
        cmd.args(["-c", "printf 0123456789"]);
        let result = runner
            .run(&PlatformContext::default(), "packaging", cmd)
            .await
            .unwrap();

        assert_eq!(result.stdout, "6789");
        assert!(result.truncated);
        assert_eq!(result.exit_code, Some(0));
        let logged = tokio::fs::read_to_string(log_dir.join("packaging.stdout.log"))
            .await
            .unwrap();
        assert_eq!(logged, "0123456789");
        assert!(log_dir.join("packaging.stderr.log").exists());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_command_failed() {
        let temp = tempdir().unwrap();
        let runner = runner(temp.path(), 1024);

        let mut cmd = PlatformCommand::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 7"]);
        let err = runner
            .run(&PlatformContext::default(), "packaging", cmd)
            .await
            .unwrap_err();

        match err {
            PlatformError::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(7));
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(temp.path().join("packaging.stderr.log").exists());
    }
}
