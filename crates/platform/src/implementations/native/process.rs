//! Native process operations

use async_trait::async_trait;
use kiln_errors::PlatformError;
use kiln_events::{AppEvent, EventEmitter, FailureContext, PlatformEvent};
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::core::PlatformContext;
use crate::process::{CommandOutput, PlatformCommand, ProcessOperations};

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProcessOperations;

impl NativeProcessOperations {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl ProcessOperations for NativeProcessOperations {
    async fn execute_command(
        &self,
        ctx: &PlatformContext,
        cmd: PlatformCommand,
    ) -> Result<CommandOutput, PlatformError> {
        let start = Instant::now();

        ctx.emit(AppEvent::Platform(PlatformEvent::ProcessStarted {
            command: cmd.program().to_string(),
            args: cmd.get_args().to_vec(),
            working_dir: cmd
                .get_current_dir()
                .map(|dir| dir.display().to_string()),
        }));

        let result = async {
            let mut command = Command::new(cmd.program());
            command.args(cmd.get_args());

            if let Some(dir) = cmd.get_current_dir() {
                command.current_dir(dir);
            }

            for (key, value) in cmd.get_env_vars() {
                command.env(key, value);
            }

            let output = command.output().await.map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    PlatformError::CommandNotFound {
                        command: cmd.program().to_string(),
                    }
                } else {
                    PlatformError::ProcessExecutionFailed {
                        command: cmd.program().to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

            Ok(CommandOutput {
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
        .await;

        let duration_ms = duration_to_millis(start.elapsed());
        match &result {
            Ok(output) => ctx.emit(AppEvent::Platform(PlatformEvent::ProcessCompleted {
                command: cmd.program().to_string(),
                exit_code: output.status.code(),
                duration_ms,
                stdout_bytes: output.stdout.len(),
                stderr_bytes: output.stderr.len(),
            })),
            Err(e) => ctx.emit(AppEvent::Platform(PlatformEvent::ProcessFailed {
                command: cmd.program().to_string(),
                failure: FailureContext::from_error(e),
                duration_ms,
            })),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_command_captures_output_and_env() {
        let ops = NativeProcessOperations::new();
        let (tx, mut rx) = kiln_events::channel();
        let ctx = PlatformContext::new(Some(tx));

        let mut cmd = ops.create_command("sh");
        cmd.args(["-c", "echo \"$GREETING\"; echo oops >&2; exit 3"])
            .env("GREETING", "hello");

        let output = ops.execute_command(&ctx, cmd).await.unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "oops");

        let started = rx.recv().await.unwrap();
        assert!(matches!(
            started.event,
            AppEvent::Platform(PlatformEvent::ProcessStarted { .. })
        ));
        let completed = rx.recv().await.unwrap();
        assert!(matches!(
            completed.event,
            AppEvent::Platform(PlatformEvent::ProcessCompleted {
                exit_code: Some(3),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_command_not_found() {
        let ops = NativeProcessOperations::new();
        let ctx = PlatformContext::default();
        let cmd = ops.create_command("kiln-definitely-not-a-program");

        let err = ops.execute_command(&ctx, cmd).await.unwrap_err();
        assert!(matches!(err, PlatformError::CommandNotFound { .. }));
    }
}
