//! Process execution operations

pub mod runner;

use async_trait::async_trait;
use kiln_errors::PlatformError;
use std::path::PathBuf;
use std::process::ExitStatus;

use crate::core::PlatformContext;

/// Platform-specific command builder and execution
#[derive(Debug, Clone)]
pub struct PlatformCommand {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env_vars: Vec<(String, String)>,
}

impl PlatformCommand {
    /// Create a new platform command
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            current_dir: None,
            env_vars: Vec::new(),
        }
    }

    /// Add an argument to the command
    pub fn arg<S: AsRef<str>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Set the working directory for the command
    pub fn current_dir<P: Into<PathBuf>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Add an environment variable on top of the inherited environment
    pub fn env<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn get_current_dir(&self) -> Option<&PathBuf> {
        self.current_dir.as_ref()
    }

    #[must_use]
    pub fn get_env_vars(&self) -> &[(String, String)] {
        &self.env_vars
    }

    /// Look up an environment variable set on this command
    #[must_use]
    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env_vars
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Program and arguments joined for display
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output from command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Trait for process execution operations
#[async_trait]
pub trait ProcessOperations: Send + Sync {
    /// Run a command to completion, capturing its output.
    ///
    /// A non-zero exit is not an error at this level; callers inspect
    /// [`CommandOutput::status`].
    async fn execute_command(
        &self,
        ctx: &PlatformContext,
        cmd: PlatformCommand,
    ) -> Result<CommandOutput, PlatformError>;

    /// Create a new command builder
    fn create_command(&self, program: &str) -> PlatformCommand {
        PlatformCommand::new(program)
    }
}
