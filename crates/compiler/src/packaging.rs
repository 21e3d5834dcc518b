//! Invocation of a source tree's `packaging` script

use kiln_config::constants::PACKAGING_SCRIPT;
use kiln_errors::PlatformError;
use kiln_platform::{CommandResult, CommandRunner, PlatformCommand, PlatformContext};
use kiln_types::Package;
use std::path::Path;
use std::sync::Arc;

/// Directory the script runs in, holding the unpacked sources
pub const ENV_COMPILE_TARGET: &str = "KILN_COMPILE_TARGET";
/// Enabled bundle path the script installs its output into
pub const ENV_INSTALL_TARGET: &str = "KILN_INSTALL_TARGET";
pub const ENV_PACKAGE_NAME: &str = "KILN_PACKAGE_NAME";
pub const ENV_PACKAGE_VERSION: &str = "KILN_PACKAGE_VERSION";

/// Log name of script runs; output lands in `packaging.{stdout,stderr}.log`
pub const PACKAGING_TASK: &str = "packaging";

/// Runs `<shell> <shell_args...> packaging` inside a compile directory
pub struct PackagingScript {
    runner: Arc<dyn CommandRunner>,
    shell: String,
    shell_args: Vec<String>,
}

impl PackagingScript {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        shell: impl Into<String>,
        shell_args: Vec<String>,
    ) -> Self {
        Self {
            runner,
            shell: shell.into(),
            shell_args,
        }
    }

    /// `bash -x packaging`
    #[must_use]
    pub fn bash(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner, "bash", vec!["-x".to_string()])
    }

    /// Build the script command without running it
    #[must_use]
    pub fn command(
        &self,
        compile_dir: &Path,
        enable_path: &Path,
        package: &Package,
    ) -> PlatformCommand {
        let mut cmd = PlatformCommand::new(&self.shell);
        cmd.args(&self.shell_args)
            .arg(PACKAGING_SCRIPT)
            .current_dir(compile_dir)
            .env(ENV_COMPILE_TARGET, compile_dir.display().to_string())
            .env(ENV_INSTALL_TARGET, enable_path.display().to_string())
            .env(ENV_PACKAGE_NAME, package.name.as_str())
            .env(ENV_PACKAGE_VERSION, package.version.as_str());
        cmd
    }

    /// Run the script to completion.
    ///
    /// # Errors
    /// Returns the runner's error, including `CommandFailed` for a
    /// non-zero exit.
    pub async fn run(
        &self,
        ctx: &PlatformContext,
        compile_dir: &Path,
        enable_path: &Path,
        package: &Package,
    ) -> Result<CommandResult, PlatformError> {
        let cmd = self.command(compile_dir, enable_path, package);
        self.runner.run(ctx, PACKAGING_TASK, cmd).await
    }
}
