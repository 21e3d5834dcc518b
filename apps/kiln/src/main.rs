//! kiln - package compilation agent
//!
//! Command line front end over the compiler crate: loads configuration,
//! wires the collaborators together and logs the events they emit.

mod cli;
mod display;
mod error;
mod logging;
mod setup;

use crate::cli::{Cli, Commands};
use crate::display::{CommandOutcome, OutputRenderer};
use crate::error::CliError;
use crate::setup::{Services, SystemSetup};
use clap::Parser;
use kiln_config::Config;
use kiln_events::EventReceiver;
use kiln_platform::Platform;
use kiln_store::FormatSniffer;
use kiln_types::{CompileRequest, OutputFormat};
use std::path::{Path, PathBuf};
use std::process;
use tokio::io::AsyncReadExt;
use tokio::select;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.global.output == Some(OutputFormat::Json);

    init_tracing(json_mode, cli.global.debug);

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting kiln v{}", env!("CARGO_PKG_VERSION"));

    // File, then environment, then flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    apply_cli_config(&mut config, &cli.global);
    config.validate()?;

    let renderer = OutputRenderer::new(config.general.default_output);

    let outcome = match cli.command {
        // Sniffing needs neither the agent's layout nor the network
        Commands::Sniff { file } => sniff(file).await,
        command => {
            let (event_sender, event_receiver) = kiln_events::channel();
            let services = SystemSetup::new(config).initialize(event_sender).await?;
            execute_command_with_events(command, services, event_receiver).await?
        }
    };

    renderer.render_result(&outcome)?;
    info!("Command completed successfully");
    Ok(())
}

/// Execute command with concurrent event handling
async fn execute_command_with_events(
    command: Commands,
    services: Services,
    mut event_receiver: EventReceiver,
) -> Result<CommandOutcome, CliError> {
    let mut command_future = Box::pin(execute_command(command, services));

    loop {
        select! {
            result = &mut command_future => {
                // Drain events emitted right before completion
                while let Ok(message) = event_receiver.try_recv() {
                    logging::log_event_with_tracing(&message);
                }
                return result;
            }

            message = event_receiver.recv() => {
                if let Some(message) = message {
                    logging::log_event_with_tracing(&message);
                }
            }
        }
    }
}

async fn execute_command(command: Commands, services: Services) -> Result<CommandOutcome, CliError> {
    match command {
        Commands::Compile { request } => {
            let request = read_request(&request).await?;
            let compiled = services
                .compiler
                .compile(&request.package, &request.dependencies)
                .await?;
            Ok(CommandOutcome::Compiled(compiled))
        }
        Commands::Reset => {
            services.applier.keep_only(&[]).await?;
            Ok(CommandOutcome::Reset)
        }
        Commands::Sniff { file } => Ok(sniff(file).await),
    }
}

async fn sniff(file: PathBuf) -> CommandOutcome {
    let sniffer = FormatSniffer::new(Platform::native().filesystem());
    let format = sniffer.classify(&file).await;
    CommandOutcome::Sniffed { path: file, format }
}

async fn read_request(path: &Path) -> Result<CompileRequest, CliError> {
    let contents = if path == Path::new("-") {
        let mut buffer = String::new();
        tokio::io::stdin().read_to_string(&mut buffer).await?;
        buffer
    } else {
        tokio::fs::read_to_string(path).await?
    };

    serde_json::from_str(&contents).map_err(|e| CliError::InvalidRequest(e.to_string()))
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(config: &mut Config, global: &cli::GlobalArgs) {
    if let Some(output) = global.output {
        config.general.default_output = output;
    }
    if let Some(base_dir) = &global.base_dir {
        config.paths.base_dir.clone_from(base_dir);
    }
}

/// Initialize tracing/logging
///
/// Logs go to stderr so stdout stays reserved for command results.
fn init_tracing(json_mode: bool, debug_enabled: bool) {
    let default_filter = if debug_enabled {
        "info,kiln=debug"
    } else {
        "warn,kiln=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if json_mode {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(debug_enabled)
            .init();
    }
}
