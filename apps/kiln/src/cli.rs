//! Command line interface definition

use clap::{Parser, Subcommand};
use kiln_types::OutputFormat;
use std::path::PathBuf;

/// kiln - package compilation agent
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version)]
#[command(about = "Compiles packages from source archives and uploads the results")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(clap::Args)]
pub struct GlobalArgs {
    /// Output format for command results
    #[arg(long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Root of the agent's directory layout
    #[arg(long, global = true, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Compile a package and upload the result
    Compile {
        /// JSON compile request; `-` reads it from stdin
        #[arg(long, value_name = "FILE")]
        request: PathBuf,
    },

    /// Report whether a file is an uncompressed tar archive
    Sniff {
        /// File to inspect
        file: PathBuf,
    },

    /// Disable and uninstall every applied dependency package
    Reset,
}
