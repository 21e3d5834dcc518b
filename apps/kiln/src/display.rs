//! Output rendering and formatting

use console::{Style, Term};
use kiln_store::{ArchiveFormat, CompressionFormat};
use kiln_types::{CompiledPackage, OutputFormat};
use serde_json::json;
use std::io;
use std::path::PathBuf;

/// Result of a command, rendered once the command has finished
#[derive(Debug)]
pub enum CommandOutcome {
    Compiled(CompiledPackage),
    Sniffed { path: PathBuf, format: ArchiveFormat },
    Reset,
}

/// Output renderer for CLI results
pub struct OutputRenderer {
    format: OutputFormat,
    term: Term,
}

impl OutputRenderer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            term: Term::stdout(),
        }
    }

    /// Render a command result to stdout
    pub fn render_result(&self, outcome: &CommandOutcome) -> io::Result<()> {
        match outcome {
            // Compile results are consumed by the director, so always JSON
            CommandOutcome::Compiled(compiled) => {
                let json = serde_json::to_string_pretty(compiled).map_err(io::Error::other)?;
                self.term.write_line(&json)
            }
            CommandOutcome::Sniffed { path, format } => self.render_sniff(path, *format),
            CommandOutcome::Reset => self.render_success("Removed every applied package"),
        }
    }

    fn render_sniff(&self, path: &std::path::Path, format: ArchiveFormat) -> io::Result<()> {
        let label = format_label(format);
        match self.format {
            OutputFormat::Json => {
                let value = json!({
                    "path": path.display().to_string(),
                    "format": label,
                    "uncompressed_tar": format == ArchiveFormat::Tar,
                });
                self.term.write_line(&value.to_string())
            }
            OutputFormat::Plain => self.term.write_line(label),
            OutputFormat::Tty => {
                let style = if format == ArchiveFormat::Tar {
                    Style::new().green().bold()
                } else {
                    Style::new().yellow()
                };
                self.term
                    .write_line(&format!("{}: {}", path.display(), style.apply_to(label)))
            }
        }
    }

    fn render_success(&self, message: &str) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => self
                .term
                .write_line(&json!({ "success": true, "message": message }).to_string()),
            OutputFormat::Plain => self.term.write_line(message),
            OutputFormat::Tty => self
                .term
                .write_line(&format!("{} {message}", Style::new().green().apply_to("[OK]"))),
        }
    }
}

fn format_label(format: ArchiveFormat) -> &'static str {
    match format {
        ArchiveFormat::Tar => "tar",
        ArchiveFormat::Compressed(CompressionFormat::Gzip) => "gzip",
        ArchiveFormat::Compressed(CompressionFormat::Bzip2) => "bzip2",
        ArchiveFormat::Compressed(CompressionFormat::Xz) => "xz",
        ArchiveFormat::Compressed(CompressionFormat::Zstd) => "zstd",
        ArchiveFormat::Unknown => "unknown",
    }
}
