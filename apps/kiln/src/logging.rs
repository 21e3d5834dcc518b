//! Structured logging integration for events
//!
//! Library crates only emit events; this module turns each one into a
//! tracing record with structured fields. Every record carries the event
//! source, id and correlation id (the package name during a compile).

use kiln_events::{AppEvent, CompileEvent, EventMessage, GeneralEvent, PlatformEvent};
use tracing::{debug, error, info, trace, warn};

/// Log an `EventMessage` through tracing at the level recorded in its metadata
pub fn log_event_with_tracing(message: &EventMessage) {
    let event = &message.event;
    let meta = &message.meta;
    let level = meta.tracing_level();

    match event {
        AppEvent::Compile(compile_event) => match compile_event {
            CompileEvent::Started {
                package,
                version,
                dependencies,
            } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    package = %package,
                    version = %version,
                    dependencies = dependencies,
                    "Compile started"
                );
            }
            CompileEvent::StepStarted { package, step } => {
                debug!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    package = %package,
                    step = %step,
                    "Compile step started"
                );
            }
            CompileEvent::StepCompleted {
                package,
                step,
                duration_ms,
            } => {
                debug!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    package = %package,
                    step = %step,
                    duration_ms = duration_ms,
                    "Compile step completed"
                );
            }
            CompileEvent::StepFailed {
                package,
                step,
                failure,
            } => {
                warn!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    package = %package,
                    step = %step,
                    code = ?failure.code,
                    message = %failure.message,
                    "Compile step failed"
                );
            }
            CompileEvent::ScriptSkipped { package } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    package = %package,
                    "No packaging script, compiling an empty bundle"
                );
            }
            CompileEvent::Completed {
                package,
                blob_id,
                digest,
                duration_ms,
            } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    package = %package,
                    blob_id = %blob_id,
                    digest = %digest,
                    duration_ms = duration_ms,
                    "Compile completed"
                );
            }
            CompileEvent::Failed {
                package,
                failure,
                artifact_uploaded,
            } => {
                error!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    package = %package,
                    artifact_uploaded = artifact_uploaded,
                    retryable = failure.retryable,
                    code = ?failure.code,
                    message = %failure.message,
                    hint = ?failure.hint,
                    "Compile failed"
                );
            }
        },

        AppEvent::Platform(platform_event) => match platform_event {
            PlatformEvent::ProcessStarted {
                command,
                args,
                working_dir,
            } => {
                debug!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    command = %command,
                    args = ?args,
                    working_dir = ?working_dir,
                    "Process started"
                );
            }
            PlatformEvent::ProcessCompleted {
                command,
                exit_code,
                duration_ms,
                stdout_bytes,
                stderr_bytes,
            } => {
                debug!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    command = %command,
                    exit_code = ?exit_code,
                    duration_ms = duration_ms,
                    stdout_bytes = stdout_bytes,
                    stderr_bytes = stderr_bytes,
                    "Process completed"
                );
            }
            PlatformEvent::ProcessFailed {
                command,
                failure,
                duration_ms,
            } => {
                warn!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    command = %command,
                    duration_ms = duration_ms,
                    code = ?failure.code,
                    message = %failure.message,
                    "Process failed"
                );
            }
        },

        AppEvent::General(general_event) => match general_event {
            GeneralEvent::Warning { message, context } => {
                warn!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    context = ?context,
                    "{message}"
                );
            }
            GeneralEvent::Error { message, details } => {
                error!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    details = ?details,
                    "{message}"
                );
            }
            GeneralEvent::DebugLog { message, context } => {
                debug!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id(),
                    context = ?context,
                    "{message}"
                );
            }
            _ => match level {
                tracing::Level::ERROR => {
                    error!(source = meta.source.as_str(), event_id = %meta.event_id, correlation = ?meta.correlation_id(), event = ?general_event, "General event")
                }
                tracing::Level::WARN => {
                    warn!(source = meta.source.as_str(), event_id = %meta.event_id, correlation = ?meta.correlation_id(), event = ?general_event, "General event")
                }
                tracing::Level::INFO => {
                    info!(source = meta.source.as_str(), event_id = %meta.event_id, correlation = ?meta.correlation_id(), event = ?general_event, "General event")
                }
                tracing::Level::DEBUG => {
                    debug!(source = meta.source.as_str(), event_id = %meta.event_id, correlation = ?meta.correlation_id(), event = ?general_event, "General event")
                }
                tracing::Level::TRACE => {
                    trace!(source = meta.source.as_str(), event_id = %meta.event_id, correlation = ?meta.correlation_id(), event = ?general_event, "General event")
                }
            },
        },
    }
}
