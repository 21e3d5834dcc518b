use serde::{Deserialize, Serialize};

use crate::EventSource;
use kiln_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Stable error code such as `compile.fetch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    /// Construct a new failure context.
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

pub mod compile;
pub mod general;
pub mod platform;

pub use compile::*;
pub use general::*;
pub use platform::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// General utility events (warnings, errors, operations)
    General(GeneralEvent),

    /// Package compilation progress
    Compile(CompileEvent),

    /// Process and filesystem operations
    Platform(PlatformEvent),
}

impl AppEvent {
    /// Identify the source domain for this event
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::General,
            Self::Compile(_) => EventSource::Compile,
            Self::Platform(_) => EventSource::Platform,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. } | GeneralEvent::OperationFailed { .. })
            | Self::Compile(CompileEvent::StepFailed { .. } | CompileEvent::Failed { .. })
            | Self::Platform(PlatformEvent::ProcessFailed { .. }) => Level::ERROR,

            Self::General(GeneralEvent::Warning { .. }) => Level::WARN,

            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Compile(CompileEvent::StepStarted { .. } | CompileEvent::StepCompleted { .. })
            | Self::Platform(_) => Level::DEBUG,

            _ => Level::INFO,
        }
    }

    /// Get the log target for this event
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "kiln::events::general",
            Self::Compile(_) => "kiln::events::compile",
            Self::Platform(_) => "kiln::events::platform",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_errors::CompileError;

    #[test]
    fn test_failure_context_from_compile_error() {
        let err = CompileError::Upload {
            package: "foo".into(),
            message: "503".into(),
        };
        let failure = FailureContext::from_error(&err);
        assert_eq!(failure.code.as_deref(), Some("compile.upload"));
        assert!(failure.retryable);
        assert!(failure.message.contains("foo"));
    }

    #[test]
    fn test_compile_failures_log_as_errors() {
        let event = AppEvent::Compile(CompileEvent::StepFailed {
            package: "foo".into(),
            step: "fetch".into(),
            failure: FailureContext::new(None::<String>, "boom", None::<String>, false),
        });
        assert_eq!(event.log_level(), tracing::Level::ERROR);
        assert_eq!(event.event_source(), EventSource::Compile);
    }

    #[test]
    fn test_serialized_shape_is_tagged_by_domain() {
        let event = AppEvent::Compile(CompileEvent::ScriptSkipped {
            package: "foo".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["domain"], "compile");
        assert_eq!(json["event"]["type"], "script_skipped");
    }
}
