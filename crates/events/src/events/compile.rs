//! Package compilation events
//!
//! Every event carries the package name; emitters use it as the correlation
//! id so one compile can be followed through interleaved logs.

use serde::{Deserialize, Serialize};

use super::FailureContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompileEvent {
    /// A compile request was accepted
    Started {
        package: String,
        version: String,
        dependencies: usize,
    },

    StepStarted {
        package: String,
        step: String,
    },

    StepCompleted {
        package: String,
        step: String,
        duration_ms: u64,
    },

    /// A step failed; teardown may still run afterwards
    StepFailed {
        package: String,
        step: String,
        failure: FailureContext,
    },

    /// The source tree carried no `packaging` script
    ScriptSkipped {
        package: String,
    },

    Completed {
        package: String,
        blob_id: String,
        digest: String,
        duration_ms: u64,
    },

    Failed {
        package: String,
        failure: FailureContext,
        /// The artifact reached the blobstore before the failure
        artifact_uploaded: bool,
    },
}

impl CompileEvent {
    /// Name of the package the event belongs to
    #[must_use]
    pub fn package(&self) -> &str {
        match self {
            Self::Started { package, .. }
            | Self::StepStarted { package, .. }
            | Self::StepCompleted { package, .. }
            | Self::StepFailed { package, .. }
            | Self::ScriptSkipped { package }
            | Self::Completed { package, .. }
            | Self::Failed { package, .. } => package,
        }
    }
}
