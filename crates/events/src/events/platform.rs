//! Process execution events

use serde::{Deserialize, Serialize};

use super::FailureContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    ProcessStarted {
        command: String,
        args: Vec<String>,
        working_dir: Option<String>,
    },

    ProcessCompleted {
        command: String,
        exit_code: Option<i32>,
        duration_ms: u64,
        stdout_bytes: usize,
        stderr_bytes: usize,
    },

    ProcessFailed {
        command: String,
        failure: FailureContext,
        duration_ms: u64,
    },
}
