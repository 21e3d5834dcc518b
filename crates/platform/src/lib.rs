#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Platform abstraction layer for the kiln agent.
//!
//! Filesystem and process operations sit behind async traits so the
//! compile workflow can be driven against fakes in tests. The native
//! implementation targets Unix hosts and emits platform events for every
//! spawned process.

pub mod core;
pub mod filesystem;
pub mod implementations;
pub mod process;

pub use core::{Platform, PlatformContext};
pub use implementations::native::{NativeFilesystemOperations, NativeProcessOperations};

/// Re-export commonly used types
pub use filesystem::FilesystemOperations;
pub use process::runner::{CommandResult, CommandRunner, FileLoggingCommandRunner};
pub use process::{CommandOutput, PlatformCommand, ProcessOperations};
