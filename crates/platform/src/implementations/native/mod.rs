//! Unix implementation on top of `tokio::fs` and `tokio::process`

pub mod filesystem;
pub mod process;

pub use filesystem::NativeFilesystemOperations;
pub use process::NativeProcessOperations;
