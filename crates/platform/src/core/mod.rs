//! Core platform abstractions and context management

use kiln_events::{AppEvent, EventEmitter, EventMeta, EventSender, PackageScope};
use std::sync::Arc;

use crate::filesystem::FilesystemOperations;
use crate::implementations::native::{NativeFilesystemOperations, NativeProcessOperations};
use crate::process::{PlatformCommand, ProcessOperations};

/// Context for platform operations, providing event emission scoped to a package
#[derive(Debug, Clone, Default)]
pub struct PlatformContext {
    event_sender: Option<EventSender>,
    package: Option<PackageScope>,
}

impl PlatformContext {
    #[must_use]
    pub fn new(event_sender: Option<EventSender>) -> Self {
        Self {
            event_sender,
            package: None,
        }
    }

    /// Create a context whose events are correlated with one package
    #[must_use]
    pub fn with_package_info(
        event_sender: Option<EventSender>,
        package_name: &str,
        package_version: &str,
    ) -> Self {
        Self {
            event_sender,
            package: Some(PackageScope::new(package_name, package_version)),
        }
    }
}

impl EventEmitter for PlatformContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }

    fn enrich_event_meta(&self, _event: &AppEvent, meta: &mut EventMeta) {
        if meta.package.is_none() {
            meta.package.clone_from(&self.package);
        }
    }
}

/// Main platform abstraction providing access to all platform operations
#[derive(Clone)]
pub struct Platform {
    filesystem_ops: Arc<dyn FilesystemOperations>,
    process_ops: Arc<dyn ProcessOperations>,
}

impl Platform {
    /// Create a new platform instance with the specified implementations
    pub fn new(
        filesystem_ops: Arc<dyn FilesystemOperations>,
        process_ops: Arc<dyn ProcessOperations>,
    ) -> Self {
        Self {
            filesystem_ops,
            process_ops,
        }
    }

    /// The platform backed by `tokio::fs` and `tokio::process`
    #[must_use]
    pub fn native() -> Self {
        Self::new(
            Arc::new(NativeFilesystemOperations::new()),
            Arc::new(NativeProcessOperations::new()),
        )
    }

    #[must_use]
    pub fn filesystem(&self) -> Arc<dyn FilesystemOperations> {
        Arc::clone(&self.filesystem_ops)
    }

    #[must_use]
    pub fn process(&self) -> Arc<dyn ProcessOperations> {
        Arc::clone(&self.process_ops)
    }

    /// Convenience method: Create a new command builder
    #[must_use]
    pub fn command(&self, program: &str) -> PlatformCommand {
        self.process_ops.create_command(program)
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
