//! Compile orchestration

use async_trait::async_trait;
use kiln_bundle::{BundleCollection, BundleLifecycle, DependencyApplier};
use kiln_config::constants::PACKAGING_SCRIPT;
use kiln_errors::{CompileError, CompileStep, TeardownStage};
use kiln_events::{AppEvent, CompileEvent, EventEmitter, EventSender, FailureContext};
use kiln_net::BlobTransfer;
use kiln_platform::{CommandRunner, FilesystemOperations, PlatformContext};
use kiln_store::{ArchiveCompressor, CompressOptions, FormatSniffer};
use kiln_types::{CompiledPackage, Dependency, LocalPackage, Package};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::packaging::PackagingScript;
use crate::unpack::AtomicUnpacker;

/// Turns a package source archive into an uploaded compiled artifact
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile `package` against `dependencies`, applied in order.
    ///
    /// # Errors
    /// Returns the [`CompileError`] of the first step that failed. A cleanup
    /// failure is only reported when every earlier step succeeded.
    async fn compile(
        &self,
        package: &Package,
        dependencies: &[Dependency],
    ) -> Result<CompiledPackage, CompileError>;
}

/// External collaborators the compiler drives
pub struct Collaborators {
    pub applier: Arc<dyn DependencyApplier>,
    pub bundles: Arc<dyn BundleCollection>,
    pub blobs: Arc<dyn BlobTransfer>,
    pub compressor: Arc<dyn ArchiveCompressor>,
    pub filesystem: Arc<dyn FilesystemOperations>,
    pub runner: Arc<dyn CommandRunner>,
}

pub struct ConcreteCompiler {
    applier: Arc<dyn DependencyApplier>,
    bundles: Arc<dyn BundleCollection>,
    blobs: Arc<dyn BlobTransfer>,
    compressor: Arc<dyn ArchiveCompressor>,
    filesystem: Arc<dyn FilesystemOperations>,
    runner: Arc<dyn CommandRunner>,
    unpacker: AtomicUnpacker,
    sniffer: FormatSniffer,
    script: PackagingScript,
    compile_root: PathBuf,
    event_sender: Option<EventSender>,
}

impl ConcreteCompiler {
    /// Compiler unpacking into `<compile_root>/<package name>` and running
    /// packaging scripts with `bash -x`
    pub fn new(collaborators: Collaborators, compile_root: impl Into<PathBuf>) -> Self {
        let Collaborators {
            applier,
            bundles,
            blobs,
            compressor,
            filesystem,
            runner,
        } = collaborators;

        Self {
            unpacker: AtomicUnpacker::new(
                Arc::clone(&filesystem),
                Arc::clone(&blobs),
                Arc::clone(&compressor),
            ),
            sniffer: FormatSniffer::new(Arc::clone(&filesystem)),
            script: PackagingScript::bash(Arc::clone(&runner)),
            applier,
            bundles,
            blobs,
            compressor,
            filesystem,
            runner,
            compile_root: compile_root.into(),
            event_sender: None,
        }
    }

    /// Run packaging scripts as `<shell> <args...> packaging`
    #[must_use]
    pub fn with_script_shell(mut self, shell: impl Into<String>, args: Vec<String>) -> Self {
        self.script = PackagingScript::new(Arc::clone(&self.runner), shell, args);
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, event_sender: EventSender) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    /// Directory a package's sources are unpacked into
    #[must_use]
    pub fn compile_dir(&self, package_name: &str) -> PathBuf {
        self.compile_root.join(package_name)
    }

    /// Reject requests that cannot be compiled, without touching disk or
    /// network
    fn validate(package: &Package) -> Result<(), CompileError> {
        let configuration = |reason: String| CompileError::Configuration {
            package: package.name.clone(),
            reason,
        };

        let name = package.name.as_str();
        if name.trim().is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(configuration(
                "package name is not a single path component".to_string(),
            ));
        }
        package
            .source
            .locator()
            .map_err(|e| configuration(e.to_string()))?;
        Ok(())
    }

    async fn remove_all_packages(&self) -> Result<(), kiln_errors::Error> {
        self.applier.keep_only(&[]).await
    }

    async fn run(
        &self,
        ctx: &PlatformContext,
        package: &Package,
        dependencies: &[Dependency],
    ) -> Result<CompiledPackage, CompileError> {
        Self::validate(package)?;
        let name = package.name.as_str();

        tracked(ctx, name, CompileStep::DependencyReset, async {
            self.remove_all_packages()
                .await
                .map_err(|e| CompileError::DependencyReset {
                    message: e.cause_message(),
                })
        })
        .await?;

        tracked(ctx, name, CompileStep::DependencyInstall, async {
            for dependency in dependencies {
                self.applier.apply(dependency).await.map_err(|e| {
                    CompileError::DependencyInstall {
                        dependency: dependency.name.clone(),
                        message: e.cause_message(),
                    }
                })?;
            }
            Ok(())
        })
        .await?;

        let compile_dir = self.compile_dir(name);
        let archive = tracked(ctx, name, CompileStep::Fetch, self.unpacker.fetch(package)).await?;
        if let Err(err) = tracked(
            ctx,
            name,
            CompileStep::Decompress,
            self.unpacker.unpack(package, &archive, &compile_dir),
        )
        .await
        {
            self.discard_archive(ctx, &archive).await;
            return Err(err);
        }

        // The compile directory is removed whatever happens from here on
        let result = self
            .compile_unpacked(ctx, package, &compile_dir, &archive)
            .await;

        self.discard_archive(ctx, &archive).await;
        let cleanup = tracked(ctx, name, CompileStep::Cleanup, async {
            self.filesystem
                .remove_dir_all(&compile_dir)
                .await
                .map_err(|e| CompileError::Cleanup {
                    path: compile_dir.display().to_string(),
                    message: e.to_string(),
                })
        })
        .await;

        match (result, cleanup) {
            (Ok(_), Err(err)) => Err(err),
            (result, _) => result,
        }
    }

    /// Remove the fetched source archive; failure only leaves a stray file
    async fn discard_archive(&self, ctx: &PlatformContext, archive: &Path) {
        if let Err(err) = self.filesystem.remove_dir_all(archive).await {
            ctx.emit_debug(format!(
                "could not remove fetched archive {}: {err}",
                archive.display()
            ));
        }
    }

    async fn compile_unpacked(
        &self,
        ctx: &PlatformContext,
        package: &Package,
        compile_dir: &Path,
        archive: &Path,
    ) -> Result<CompiledPackage, CompileError> {
        let name = package.name.as_str();
        let bundle_setup = |message: String| CompileError::BundleSetup {
            package: package.name.clone(),
            message,
        };

        let (bundle, install_path) = tracked(ctx, name, CompileStep::BundleSetup, async {
            let bundle = self
                .bundles
                .get(&LocalPackage::from(package))
                .map_err(|e| bundle_setup(e.to_string()))?;
            let install_path = bundle
                .install_without_contents()
                .await
                .map_err(|e| bundle_setup(e.to_string()))?;
            Ok((bundle, install_path))
        })
        .await?;

        let enable_path = tracked(ctx, name, CompileStep::BundleEnable, async {
            bundle
                .enable()
                .await
                .map_err(|e| CompileError::BundleEnable {
                    package: package.name.clone(),
                    message: e.to_string(),
                })
        })
        .await?;

        if self
            .filesystem
            .exists(&compile_dir.join(PACKAGING_SCRIPT))
            .await
        {
            let output = tracked(ctx, name, CompileStep::ScriptExecution, async {
                self.script
                    .run(ctx, compile_dir, &enable_path, package)
                    .await
                    .map_err(|e| CompileError::ScriptExecution {
                        package: package.name.clone(),
                        message: e.to_string(),
                    })
            })
            .await?;
            if output.truncated {
                ctx.emit_debug(format!(
                    "packaging output for {name} truncated; full logs are on disk"
                ));
            }
        } else {
            ctx.emit(AppEvent::Compile(CompileEvent::ScriptSkipped {
                package: package.name.clone(),
            }));
        }

        // Keep a plain tar source as a plain tar artifact
        let no_compression = self.sniffer.is_uncompressed_tar(archive).await;
        let tarball = tracked(ctx, name, CompileStep::Compress, async {
            self.compressor
                .compress(&install_path, CompressOptions { no_compression })
                .await
                .map_err(|e| CompileError::Compress {
                    package: package.name.clone(),
                    message: e.to_string(),
                })
        })
        .await?;

        let uploaded = tracked(ctx, name, CompileStep::Upload, async {
            self.blobs
                .upload(&package.upload, &tarball)
                .await
                .map_err(|e| CompileError::Upload {
                    package: package.name.clone(),
                    message: e.cause_message(),
                })
        })
        .await;
        let _ = self.compressor.cleanup(&tarball).await;
        let uploaded = uploaded?;

        tracked(ctx, name, CompileStep::BundleTeardown, async {
            teardown(bundle.as_ref(), TeardownStage::Disabling, package).await?;
            teardown(bundle.as_ref(), TeardownStage::Uninstalling, package).await
        })
        .await?;

        tracked(ctx, name, CompileStep::FinalReset, async {
            self.remove_all_packages()
                .await
                .map_err(|e| CompileError::FinalReset {
                    package: package.name.clone(),
                    message: e.cause_message(),
                })
        })
        .await?;

        Ok(uploaded)
    }
}

#[async_trait]
impl Compiler for ConcreteCompiler {
    async fn compile(
        &self,
        package: &Package,
        dependencies: &[Dependency],
    ) -> Result<CompiledPackage, CompileError> {
        let ctx = PlatformContext::with_package_info(
            self.event_sender.clone(),
            &package.name,
            &package.version,
        );
        let started = Instant::now();

        ctx.emit(AppEvent::Compile(CompileEvent::Started {
            package: package.name.clone(),
            version: package.version.clone(),
            dependencies: dependencies.len(),
        }));

        let result = self.run(&ctx, package, dependencies).await;

        match &result {
            Ok(compiled) => ctx.emit(AppEvent::Compile(CompileEvent::Completed {
                package: package.name.clone(),
                blob_id: compiled.blob_id.to_string(),
                digest: compiled.digest.to_string(),
                duration_ms: elapsed_ms(started),
            })),
            Err(err) => ctx.emit(AppEvent::Compile(CompileEvent::Failed {
                package: package.name.clone(),
                failure: FailureContext::from_error(err),
                artifact_uploaded: err.artifact_uploaded(),
            })),
        }

        result
    }
}

async fn teardown(
    bundle: &dyn BundleLifecycle,
    stage: TeardownStage,
    package: &Package,
) -> Result<(), CompileError> {
    let result = match stage {
        TeardownStage::Disabling => bundle.disable().await,
        TeardownStage::Uninstalling => bundle.uninstall().await,
    };
    result.map_err(|e| CompileError::BundleTeardown {
        package: package.name.clone(),
        stage,
        message: e.to_string(),
    })
}

/// Run one compile step, reporting its start and outcome as events
async fn tracked<T, F>(
    ctx: &PlatformContext,
    package: &str,
    step: CompileStep,
    work: F,
) -> Result<T, CompileError>
where
    F: Future<Output = Result<T, CompileError>>,
{
    ctx.emit(AppEvent::Compile(CompileEvent::StepStarted {
        package: package.to_string(),
        step: step.to_string(),
    }));
    let started = Instant::now();

    match work.await {
        Ok(value) => {
            ctx.emit(AppEvent::Compile(CompileEvent::StepCompleted {
                package: package.to_string(),
                step: step.to_string(),
                duration_ms: elapsed_ms(started),
            }));
            Ok(value)
        }
        Err(err) => {
            ctx.emit(AppEvent::Compile(CompileEvent::StepFailed {
                package: package.to_string(),
                step: step.to_string(),
                failure: FailureContext::from_error(&err),
            }));
            Err(err)
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
