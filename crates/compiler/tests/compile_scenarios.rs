//! End-to-end compile scenarios against recording collaborators

use async_trait::async_trait;
use kiln_bundle::{BundleCollection, BundleLifecycle, DependencyApplier};
use kiln_compiler::{Collaborators, Compiler, ConcreteCompiler};
use kiln_errors::{BundleError, CompileError, CompileStep, Error, PlatformError};
use kiln_events::{AppEvent, CompileEvent, GeneralEvent};
use kiln_hash::{Algorithm, Digest, MultipleDigest};
use kiln_net::BlobTransfer;
use kiln_platform::{
    CommandResult, CommandRunner, FilesystemOperations, NativeFilesystemOperations,
    PlatformCommand, PlatformContext,
};
use kiln_store::{ArchiveCompressor, CompressOptions, TarballCompressor};
use kiln_types::{
    BlobId, BundleDefinition, CompiledPackage, Dependency, Headers, LocalPackage, Package,
    PackageSource, SourceLocator, UploadTarget,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn checksum() -> MultipleDigest {
    MultipleDigest::new(vec![Digest::from_data(Algorithm::Sha1, b"source")]).unwrap()
}

/// Refuse to remove `path` once `allow` removals of it have gone through
struct FailRemove {
    path: PathBuf,
    allow: usize,
}

/// Native filesystem that logs every call and can refuse to remove one path
struct RecordingFs {
    inner: NativeFilesystemOperations,
    log: Log,
    fail_remove: Mutex<Option<FailRemove>>,
}

#[async_trait]
impl FilesystemOperations for RecordingFs {
    async fn create_dir_all(&self, path: &Path) -> Result<(), PlatformError> {
        record(&self.log, "fs:create_dir_all");
        self.inner.create_dir_all(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<(), PlatformError> {
        record(&self.log, "fs:remove_dir_all");
        if let Some(fail) = self.fail_remove.lock().unwrap().as_mut() {
            if fail.path == path {
                if fail.allow == 0 {
                    return Err(PlatformError::FilesystemOperationFailed {
                        operation: "remove_dir_all".to_string(),
                        message: "device busy".to_string(),
                    });
                }
                fail.allow -= 1;
            }
        }
        self.inner.remove_dir_all(path).await
    }

    async fn remove_file(&self, path: &Path) -> Result<(), PlatformError> {
        record(&self.log, "fs:remove_file");
        self.inner.remove_file(path).await
    }

    async fn rename(&self, src: &Path, dst: &Path) -> Result<(), PlatformError> {
        record(&self.log, "fs:rename");
        self.inner.rename(src, dst).await
    }

    async fn read_and_follow_link(&self, path: &Path) -> Result<PathBuf, PlatformError> {
        record(&self.log, "fs:read_and_follow_link");
        self.inner.read_and_follow_link(path).await
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), PlatformError> {
        record(&self.log, "fs:symlink");
        self.inner.symlink(target, link).await
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf, PlatformError> {
        record(&self.log, "fs:read_link");
        self.inner.read_link(path).await
    }

    async fn read_prefix(&self, path: &Path, limit: usize) -> Result<Vec<u8>, PlatformError> {
        record(&self.log, "fs:read_prefix");
        self.inner.read_prefix(path, limit).await
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), PlatformError> {
        record(&self.log, "fs:write_file");
        self.inner.write_file(path, contents).await
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>, PlatformError> {
        record(&self.log, "fs:list_dir");
        self.inner.list_dir(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        record(&self.log, "fs:exists");
        self.inner.exists(path).await
    }

    async fn is_dir(&self, path: &Path) -> bool {
        record(&self.log, "fs:is_dir");
        self.inner.is_dir(path).await
    }
}

struct FakeApplier {
    log: Log,
    fail_on: Option<String>,
}

#[async_trait]
impl DependencyApplier for FakeApplier {
    async fn apply(&self, dependency: &Dependency) -> Result<(), Error> {
        record(&self.log, format!("apply:{}", dependency.name));
        if self.fail_on.as_deref() == Some(dependency.name.as_str()) {
            return Err(BundleError::ApplyFailed {
                package: dependency.name.clone(),
                message: "blob missing".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn keep_only(&self, keep: &[LocalPackage]) -> Result<(), Error> {
        record(&self.log, format!("keep_only:{}", keep.len()));
        Ok(())
    }
}

#[derive(Debug)]
struct FakeBundle {
    name: String,
    install_path: PathBuf,
    log: Log,
    fail_disable: bool,
}

#[async_trait]
impl BundleLifecycle for FakeBundle {
    fn name(&self) -> &str {
        &self.name
    }

    fn version_key(&self) -> &str {
        "key"
    }

    fn install_path(&self) -> &Path {
        &self.install_path
    }

    fn enable_path(&self) -> &Path {
        &self.install_path
    }

    async fn is_installed(&self) -> bool {
        self.install_path.is_dir()
    }

    async fn install(&self, _source: &Path) -> Result<PathBuf, BundleError> {
        unreachable!("compiled bundles are installed without contents")
    }

    async fn install_without_contents(&self) -> Result<PathBuf, BundleError> {
        record(&self.log, "bundle:install");
        tokio::fs::create_dir_all(&self.install_path).await.unwrap();
        tokio::fs::write(self.install_path.join("compiled"), self.name.as_bytes())
            .await
            .unwrap();
        Ok(self.install_path.clone())
    }

    async fn enable(&self) -> Result<PathBuf, BundleError> {
        record(&self.log, "bundle:enable");
        Ok(self.install_path.clone())
    }

    async fn disable(&self) -> Result<(), BundleError> {
        record(&self.log, "bundle:disable");
        if self.fail_disable {
            return Err(BundleError::DisableFailed {
                name: self.name.clone(),
                version: "key".to_string(),
                message: "link busy".to_string(),
            });
        }
        Ok(())
    }

    async fn uninstall(&self) -> Result<(), BundleError> {
        record(&self.log, "bundle:uninstall");
        let _ = tokio::fs::remove_dir_all(&self.install_path).await;
        Ok(())
    }
}

struct FakeBundles {
    root: PathBuf,
    log: Log,
    fail_disable: bool,
}

#[async_trait]
impl BundleCollection for FakeBundles {
    fn get(
        &self,
        definition: &dyn BundleDefinition,
    ) -> Result<Box<dyn BundleLifecycle>, BundleError> {
        Ok(Box::new(FakeBundle {
            name: definition.bundle_name().to_string(),
            install_path: self.root.join(definition.bundle_name()),
            log: Arc::clone(&self.log),
            fail_disable: self.fail_disable,
        }))
    }

    async fn list(&self) -> Result<Vec<Box<dyn BundleLifecycle>>, BundleError> {
        Ok(Vec::new())
    }
}

/// Serves copies of one source archive and keeps the bytes of every upload
struct FakeBlobs {
    archive: PathBuf,
    scratch: PathBuf,
    log: Log,
    uploads: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl BlobTransfer for FakeBlobs {
    async fn fetch(
        &self,
        _checksum: &MultipleDigest,
        locator: &SourceLocator,
        _headers: &Headers,
    ) -> Result<PathBuf, Error> {
        record(&self.log, format!("fetch:{locator}"));
        let dest = self.scratch.join("fetched-archive");
        tokio::fs::copy(&self.archive, &dest).await?;
        Ok(dest)
    }

    async fn upload(&self, _target: &UploadTarget, path: &Path) -> Result<CompiledPackage, Error> {
        record(&self.log, "upload");
        let bytes = tokio::fs::read(path).await?;
        let digest =
            MultipleDigest::new(vec![Digest::from_data(Algorithm::Sha256, &bytes)]).unwrap();
        self.uploads.lock().unwrap().push(bytes);
        Ok(CompiledPackage {
            blob_id: BlobId::new("compiled-blob"),
            digest,
        })
    }
}

struct FakeRunner {
    log: Log,
    exit_code: i32,
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        _ctx: &PlatformContext,
        task: &str,
        cmd: PlatformCommand,
    ) -> Result<CommandResult, PlatformError> {
        record(&self.log, format!("run:{task}:{}", cmd.display()));
        if self.exit_code != 0 {
            return Err(PlatformError::CommandFailed {
                command: cmd.display(),
                exit_code: Some(self.exit_code),
                stdout: String::new(),
                stderr: "make: *** [all] Error 2".to_string(),
            });
        }
        Ok(CommandResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            truncated: false,
        })
    }
}

#[derive(Default)]
struct Options {
    with_script: bool,
    plain_tar: bool,
    script_exit: i32,
    fail_dependency: Option<&'static str>,
    fail_disable: bool,
}

struct Harness {
    _temp: TempDir,
    compile_root: PathBuf,
    log: Log,
    fs: Arc<RecordingFs>,
    blobs: Arc<FakeBlobs>,
    compiler: ConcreteCompiler,
}

impl Harness {
    async fn new(options: Options) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let native: Arc<dyn FilesystemOperations> = Arc::new(NativeFilesystemOperations::new());

        let source = root.join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::write(source.join("main.c"), b"int main(void) { return 0; }\n")
            .await
            .unwrap();
        if options.with_script {
            tokio::fs::write(source.join("packaging"), b"make install\n")
                .await
                .unwrap();
        }
        let archive = TarballCompressor::new(native, root.join("fixture"))
            .compress(
                &source,
                CompressOptions {
                    no_compression: options.plain_tar,
                },
            )
            .await
            .unwrap();

        let scratch = root.join("tmp");
        tokio::fs::create_dir_all(&scratch).await.unwrap();

        let log: Log = Arc::default();
        let fs = Arc::new(RecordingFs {
            inner: NativeFilesystemOperations::new(),
            log: Arc::clone(&log),
            fail_remove: Mutex::new(None),
        });
        let blobs = Arc::new(FakeBlobs {
            archive,
            scratch: scratch.clone(),
            log: Arc::clone(&log),
            uploads: Mutex::new(Vec::new()),
        });

        let collaborators = Collaborators {
            applier: Arc::new(FakeApplier {
                log: Arc::clone(&log),
                fail_on: options.fail_dependency.map(str::to_string),
            }),
            bundles: Arc::new(FakeBundles {
                root: root.join("packages"),
                log: Arc::clone(&log),
                fail_disable: options.fail_disable,
            }),
            blobs: Arc::clone(&blobs) as Arc<dyn BlobTransfer>,
            compressor: Arc::new(TarballCompressor::new(
                Arc::clone(&fs) as Arc<dyn FilesystemOperations>,
                &scratch,
            )),
            filesystem: Arc::clone(&fs) as Arc<dyn FilesystemOperations>,
            runner: Arc::new(FakeRunner {
                log: Arc::clone(&log),
                exit_code: options.script_exit,
            }),
        };

        let compile_root = root.join("compile");
        Self {
            compiler: ConcreteCompiler::new(collaborators, &compile_root),
            _temp: temp,
            compile_root,
            log,
            fs,
            blobs,
        }
    }

    /// Log entries outside the filesystem
    fn calls(&self) -> Vec<String> {
        entries(&self.log)
            .into_iter()
            .filter(|e| !e.starts_with("fs:"))
            .collect()
    }

    fn uploads(&self) -> Vec<Vec<u8>> {
        self.blobs.uploads.lock().unwrap().clone()
    }
}

fn package(name: &str, version: &str) -> Package {
    Package::new(name, version, PackageSource::from_blob(checksum(), "source-blob"))
}

fn dependency(name: &str) -> Dependency {
    Dependency::new(name, "1", PackageSource::from_blob(checksum(), name))
}

#[tokio::test]
async fn test_scenario_a_no_script_compiles_and_uploads() {
    let harness = Harness::new(Options::default()).await;

    let compiled = harness
        .compiler
        .compile(&package("foo", "1"), &[])
        .await
        .unwrap();

    assert!(!compiled.blob_id.is_empty());
    assert!(!compiled.digest.digests().is_empty());
    assert!(!harness.compile_root.join("foo").exists());
    assert_eq!(
        harness.calls(),
        [
            "keep_only:0",
            "fetch:blob source-blob",
            "bundle:install",
            "bundle:enable",
            "upload",
            "bundle:disable",
            "bundle:uninstall",
            "keep_only:0",
        ]
    );
}

#[tokio::test]
async fn test_scenario_b_failing_script_still_cleans_up() {
    let harness = Harness::new(Options {
        with_script: true,
        script_exit: 2,
        ..Options::default()
    })
    .await;

    let err = harness
        .compiler
        .compile(&package("bar", "2"), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, CompileError::ScriptExecution { .. }));
    assert!(!err.artifact_uploaded());
    assert!(!harness.compile_root.join("bar").exists());
    assert!(harness.uploads().is_empty());
    assert!(harness
        .calls()
        .contains(&"run:packaging:bash -x packaging".to_string()));
}

#[tokio::test]
async fn test_scenario_c_failed_dependency_aborts() {
    let harness = Harness::new(Options {
        fail_dependency: Some("dep2"),
        ..Options::default()
    })
    .await;

    let err = harness
        .compiler
        .compile(&package("foo", "1"), &[dependency("dep1"), dependency("dep2")])
        .await
        .unwrap_err();

    match &err {
        CompileError::DependencyInstall { dependency, .. } => assert_eq!(dependency, "dep2"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("'dep2'"));
    assert_eq!(
        harness.calls(),
        ["keep_only:0", "apply:dep1", "apply:dep2"]
    );
}

#[tokio::test]
async fn test_scenario_d_plain_tar_source_stays_uncompressed() {
    let harness = Harness::new(Options {
        plain_tar: true,
        ..Options::default()
    })
    .await;

    harness
        .compiler
        .compile(&package("foo", "1"), &[])
        .await
        .unwrap();

    let uploads = harness.uploads();
    assert_eq!(uploads.len(), 1);
    let artifact = &uploads[0];
    assert_ne!(&artifact[..2], [0x1f, 0x8b]);
    assert_eq!(&artifact[257..262], b"ustar");
}

#[tokio::test]
async fn test_scenario_d_gzip_source_is_recompressed() {
    let harness = Harness::new(Options::default()).await;

    harness
        .compiler
        .compile(&package("foo", "1"), &[])
        .await
        .unwrap();

    let uploads = harness.uploads();
    assert_eq!(&uploads[0][..2], [0x1f, 0x8b]);
}

#[tokio::test]
async fn test_missing_locator_fails_before_any_io() {
    let harness = Harness::new(Options::default()).await;
    let mut pkg = package("foo", "1");
    pkg.source.blobstore_id = None;

    let err = harness
        .compiler
        .compile(&pkg, &[dependency("dep1")])
        .await
        .unwrap_err();

    assert!(matches!(err, CompileError::Configuration { .. }));
    assert!(err.before_any_io());
    assert!(entries(&harness.log).is_empty());
}

#[tokio::test]
async fn test_teardown_failure_discards_uploaded_artifact() {
    let harness = Harness::new(Options {
        fail_disable: true,
        ..Options::default()
    })
    .await;

    let err = harness
        .compiler
        .compile(&package("foo", "1"), &[])
        .await
        .unwrap_err();

    assert_eq!(err.step(), CompileStep::BundleTeardown);
    assert!(err.artifact_uploaded());
    assert_eq!(harness.uploads().len(), 1);
    assert!(!harness.compile_root.join("foo").exists());
}

impl Harness {
    /// Fail the final removal of the compile directory; unpacking clears it
    /// twice before that
    fn fail_cleanup_of(&self, name: &str) {
        *self.fs.fail_remove.lock().unwrap() = Some(FailRemove {
            path: self.compile_root.join(name),
            allow: 2,
        });
    }
}

#[tokio::test]
async fn test_cleanup_error_reported_only_without_primary_error() {
    let harness = Harness::new(Options::default()).await;
    harness.fail_cleanup_of("foo");

    let err = harness
        .compiler
        .compile(&package("foo", "1"), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::Cleanup { .. }));

    let failing = Harness::new(Options {
        with_script: true,
        script_exit: 1,
        ..Options::default()
    })
    .await;
    failing.fail_cleanup_of("foo");

    let err = failing
        .compiler
        .compile(&package("foo", "1"), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::ScriptExecution { .. }));
}

#[tokio::test]
async fn test_events_follow_compile_steps() {
    let (tx, mut rx) = kiln_events::channel();
    let harness = Harness::new(Options::default()).await;
    let compiler = harness.compiler.with_event_sender(tx);

    compiler.compile(&package("foo", "1"), &[]).await.unwrap();
    drop(compiler);

    let mut compile_events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        assert_eq!(message.meta.correlation_id(), Some("foo"));
        if let AppEvent::Compile(event) = message.event {
            compile_events.push(event);
        }
    }

    assert!(matches!(
        compile_events.first(),
        Some(CompileEvent::Started { dependencies: 0, .. })
    ));
    assert!(compile_events
        .iter()
        .any(|e| matches!(e, CompileEvent::ScriptSkipped { .. })));
    assert!(matches!(
        compile_events.last(),
        Some(CompileEvent::Completed { blob_id, .. }) if blob_id == "compiled-blob"
    ));
}

#[tokio::test]
async fn test_stuck_archive_is_reported_without_failing_compile() {
    let (tx, mut rx) = kiln_events::channel();
    let harness = Harness::new(Options::default()).await;
    let archive = harness.blobs.scratch.join("fetched-archive");
    *harness.fs.fail_remove.lock().unwrap() = Some(FailRemove {
        path: archive.clone(),
        allow: 0,
    });
    let compiler = harness.compiler.with_event_sender(tx);

    compiler.compile(&package("foo", "1"), &[]).await.unwrap();
    drop(compiler);

    let mut notices = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let AppEvent::General(GeneralEvent::DebugLog { message, .. }) = message.event {
            notices.push(message);
        }
    }
    assert!(notices
        .iter()
        .any(|m| m.starts_with("could not remove fetched archive") && m.contains("device busy")));
    assert!(archive.exists());
}
